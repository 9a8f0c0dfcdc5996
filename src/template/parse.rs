//! Parsing of `{{ ... }}` actions.

use std::iter::Peekable;
use std::str::CharIndices;

use serde_json::Value;

use super::{FuncMap, TemplateError};

const OPEN: &str = "{{";
const CLOSE: &str = "}}";
const KEYWORDS: &[&str] = &[
    "if", "else", "end", "range", "with", "define", "template", "block", "break", "continue",
];

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Piece {
    Text(String),
    Action(Pipeline),
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct Pipeline {
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct Command {
    pub operands: Vec<Operand>,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Operand {
    Literal(Value),
    Func(String),
    Dot,
    Pipeline(Pipeline),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Literal(Value),
    Ident(String),
    Dot,
    Pipe,
    LeftParen,
    RightParen,
    Close { trim: bool },
}

/// Splits `source` into text and actions, resolving function names against
/// `funcs`.
pub(super) fn parse(source: &str, funcs: &FuncMap) -> Result<Vec<Piece>, TemplateError> {
    let mut pieces = Vec::new();
    let mut rest = source;
    let mut offset = 0;
    let mut trim_next = false;

    while let Some(start) = rest.find(OPEN) {
        let mut text = &rest[..start];
        if trim_next {
            text = text.trim_start();
        }
        let mut body = &rest[start + OPEN.len()..];
        let mut body_offset = offset + start + OPEN.len();

        if body.starts_with('-') && body[1..].starts_with(char::is_whitespace) {
            text = text.trim_end();
            body = &body[1..];
            body_offset += 1;
        }
        push_text(&mut pieces, text);

        let trimmed = body.trim_start();
        let consumed = if trimmed.starts_with("/*") {
            let (len, trim) = skip_comment(body, body_offset)?;
            trim_next = trim;
            len
        } else {
            let mut lexer = Lexer::new(body, body_offset);
            let pipeline = Parser {
                lexer: &mut lexer,
                funcs,
            }
            .action()?;
            trim_next = lexer.trim_close;
            pieces.push(Piece::Action(pipeline));
            lexer.consumed
        };

        offset = body_offset + consumed;
        rest = &source[offset..];
    }

    let text = if trim_next { rest.trim_start() } else { rest };
    push_text(&mut pieces, text);
    Ok(pieces)
}

fn push_text(pieces: &mut Vec<Piece>, text: &str) {
    if !text.is_empty() {
        pieces.push(Piece::Text(text.to_string()));
    }
}

/// Returns the length of a `/* ... */` comment action including its close
/// delimiter, and whether it ended with `-}}`.
fn skip_comment(body: &str, offset: usize) -> Result<(usize, bool), TemplateError> {
    let start = body.find("/*").unwrap_or(0);
    let end = body[start..]
        .find("*/")
        .map(|i| start + i + 2)
        .ok_or_else(|| TemplateError::parse(offset, "unclosed comment"))?;

    let after = &body[end..];
    if let Some(close) = after.strip_prefix(" -").and_then(|s| s.strip_prefix(CLOSE)) {
        return Ok((body.len() - close.len(), true));
    }
    if after.starts_with(CLOSE) {
        return Ok((end + CLOSE.len(), false));
    }
    Err(TemplateError::parse(offset + end, "comment ends before closing delimiter"))
}

struct Lexer<'a> {
    source: &'a str,
    chars: Peekable<CharIndices<'a>>,
    offset: usize,
    consumed: usize,
    trim_close: bool,
    peeked: Option<Token>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str, offset: usize) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            offset,
            consumed: 0,
            trim_close: false,
            peeked: None,
        }
    }

    fn position(&mut self) -> usize {
        self.offset + self.chars.peek().map(|(i, _)| *i).unwrap_or(self.source.len())
    }

    fn error(&mut self, message: impl Into<String>) -> TemplateError {
        let at = self.position();
        TemplateError::parse(at, message)
    }

    fn peek(&mut self) -> Result<&Token, TemplateError> {
        let token = match self.peeked.take() {
            Some(token) => token,
            None => self.lex()?,
        };
        Ok(self.peeked.insert(token))
    }

    fn next(&mut self) -> Result<Token, TemplateError> {
        match self.peeked.take() {
            Some(token) => Ok(token),
            None => self.lex(),
        }
    }

    fn lex(&mut self) -> Result<Token, TemplateError> {
        let mut saw_space = false;
        while let Some((_, c)) = self.chars.peek() {
            if !c.is_whitespace() {
                break;
            }
            saw_space = true;
            self.chars.next();
        }

        let Some(&(index, c)) = self.chars.peek() else {
            return Err(self.error("unclosed action"));
        };
        let rest = &self.source[index..];

        if saw_space && rest.starts_with("-}}") {
            self.finish(index + 3, true);
            return Ok(Token::Close { trim: true });
        }
        if rest.starts_with(CLOSE) {
            self.finish(index + CLOSE.len(), false);
            return Ok(Token::Close { trim: false });
        }

        match c {
            '|' => {
                self.chars.next();
                Ok(Token::Pipe)
            }
            '(' => {
                self.chars.next();
                Ok(Token::LeftParen)
            }
            ')' => {
                self.chars.next();
                Ok(Token::RightParen)
            }
            '"' => self.quoted(),
            '`' => self.raw(),
            '.' => {
                self.chars.next();
                let field = matches!(self.chars.peek(), Some((_, c)) if c.is_alphanumeric() || *c == '_');
                if field {
                    return Err(self.error("field access is not supported"));
                }
                Ok(Token::Dot)
            }
            c if c == '-' || c == '+' || c.is_ascii_digit() => self.number(),
            c if c.is_alphabetic() || c == '_' => Ok(self.ident()),
            c => Err(self.error(format!("unexpected {c:?} in action"))),
        }
    }

    fn finish(&mut self, end: usize, trim: bool) {
        while self.chars.next_if(|(i, _)| *i < end).is_some() {}
        self.consumed = end;
        self.trim_close = trim;
    }

    fn quoted(&mut self) -> Result<Token, TemplateError> {
        self.chars.next();
        let mut value = String::new();
        loop {
            let Some((_, c)) = self.chars.next() else {
                return Err(self.error("unterminated quoted string"));
            };
            match c {
                '"' => return Ok(Token::Literal(Value::String(value))),
                '\n' => return Err(self.error("newline in quoted string")),
                '\\' => {
                    let Some((_, escaped)) = self.chars.next() else {
                        return Err(self.error("unterminated quoted string"));
                    };
                    match escaped {
                        'n' => value.push('\n'),
                        't' => value.push('\t'),
                        'r' => value.push('\r'),
                        '\\' => value.push('\\'),
                        '"' => value.push('"'),
                        '\'' => value.push('\''),
                        other => {
                            return Err(self.error(format!("unknown escape sequence \\{other}")));
                        }
                    }
                }
                c => value.push(c),
            }
        }
    }

    fn raw(&mut self) -> Result<Token, TemplateError> {
        self.chars.next();
        let mut value = String::new();
        for (_, c) in self.chars.by_ref() {
            if c == '`' {
                return Ok(Token::Literal(Value::String(value)));
            }
            value.push(c);
        }
        Err(self.error("unterminated raw string"))
    }

    fn number(&mut self) -> Result<Token, TemplateError> {
        let mut text = String::new();
        while let Some((_, c)) = self
            .chars
            .next_if(|(_, c)| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '+' | '_'))
        {
            text.push(c);
        }

        let cleaned = text.replace('_', "");
        if let Ok(i) = cleaned.parse::<i64>() {
            return Ok(Token::Literal(Value::from(i)));
        }
        match cleaned.parse::<f64>() {
            Ok(f) if f.is_finite() => Ok(Token::Literal(Value::from(f))),
            _ => Err(self.error(format!("bad number syntax: {text:?}"))),
        }
    }

    fn ident(&mut self) -> Token {
        let mut name = String::new();
        while let Some((_, c)) = self.chars.next_if(|(_, c)| c.is_alphanumeric() || *c == '_') {
            name.push(c);
        }
        match name.as_str() {
            "true" => Token::Literal(Value::Bool(true)),
            "false" => Token::Literal(Value::Bool(false)),
            "nil" => Token::Literal(Value::Null),
            _ => Token::Ident(name),
        }
    }
}

struct Parser<'l, 'a> {
    lexer: &'l mut Lexer<'a>,
    funcs: &'l FuncMap,
}

impl Parser<'_, '_> {
    fn action(&mut self) -> Result<Pipeline, TemplateError> {
        let pipeline = self.pipeline()?;
        match self.lexer.next()? {
            Token::Close { .. } => Ok(pipeline),
            Token::RightParen => Err(self.lexer.error("unexpected right paren")),
            token => Err(self.lexer.error(format!("unexpected {token:?} in action"))),
        }
    }

    fn pipeline(&mut self) -> Result<Pipeline, TemplateError> {
        let mut commands = vec![self.command()?];
        while matches!(self.lexer.peek()?, Token::Pipe) {
            self.lexer.next()?;
            commands.push(self.command()?);
        }
        Ok(Pipeline { commands })
    }

    fn command(&mut self) -> Result<Command, TemplateError> {
        let mut operands = Vec::new();
        loop {
            match self.lexer.peek()? {
                Token::Pipe | Token::RightParen | Token::Close { .. } => break,
                _ => operands.push(self.operand()?),
            }
        }
        if operands.is_empty() {
            return Err(self.lexer.error("missing value for command"));
        }
        Ok(Command { operands })
    }

    fn operand(&mut self) -> Result<Operand, TemplateError> {
        match self.lexer.next()? {
            Token::Literal(value) => Ok(Operand::Literal(value)),
            Token::Dot => Ok(Operand::Dot),
            Token::Ident(name) => {
                if KEYWORDS.contains(&name.as_str()) {
                    return Err(TemplateError::Unsupported(name));
                }
                if !self.funcs.contains(&name) {
                    return Err(TemplateError::UnknownFunction(name));
                }
                Ok(Operand::Func(name))
            }
            Token::LeftParen => {
                let inner = self.pipeline()?;
                match self.lexer.next()? {
                    Token::RightParen => Ok(Operand::Pipeline(inner)),
                    _ => Err(self.lexer.error("unclosed left paren")),
                }
            }
            token => Err(self.lexer.error(format!("unexpected {token:?} in operand"))),
        }
    }
}
