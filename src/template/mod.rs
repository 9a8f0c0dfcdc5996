//! Per-value templating.
//!
//! A scalar that contains `{{` is compiled as a template and executed against a
//! [`FuncMap`]. The action syntax is the small, function-call subset of Go's
//! `text/template`:
//!
//! ```text
//! {{ bitwardenFormat "example.com" "%s:%s" "username" "password" }}
//! {{ "literal" }}  {{ lookup "id" | upper }}  {{ join (first "a") "b" }}
//! {{- trims surrounding whitespace -}}  {{/* comment */}}
//! ```
//!
//! Templates run without a data context, so `.` always evaluates to nil.

mod parse;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::config::node::Node;
use parse::{Command, Operand, Piece, Pipeline};

/// Error returned by template functions.
pub type FuncError = Box<dyn std::error::Error + Send + Sync>;

/// Error returned by an [`Executor`].
pub type ExecError = Box<dyn std::error::Error + Send + Sync>;

type TemplateFn = Arc<dyn Fn(&[Value]) -> Result<Value, FuncError> + Send + Sync>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TemplateError {
    #[error("parse template at {offset}: {message}")]
    Parse { offset: usize, message: String },

    #[error("function {0:?} not defined")]
    UnknownFunction(String),

    #[error("unsupported template action {0:?}")]
    Unsupported(String),

    #[error("can't give argument to non-function")]
    ArgumentToNonFunction,

    #[error("error calling {name}: {source}")]
    Call { name: String, source: FuncError },
}

impl TemplateError {
    fn parse(offset: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            offset,
            message: message.into(),
        }
    }
}

/// Named functions callable from templates.
#[derive(Clone, Default)]
pub struct FuncMap {
    funcs: BTreeMap<String, TemplateFn>,
}

impl FuncMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `func` under `name`, replacing any function already there.
    pub fn insert<F>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(&[Value]) -> Result<Value, FuncError> + Send + Sync + 'static,
    {
        self.funcs.insert(name.into(), Arc::new(func));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.funcs.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.funcs.keys().map(String::as_str)
    }

    fn call(&self, name: &str, args: &[Value]) -> Result<Value, TemplateError> {
        let func = self
            .funcs
            .get(name)
            .ok_or_else(|| TemplateError::UnknownFunction(name.to_string()))?;
        func(args).map_err(|source| TemplateError::Call {
            name: name.to_string(),
            source,
        })
    }
}

impl fmt::Debug for FuncMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.funcs.keys()).finish()
    }
}

/// Returns argument `index` as a string.
pub fn str_arg(args: &[Value], index: usize) -> Result<&str, FuncError> {
    match args.get(index) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(format!("argument {index}: expected string, got {other}").into()),
        None => Err(format!("missing argument {index}").into()),
    }
}

/// Returns every argument from `index` on as a string.
pub fn str_args(args: &[Value], index: usize) -> Result<Vec<&str>, FuncError> {
    (index..args.len()).map(|i| str_arg(args, i)).collect()
}

/// Transforms one scalar of a document while it is being decoded.
///
/// `name` identifies the value (its key path) for error reporting only.
pub trait Executor: Send + Sync {
    fn execute(&self, name: &str, value: Node) -> Result<Node, ExecError>;
}

impl<F> Executor for F
where
    F: Fn(&str, Node) -> Result<Node, ExecError> + Send + Sync,
{
    fn execute(&self, name: &str, value: Node) -> Result<Node, ExecError> {
        self(name, value)
    }
}

/// The default [`Executor`].
///
/// Non-string values and strings without `{{` pass through untouched. Other
/// strings are rendered, and the output is parsed as JSON so that a template
/// can produce a number, boolean, mapping or sequence. Output that is not JSON
/// is kept as a plain string.
#[derive(Debug, Clone, Default)]
pub struct Template {
    funcs: FuncMap,
}

impl Template {
    pub fn new(funcs: FuncMap) -> Self {
        Self { funcs }
    }

    /// A template with the `bitwarden*` and `lastpass*` functions registered.
    pub fn with_default_funcs() -> Self {
        Self::new(crate::provider::default_funcs())
    }

    pub fn funcs(&self) -> &FuncMap {
        &self.funcs
    }

    /// Compiles and executes `source`, returning the rendered text.
    pub fn render(&self, source: &str) -> Result<String, TemplateError> {
        let pieces = parse::parse(source, &self.funcs)?;

        let mut out = String::new();
        for piece in pieces {
            match piece {
                Piece::Text(text) => out.push_str(&text),
                Piece::Action(pipeline) => {
                    let value = self.pipeline(&pipeline)?;
                    write_value(&mut out, &value);
                }
            }
        }
        Ok(out)
    }

    fn pipeline(&self, pipeline: &Pipeline) -> Result<Value, TemplateError> {
        let mut piped = None;
        for command in &pipeline.commands {
            piped = Some(self.command(command, piped)?);
        }
        Ok(piped.unwrap_or(Value::Null))
    }

    fn command(&self, command: &Command, piped: Option<Value>) -> Result<Value, TemplateError> {
        let (first, rest) = match command.operands.split_first() {
            Some(split) => split,
            None => return Ok(Value::Null),
        };

        let mut args = rest
            .iter()
            .map(|operand| self.operand(operand))
            .collect::<Result<Vec<_>, _>>()?;
        args.extend(piped);

        match first {
            Operand::Func(name) => self.funcs.call(name, &args),
            _ if !args.is_empty() => Err(TemplateError::ArgumentToNonFunction),
            operand => self.operand(operand),
        }
    }

    fn operand(&self, operand: &Operand) -> Result<Value, TemplateError> {
        match operand {
            Operand::Literal(value) => Ok(value.clone()),
            Operand::Dot => Ok(Value::Null),
            Operand::Func(name) => self.funcs.call(name, &[]),
            Operand::Pipeline(pipeline) => self.pipeline(pipeline),
        }
    }
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::String(s) => out.push_str(s),
        Value::Null => out.push_str("<no value>"),
        other => out.push_str(&other.to_string()),
    }
}

impl Executor for Template {
    fn execute(&self, name: &str, value: Node) -> Result<Node, ExecError> {
        let source = match value {
            Node::String(s) if s.contains("{{") => s,
            other => return Ok(other),
        };

        let rendered = self.render(&source).map_err(|e| {
            tracing::debug!(event = "config.template.failed", name, error = %e);
            e
        })?;

        match serde_json::from_str::<Value>(&rendered) {
            Ok(parsed) => Ok(parsed.into()),
            Err(_) => Ok(Node::String(rendered)),
        }
    }
}
