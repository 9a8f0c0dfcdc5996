//! Secret providers exposed to templates.
//!
//! Each provider resolves an identifier to a JSON record through a [`Lookup`]
//! and registers a `{provider}JSON` / `{provider}Format` pair of template
//! functions.

pub mod bitwarden;
pub mod lastpass;

use std::process::Command;

use thiserror::Error;
use tracing::{debug, trace};

use crate::template::FuncMap;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProviderError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} agent not active, run `{unlock}` and try again")]
    Locked { program: String, unlock: String },

    #[error("run {program} ({status}): {stderr}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("unmarshal {provider} entry: {source}")]
    Decode {
        provider: &'static str,
        source: serde_json::Error,
    },

    #[error("{provider} returned no entry for {id:?}")]
    EmptyRecord { provider: &'static str, id: String },
}

/// Resolves a secret identifier to the provider's raw record.
pub trait Lookup: Send + Sync {
    fn lookup(&self, id: &str) -> Result<Vec<u8>, ProviderError>;
}

impl<F> Lookup for F
where
    F: Fn(&str) -> Result<Vec<u8>, ProviderError> + Send + Sync,
{
    fn lookup(&self, id: &str) -> Result<Vec<u8>, ProviderError> {
        self(id)
    }
}

/// A [`Lookup`] that runs a fixed helper program and captures its stdout.
///
/// `{id}` in the argument list is replaced by the identifier being looked up.
/// When the program fails and its stderr contains `locked_marker`
/// (case-insensitively) the failure is reported as [`ProviderError::Locked`].
#[derive(Debug, Clone)]
pub struct CommandLookup {
    provider: &'static str,
    program: String,
    args: Vec<String>,
    locked_marker: String,
    unlock: String,
}

impl CommandLookup {
    pub fn new(provider: &'static str, program: impl Into<String>) -> Self {
        Self {
            provider,
            program: program.into(),
            args: vec!["{id}".to_string()],
            locked_marker: String::new(),
            unlock: String::new(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn locked_when(mut self, marker: impl Into<String>, unlock: impl Into<String>) -> Self {
        self.locked_marker = marker.into().to_lowercase();
        self.unlock = unlock.into();
        self
    }
}

impl Lookup for CommandLookup {
    fn lookup(&self, id: &str) -> Result<Vec<u8>, ProviderError> {
        trace!(event = "config.provider.lookup", provider = self.provider, id);

        let args = self.args.iter().map(|arg| arg.replace("{id}", id));
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|source| ProviderError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!(
                event = "config.provider.lookup_failed",
                provider = self.provider,
                stderr = %stderr.trim()
            );
            if !self.locked_marker.is_empty()
                && stderr.to_lowercase().contains(&self.locked_marker)
            {
                return Err(ProviderError::Locked {
                    program: self.program.clone(),
                    unlock: self.unlock.clone(),
                });
            }
            return Err(ProviderError::Failed {
                program: self.program.clone(),
                status: output.status,
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(output.stdout)
    }
}

/// Function table with every provider registered against its default helper
/// program.
pub fn default_funcs() -> FuncMap {
    let mut funcs = FuncMap::new();
    bitwarden::Client::new().add_funcs(&mut funcs);
    lastpass::Client::new().add_funcs(&mut funcs);
    funcs
}

/// Formats `args` into `format` positionally, in the manner of Go's
/// `fmt.Sprintf` restricted to string operands.
///
/// Supports `%s`, `%v`, `%q` and `%%`. A `None` argument stands for a field
/// the record does not have.
pub fn sprintf(format: &str, args: &[Option<&str>]) -> String {
    let mut out = String::with_capacity(format.len());
    let mut next = 0;
    let mut chars = format.chars();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let Some(verb) = chars.next() else {
            out.push_str("%!(NOVERB)");
            break;
        };
        if verb == '%' {
            out.push('%');
            continue;
        }

        match args.get(next) {
            None => out.push_str(&format!("%!{verb}(MISSING)")),
            Some(arg) => match (verb, arg) {
                ('s' | 'v', Some(s)) => out.push_str(s),
                ('q', Some(s)) => out.push_str(&format!("{s:?}")),
                ('v', None) => out.push_str("<nil>"),
                (verb, None) => out.push_str(&format!("%!{verb}(<nil>)")),
                (verb, Some(s)) => out.push_str(&format!("%!{verb}(string={s})")),
            },
        }
        next += 1;
    }

    if next < args.len() {
        let extra: Vec<String> = args[next..]
            .iter()
            .map(|arg| match arg {
                Some(s) => format!("string={s}"),
                None => "<nil>".to_string(),
            })
            .collect();
        out.push_str(&format!("%!(EXTRA {})", extra.join(", ")));
    }
    out
}
