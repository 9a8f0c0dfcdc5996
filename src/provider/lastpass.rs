//! LastPass records through the `lpass` CLI.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{sprintf, CommandLookup, Lookup, ProviderError};
use crate::template::{str_arg, str_args, FuncMap};

const PROVIDER: &str = "lastpass";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Entry {
    pub fullname: String,
    pub group: String,
    pub id: String,
    pub last_modified_gmt: String,
    pub last_touch: String,
    pub name: String,
    pub note: String,
    pub password: String,
    pub share: String,
    pub url: String,
    pub username: String,
}

impl Entry {
    pub fn field(&self, name: &str) -> Option<&str> {
        let value = match name {
            "fullname" => &self.fullname,
            "group" => &self.group,
            "id" => &self.id,
            "last_modified_gmt" => &self.last_modified_gmt,
            "last_touch" => &self.last_touch,
            "name" => &self.name,
            "note" => &self.note,
            "password" => &self.password,
            "share" => &self.share,
            "url" => &self.url,
            "username" => &self.username,
            _ => return None,
        };
        Some(value.as_str())
    }

    pub fn format(&self, format: &str, names: &[&str]) -> String {
        let args: Vec<Option<&str>> = names.iter().map(|name| self.field(name)).collect();
        sprintf(format, &args)
    }
}

/// Template functions backed by a LastPass [`Lookup`].
#[derive(Clone)]
pub struct Client {
    lookup: Arc<dyn Lookup>,
}

impl Client {
    /// A client that runs `lpass show <id> --json`.
    pub fn new() -> Self {
        Self::with_lookup(
            CommandLookup::new(PROVIDER, "lpass")
                .args(["show", "{id}", "--json"])
                .locked_when("could not find decryption key", "lpass login"),
        )
    }

    pub fn with_lookup(lookup: impl Lookup + 'static) -> Self {
        Self {
            lookup: Arc::new(lookup),
        }
    }

    /// Registers `lastpassJSON` and `lastpassFormat`.
    pub fn add_funcs(&self, funcs: &mut FuncMap) {
        let client = self.clone();
        funcs.insert("lastpassJSON", move |args: &[Value]| {
            Ok(Value::String(client.json(str_arg(args, 0)?)?))
        });

        let client = self.clone();
        funcs.insert("lastpassFormat", move |args: &[Value]| {
            let id = str_arg(args, 0)?;
            let format = str_arg(args, 1)?;
            let names = str_args(args, 2)?;
            Ok(Value::String(client.format(id, format, &names)?))
        });
    }

    pub fn json(&self, id: &str) -> Result<String, ProviderError> {
        let data = self.lookup.lookup(id)?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    pub fn format(&self, id: &str, format: &str, names: &[&str]) -> Result<String, ProviderError> {
        Ok(self.entry(id)?.format(format, names))
    }

    /// The first record `lpass` returns for `id`.
    pub fn entry(&self, id: &str) -> Result<Entry, ProviderError> {
        let data = self.lookup.lookup(id)?;
        let entries: Vec<Entry> =
            serde_json::from_slice(&data).map_err(|source| ProviderError::Decode {
                provider: PROVIDER,
                source,
            })?;
        entries
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::EmptyRecord {
                provider: PROVIDER,
                id: id.to_string(),
            })
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}
