//! Bitwarden records through the `rbw` CLI.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{sprintf, CommandLookup, Lookup, ProviderError};
use crate::template::{str_arg, str_args, FuncMap};

const PROVIDER: &str = "bitwarden";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Entry {
    pub id: String,
    pub name: String,
    pub folder: Option<String>,
    pub notes: Option<String>,
    pub data: Data,
    pub fields: Vec<Field>,
    pub history: Vec<History>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Data {
    pub username: Option<String>,
    pub password: Option<String>,
    pub totp: Option<String>,
    pub uris: Vec<Uri>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Uri {
    pub uri: String,
    pub match_type: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Field {
    pub name: String,
    pub value: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct History {
    pub last_used_date: String,
    pub password: String,
}

impl Entry {
    /// Looks up a top-level field by its record name.
    ///
    /// A known field the record leaves null reads as empty; only an unknown
    /// name is `None`.
    pub fn field(&self, name: &str) -> Option<&str> {
        let value = match name {
            "id" => Some(self.id.as_str()),
            "name" => Some(self.name.as_str()),
            "folder" => self.folder.as_deref(),
            "notes" => self.notes.as_deref(),
            "username" => self.data.username.as_deref(),
            "password" => self.data.password.as_deref(),
            "totp" => self.data.totp.as_deref(),
            _ => return None,
        };
        Some(value.unwrap_or_default())
    }

    /// Returns the value of the custom field called `name`.
    pub fn custom_field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|field| field.name == name)
            .and_then(|field| field.value.as_deref())
    }

    /// Interpolates the named fields into `format`, in order.
    pub fn format(&self, format: &str, names: &[&str]) -> String {
        let args: Vec<Option<&str>> = names.iter().map(|name| self.field(name)).collect();
        sprintf(format, &args)
    }
}

/// Template functions backed by a Bitwarden [`Lookup`].
#[derive(Clone)]
pub struct Client {
    lookup: Arc<dyn Lookup>,
}

impl Client {
    /// A client that runs `rbw get <id> --raw`.
    pub fn new() -> Self {
        Self::with_lookup(
            CommandLookup::new(PROVIDER, "rbw")
                .args(["get", "{id}", "--raw"])
                .locked_when("failed to read password from pinentry", "rbw unlock"),
        )
    }

    pub fn with_lookup(lookup: impl Lookup + 'static) -> Self {
        Self {
            lookup: Arc::new(lookup),
        }
    }

    /// Registers `bitwardenJSON`, `bitwardenFormat` and `bitwardenField`.
    pub fn add_funcs(&self, funcs: &mut FuncMap) {
        let client = self.clone();
        funcs.insert("bitwardenJSON", move |args: &[Value]| {
            Ok(Value::String(client.json(str_arg(args, 0)?)?))
        });

        let client = self.clone();
        funcs.insert("bitwardenFormat", move |args: &[Value]| {
            let id = str_arg(args, 0)?;
            let format = str_arg(args, 1)?;
            let names = str_args(args, 2)?;
            Ok(Value::String(client.format(id, format, &names)?))
        });

        let client = self.clone();
        funcs.insert("bitwardenField", move |args: &[Value]| {
            let id = str_arg(args, 0)?;
            let name = str_arg(args, 1)?;
            Ok(Value::String(client.custom_field(id, name)?))
        });
    }

    /// The raw record for `id`.
    pub fn json(&self, id: &str) -> Result<String, ProviderError> {
        let data = self.lookup.lookup(id)?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    pub fn format(&self, id: &str, format: &str, names: &[&str]) -> Result<String, ProviderError> {
        Ok(self.entry(id)?.format(format, names))
    }

    /// The custom field `name` of `id`, or an empty string if it has none.
    pub fn custom_field(&self, id: &str, name: &str) -> Result<String, ProviderError> {
        let entry = self.entry(id)?;
        Ok(entry.custom_field(name).unwrap_or_default().to_string())
    }

    pub fn entry(&self, id: &str) -> Result<Entry, ProviderError> {
        let data = self.lookup.lookup(id)?;
        serde_json::from_slice(&data).map_err(|source| ProviderError::Decode {
            provider: PROVIDER,
            source,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::Template;

    const SIMPLE: &str = r#"{
  "id": "d7213953-c6bf-468a-b220-b32c00fc75a0",
  "name": "example.org",
  "data": {
    "username": "user",
    "password": "pass"
  },
  "notes": "These are some notes"
}"#;

    const FULL: &str = r#"{
  "id": "d7213953-c6bf-468a-b220-b32c00fc75a0",
  "folder": "folder",
  "name": "example.org",
  "data": {
    "username": "user",
    "password": "newpwd",
    "totp": null,
    "uris": [
      {"uri": "https://info.example.org/home/", "match_type": null},
      {"uri": "https://example-identity.okta.com/login", "match_type": null}
    ]
  },
  "fields": [
    {"name": "FooField", "value": "FooValue", "type": "text"},
    {"name": "BarField", "value": "BarValue", "type": "text"}
  ],
  "notes": "These are some notes",
  "history": [
    {"last_used_date": "2025-08-01T17:07:43.855Z", "password": "midpwd"},
    {"last_used_date": "2025-08-01T17:07:23.424Z", "password": "origpwd"}
  ]
}"#;

    fn client(record: &'static str) -> Client {
        Client::with_lookup(move |_: &str| -> Result<Vec<u8>, ProviderError> {
            Ok(record.as_bytes().to_vec())
        })
    }

    #[test]
    fn test_format_simple() {
        let entry: Entry = serde_json::from_str(SIMPLE).unwrap();
        assert_eq!(entry.format("%s/%s", &["username", "password"]), "user/pass");
    }

    #[test]
    fn test_format_null_fields_are_empty() {
        let entry: Entry = serde_json::from_str(
            r#"{"id":"x","name":"n","folder":null,"notes":null,"data":{"username":"u","password":null}}"#,
        )
        .unwrap();

        assert_eq!(
            entry.format("%s|%s|%s|%s", &["username", "notes", "folder", "password"]),
            "u|||"
        );
        assert_eq!(entry.format("%s|%s", &["username", "nosuch"]), "u|%!s(<nil>)");
    }

    #[test]
    fn test_format_full_record() {
        let entry: Entry = serde_json::from_str(FULL).unwrap();

        assert_eq!(
            entry.format("%s %s in %s", &["name", "password", "folder"]),
            "example.org newpwd in folder"
        );
        assert_eq!(entry.data.uris.len(), 2);
        assert_eq!(entry.history[1].password, "origpwd");
    }

    #[test]
    fn test_custom_field() {
        let c = client(FULL);

        assert_eq!(c.custom_field("example.org", "BarField").unwrap(), "BarValue");
        assert_eq!(c.custom_field("example.org", "Missing").unwrap(), "");
    }

    #[test]
    fn test_template_functions() {
        let mut funcs = FuncMap::new();
        client(SIMPLE).add_funcs(&mut funcs);
        let template = Template::new(funcs);

        assert_eq!(
            template
                .render(r#"{{ bitwardenFormat "example.org" "%s:%s" "username" "password" }}"#)
                .unwrap(),
            "user:pass"
        );
        assert_eq!(
            template.render(r#"{{ bitwardenJSON "example.org" }}"#).unwrap(),
            SIMPLE
        );
    }

    #[test]
    fn test_lookup_error_propagates() {
        let c = Client::with_lookup(|_: &str| -> Result<Vec<u8>, ProviderError> {
            Err(ProviderError::Locked {
                program: "rbw".into(),
                unlock: "rbw unlock".into(),
            })
        });

        let err = c.format("x", "%s", &["password"]).unwrap_err();

        assert_eq!(
            err.to_string(),
            "rbw agent not active, run `rbw unlock` and try again"
        );
    }

    #[test]
    fn test_bad_record_is_decode_error() {
        let c = client("not json");
        assert!(matches!(c.entry("x"), Err(ProviderError::Decode { .. })));
    }
}
