//! Per-plugin configuration schema and the string coercion boundary.
//!
//! Plugins declare their config surface as a list of [`ConfigField`]s. The
//! store persists every value as a string; typed reads and writes go through
//! [`ConfigValue`], which is the only place coercion happens; everything
//! behind this boundary sees one flat `key → string` representation.
//!
//! Coercion rules:
//!
//! | Kind          | Stored form                     |
//! |---------------|---------------------------------|
//! | `bool`        | `"true"` / `"false"`            |
//! | `string`      | verbatim                        |
//! | `number`      | decimal string                  |
//! | `string_array`| JSON array string (`["a","b"]`) |

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Field type tag in a plugin's config schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigFieldKind {
    Bool,
    String,
    Number,
    StringArray,
}

/// One field in a plugin's declared config schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigField {
    pub key: String,
    pub label: String,
    #[serde(default)]
    pub description: String,
    pub kind: ConfigFieldKind,
    /// Seeded into the store when the key is absent. The empty string is a
    /// legitimate default.
    #[serde(default)]
    pub default_value: String,
}

/// A typed config value, converted to and from the stored string form.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Bool(bool),
    String(String),
    Number(f64),
    StringArray(Vec<String>),
}

/// Error coercing a stored string into a typed value.
#[derive(Debug, Clone, Error)]
#[error("invalid {kind:?} value for '{key}': {raw}")]
pub struct CoercionError {
    pub key: String,
    pub kind: ConfigFieldKind,
    pub raw: String,
}

impl ConfigValue {
    /// Serialises to the stored string form.
    pub fn encode(&self) -> String {
        match self {
            ConfigValue::Bool(b) => b.to_string(),
            ConfigValue::String(s) => s.clone(),
            ConfigValue::Number(n) => {
                // Integral values stringify without a trailing ".0" so that
                // round-trips through hand-edited files stay stable.
                if n.fract() == 0.0 && n.is_finite() {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            ConfigValue::StringArray(items) => {
                serde_json::to_string(items).unwrap_or_else(|_| "[]".into())
            }
        }
    }

    /// Parses the stored string form according to the declared kind.
    pub fn decode(key: &str, kind: ConfigFieldKind, raw: &str) -> Result<Self, CoercionError> {
        let err = || CoercionError {
            key: key.to_string(),
            kind,
            raw: raw.to_string(),
        };
        match kind {
            ConfigFieldKind::Bool => match raw {
                "true" => Ok(ConfigValue::Bool(true)),
                "false" | "" => Ok(ConfigValue::Bool(false)),
                _ => Err(err()),
            },
            ConfigFieldKind::String => Ok(ConfigValue::String(raw.to_string())),
            ConfigFieldKind::Number => {
                if raw.is_empty() {
                    return Ok(ConfigValue::Number(0.0));
                }
                raw.parse::<f64>().map(ConfigValue::Number).map_err(|_| err())
            }
            ConfigFieldKind::StringArray => {
                if raw.is_empty() {
                    return Ok(ConfigValue::StringArray(Vec::new()));
                }
                serde_json::from_str::<Vec<String>>(raw)
                    .map(ConfigValue::StringArray)
                    .map_err(|_| err())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_round_trip() {
        assert_eq!(ConfigValue::Bool(true).encode(), "true");
        assert_eq!(
            ConfigValue::decode("enabled", ConfigFieldKind::Bool, "true").unwrap(),
            ConfigValue::Bool(true)
        );
        assert_eq!(
            ConfigValue::decode("enabled", ConfigFieldKind::Bool, "").unwrap(),
            ConfigValue::Bool(false)
        );
        assert!(ConfigValue::decode("enabled", ConfigFieldKind::Bool, "yes").is_err());
    }

    #[test]
    fn number_round_trip() {
        assert_eq!(ConfigValue::Number(3.0).encode(), "3");
        assert_eq!(ConfigValue::Number(2.5).encode(), "2.5");
        assert_eq!(
            ConfigValue::decode("n", ConfigFieldKind::Number, "42").unwrap(),
            ConfigValue::Number(42.0)
        );
        assert!(ConfigValue::decode("n", ConfigFieldKind::Number, "nope").is_err());
    }

    #[test]
    fn string_array_round_trip() {
        let v = ConfigValue::StringArray(vec!["a".into(), "b".into()]);
        let raw = v.encode();
        assert_eq!(raw, r#"["a","b"]"#);
        assert_eq!(
            ConfigValue::decode("xs", ConfigFieldKind::StringArray, &raw).unwrap(),
            v
        );
        assert_eq!(
            ConfigValue::decode("xs", ConfigFieldKind::StringArray, "").unwrap(),
            ConfigValue::StringArray(Vec::new())
        );
    }
}
