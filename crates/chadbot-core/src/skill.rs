//! Skill declarations.
//!
//! A skill is a named, typed capability a plugin exposes. The broker keeps
//! skill names globally unique and presents every registered skill to the
//! LLM as a callable tool.

use serde::{Deserialize, Serialize};

/// Parameter type tag for a skill parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    String,
    Number,
    Boolean,
}

impl ParamKind {
    /// The JSON-schema type name used in tool descriptors.
    pub fn json_type(self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Number => "number",
            ParamKind::Boolean => "boolean",
        }
    }
}

/// One declared parameter of a skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillParameter {
    pub name: String,
    pub kind: ParamKind,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

/// A plugin-declared skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skill {
    /// Globally unique name.
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<SkillParameter>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&ParamKind::Number).unwrap(), "\"number\"");
        let kind: ParamKind = serde_json::from_str("\"boolean\"").unwrap();
        assert_eq!(kind, ParamKind::Boolean);
    }
}
