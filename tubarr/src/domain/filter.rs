//! Filter and move-op rule types evaluated against video metadata.

use serde::{Deserialize, Serialize};

/// Match operator of a filter rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    /// Rule matches when the field contains the value (case-insensitive).
    Contains,
    /// Rule matches when the field does not contain the value.
    Omit,
}

/// Combination mode of a filter rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// Every `must` rule has to match.
    Must,
    /// At least one `any` rule has to match, if any exist.
    #[default]
    Any,
}

/// One inclusion rule: `field : op : value [: mode]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRule {
    pub field: String,
    pub op: FilterOp,
    pub value: String,
    #[serde(default)]
    pub mode: FilterMode,
}

impl FilterRule {
    pub fn new(
        field: impl Into<String>,
        op: FilterOp,
        value: impl Into<String>,
        mode: FilterMode,
    ) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
            mode,
        }
    }
}

/// Post-processor routing rule: videos whose `field` contains `value` are
/// moved to `output_dir`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveOp {
    pub field: String,
    pub value: String,
    pub output_dir: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_defaults_to_any_when_absent() {
        let rule: FilterRule =
            serde_json::from_str(r#"{"field":"title","op":"omit","value":"frogs"}"#).unwrap();
        assert_eq!(rule.mode, FilterMode::Any);
    }

    #[test]
    fn rule_round_trips() {
        let rule = FilterRule::new("title", FilterOp::Contains, "cats", FilterMode::Must);
        let json = serde_json::to_string(&rule).unwrap();
        let back: FilterRule = serde_json::from_str(&json).unwrap();
        assert_eq!(rule, back);
    }
}
