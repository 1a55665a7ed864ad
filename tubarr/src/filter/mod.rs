//! Filter evaluation over fetched video metadata.
//!
//! Evaluation is a pure function: the same metadata and rules always produce
//! the same outcome. Rules split by mode — every `must` rule has to match,
//! and at least one `any` rule has to match when any exist. `omit` inverts
//! the match sense. After the rules, two always-applied gates run: the
//! upload-date window and the channel's ignore list.

use std::collections::HashSet;

use serde_json::Value;

use crate::domain::{FilterMode, FilterOp, FilterRule};
use crate::utils::url::normalize_for_dedup;

/// Outcome of evaluating a metadata record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOutcome {
    Accepted,
    RejectedByRule,
    OutsideDateWindow,
    Ignored,
}

impl FilterOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Evaluate the inclusion rules alone.
///
/// A record with no rules is always accepted. Missing fields read as empty
/// strings; `contains` is a case-insensitive substring match.
pub fn evaluate_rules(metadata: &Value, rules: &[FilterRule]) -> bool {
    if rules.is_empty() {
        return true;
    }

    let mut any_present = false;
    let mut any_matched = false;

    for rule in rules {
        let matched = rule_matches(metadata, rule);
        match rule.mode {
            FilterMode::Must => {
                if !matched {
                    return false;
                }
            }
            FilterMode::Any => {
                any_present = true;
                any_matched |= matched;
            }
        }
    }

    !any_present || any_matched
}

fn rule_matches(metadata: &Value, rule: &FilterRule) -> bool {
    let field_value = metadata
        .get(&rule.field)
        .and_then(Value::as_str)
        .unwrap_or("");
    let contains = field_value
        .to_lowercase()
        .contains(&rule.value.to_lowercase());
    match rule.op {
        FilterOp::Contains => contains,
        FilterOp::Omit => !contains,
    }
}

/// Full evaluation: rules, then the upload-date window, then the ignore
/// list safety net.
///
/// Dates are `YYYYMMDD` strings, which order correctly under lexicographic
/// comparison. Either bound of the window is optional. The ignore-list gate
/// is redundant with the crawl-time pre-filter but retained as a safety net.
pub fn evaluate(
    metadata: &Value,
    rules: &[FilterRule],
    from_date: Option<&str>,
    to_date: Option<&str>,
    ignore_list: &HashSet<String>,
    video_url: &str,
) -> FilterOutcome {
    if !evaluate_rules(metadata, rules) {
        return FilterOutcome::RejectedByRule;
    }

    if from_date.is_some() || to_date.is_some() {
        let upload_date = metadata
            .get("upload_date")
            .and_then(Value::as_str)
            .unwrap_or("");
        if let Some(from) = from_date
            && upload_date < from
        {
            return FilterOutcome::OutsideDateWindow;
        }
        if let Some(to) = to_date
            && upload_date > to
        {
            return FilterOutcome::OutsideDateWindow;
        }
    }

    let normalized = normalize_for_dedup(video_url);
    if ignore_list.contains(video_url) || ignore_list.contains(&normalized) {
        return FilterOutcome::Ignored;
    }

    FilterOutcome::Accepted
}
