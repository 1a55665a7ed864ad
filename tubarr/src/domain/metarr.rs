//! Post-processor parameter record.
//!
//! Same optional-field + merge pattern as [`ChannelSettings`]: per-URL
//! overrides win field-wise, unknown keys are preserved.
//!
//! [`ChannelSettings`]: super::settings::ChannelSettings

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A `from -> to` filename text replacement applied by the post-processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplacePair {
    pub from: String,
    pub to: String,
}

/// Parameters handed to the external post-processor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetarrArgs {
    /// Rename style directive (e.g. `spaces`, `underscores`, `fixes-only`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rename_style: Option<String>,
    /// Target container extension for transcodes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_ext: Option<String>,
    /// Filename text replacements.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename_replace: Option<Vec<ReplacePair>>,
    /// Metadata field operations, passed through verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta_ops: Option<Vec<String>>,
    /// Date-tag format prepended/appended to filenames.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename_date_tag: Option<String>,
    /// Final output directory (move-op matches take precedence).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    /// Post-processor worker count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<u32>,
    /// Minimum free memory literal the tool should keep available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_free_mem: Option<String>,
    /// Opaque extra arguments, passed through verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_args: Option<Vec<String>>,

    /// Unknown keys, preserved across read-modify-write cycles.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl MetarrArgs {
    /// Field-level merge; any field set on `other` replaces the base value.
    pub fn merged_with(&self, other: Option<&MetarrArgs>) -> MetarrArgs {
        let Some(other) = other else {
            return self.clone();
        };

        let mut merged = self.clone();
        if other.rename_style.is_some() {
            merged.rename_style = other.rename_style.clone();
        }
        if other.output_ext.is_some() {
            merged.output_ext = other.output_ext.clone();
        }
        if other.filename_replace.is_some() {
            merged.filename_replace = other.filename_replace.clone();
        }
        if other.meta_ops.is_some() {
            merged.meta_ops = other.meta_ops.clone();
        }
        if other.filename_date_tag.is_some() {
            merged.filename_date_tag = other.filename_date_tag.clone();
        }
        if other.output_dir.is_some() {
            merged.output_dir = other.output_dir.clone();
        }
        if other.concurrency.is_some() {
            merged.concurrency = other.concurrency;
        }
        if other.min_free_mem.is_some() {
            merged.min_free_mem = other.min_free_mem.clone();
        }
        if other.extra_args.is_some() {
            merged.extra_args = other.extra_args.clone();
        }
        for (key, value) in &other.extra {
            merged.extra.insert(key.clone(), value.clone());
        }
        merged
    }
}
