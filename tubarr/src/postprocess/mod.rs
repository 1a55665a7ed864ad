//! External post-processor contract and its Metarr-compatible implementation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::command::{CommandRunner, CommandSpec, LineSink, discard_sink};
use crate::domain::{MetarrArgs, MoveOp, Video};
use crate::{Error, Result};

/// The external file post-processor.
///
/// Receives the downloaded video, its metadata sidecar, and the channel's
/// rename/transcode/move directives; returns the final artefact path.
#[async_trait]
pub trait PostProcessor: Send + Sync {
    async fn run(
        &self,
        cancel: &CancellationToken,
        video: &Video,
        metarr: &MetarrArgs,
        move_ops: &[MoveOp],
    ) -> Result<PathBuf>;
}

/// First-match move-op evaluation against the video metadata.
///
/// Falls back to `default_dir` (the metarr output dir) and finally to the
/// directory the video already lives in.
pub fn resolve_output_dir(
    metadata: Option<&serde_json::Value>,
    move_ops: &[MoveOp],
    default_dir: Option<&Path>,
    video_path: &Path,
) -> PathBuf {
    if let Some(metadata) = metadata {
        for op in move_ops {
            let field_value = metadata
                .get(&op.field)
                .and_then(serde_json::Value::as_str)
                .unwrap_or("");
            if field_value.to_lowercase().contains(&op.value.to_lowercase()) {
                return PathBuf::from(&op.output_dir);
            }
        }
    }
    if let Some(dir) = default_dir {
        return dir.to_path_buf();
    }
    video_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Metarr-backed [`PostProcessor`].
pub struct MetarrPostProcessor {
    runner: CommandRunner,
    program: PathBuf,
}

impl MetarrPostProcessor {
    pub fn new(runner: CommandRunner, program: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            program: program.into(),
        }
    }
}

/// Argument vector for one post-processor invocation.
pub(crate) fn build_args(
    video_path: &Path,
    json_path: Option<&Path>,
    metarr: &MetarrArgs,
    output_dir: &Path,
) -> Vec<String> {
    let mut args = vec![
        "--video-file".to_string(),
        video_path.display().to_string(),
    ];
    if let Some(json) = json_path {
        args.push("--json-file".to_string());
        args.push(json.display().to_string());
    }
    args.push("--output-dir".to_string());
    args.push(output_dir.display().to_string());

    if let Some(style) = &metarr.rename_style {
        args.push("--rename-style".to_string());
        args.push(style.clone());
    }
    if let Some(ext) = &metarr.output_ext {
        args.push("--ext".to_string());
        args.push(ext.clone());
    }
    if let Some(pairs) = &metarr.filename_replace {
        for pair in pairs {
            args.push("--filename-replace".to_string());
            args.push(format!("{}:{}", pair.from, pair.to));
        }
    }
    if let Some(ops) = &metarr.meta_ops {
        for op in ops {
            args.push("--meta-ops".to_string());
            args.push(op.clone());
        }
    }
    if let Some(tag) = &metarr.filename_date_tag {
        args.push("--filename-date-tag".to_string());
        args.push(tag.clone());
    }
    if let Some(concurrency) = metarr.concurrency {
        args.push("--concurrency".to_string());
        args.push(concurrency.to_string());
    }
    if let Some(min_free_mem) = &metarr.min_free_mem {
        args.push("--min-free-mem".to_string());
        args.push(min_free_mem.clone());
    }
    if let Some(extra) = &metarr.extra_args {
        args.extend(extra.iter().cloned());
    }
    args
}

/// Expected final artefact path after the tool moves/transcodes the file.
pub(crate) fn final_path(video_path: &Path, metarr: &MetarrArgs, output_dir: &Path) -> PathBuf {
    let stem = video_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string());
    let ext = metarr
        .output_ext
        .clone()
        .or_else(|| {
            video_path
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "mp4".to_string());
    output_dir.join(format!("{stem}.{ext}"))
}

#[async_trait]
impl PostProcessor for MetarrPostProcessor {
    async fn run(
        &self,
        cancel: &CancellationToken,
        video: &Video,
        metarr: &MetarrArgs,
        move_ops: &[MoveOp],
    ) -> Result<PathBuf> {
        let video_path = video
            .video_path
            .as_deref()
            .ok_or_else(|| Error::fatal("post-processing a video with no downloaded file"))?;
        let output_dir = resolve_output_dir(
            video.metadata.as_ref(),
            move_ops,
            metarr.output_dir.as_deref(),
            video_path,
        );

        let spec = CommandSpec::new(&self.program).args(build_args(
            video_path,
            video.json_path.as_deref(),
            metarr,
            &output_dir,
        ));

        let stderr = Arc::new(Mutex::new(Vec::new()));
        let collected = stderr.clone();
        let stderr_sink: LineSink = Box::new(move |line: &str| {
            collected
                .lock()
                .expect("sink poisoned")
                .push(line.to_string());
        });

        let outcome = self
            .runner
            .run(cancel, spec, discard_sink(), stderr_sink)
            .await?;
        if !outcome.success() {
            // Non-zero post-processing counts against the retry budget.
            return Err(Error::transient(format!(
                "post-processor exited with {:?}: {}",
                outcome.exit_code,
                outcome.stderr_tail.lines().last().unwrap_or("no output")
            )));
        }

        let final_artefact = final_path(video_path, metarr, &output_dir);
        debug!(
            video = %video.url,
            path = %final_artefact.display(),
            "Post-processing finished"
        );
        Ok(final_artefact)
    }
}
