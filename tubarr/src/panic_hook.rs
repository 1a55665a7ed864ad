//! Panic reporting that survives `panic = "abort"` builds.
//!
//! Panics are logged through `tracing` like everything else, but the
//! non-blocking file writer may not flush before an aborting process dies,
//! so a record is also appended synchronously to the current daily log file.

use std::backtrace::Backtrace;
use std::fs::OpenOptions;
use std::io::Write;
use std::panic::PanicHookInfo;
use std::path::{Path, PathBuf};

use chrono::Local;

/// Install the global panic hook, chaining the previously installed one.
pub fn install(log_dir: impl AsRef<Path>) {
    let log_dir = log_dir.as_ref().to_path_buf();
    let previous = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |info: &PanicHookInfo<'_>| {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            report(&log_dir, info);
        }));
        previous(info);
    }));
}

fn report(log_dir: &Path, info: &PanicHookInfo<'_>) {
    let location = info
        .location()
        .map(|loc| loc.to_string())
        .unwrap_or_else(|| "<unknown>".to_string());
    let thread = std::thread::current()
        .name()
        .unwrap_or("<unnamed>")
        .to_string();
    let record = format!(
        "{} PANIC thread={thread} location={location} payload={}\nBacktrace:\n{}",
        Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"),
        payload_text(info),
        Backtrace::force_capture(),
    );

    tracing::error!(target: "tubarr::panic", "{record}");

    if cfg!(panic = "abort")
        && let Err(e) = append_to_daily_log(log_dir, &record)
    {
        eprintln!("failed to append panic record: {e}");
    }
}

fn append_to_daily_log(log_dir: &Path, record: &str) -> std::io::Result<()> {
    // Matches the naming of `tracing_appender::rolling::daily`.
    let path: PathBuf = log_dir.join(format!("tubarr.log.{}", Local::now().format("%Y-%m-%d")));
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{record}")?;
    file.flush()
}

fn payload_text(info: &PanicHookInfo<'_>) -> String {
    if let Some(s) = info.payload().downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = info.payload().downcast_ref::<String>() {
        s.clone()
    } else {
        info.to_string()
    }
}
