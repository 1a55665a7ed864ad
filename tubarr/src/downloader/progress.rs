//! Progress-line parsing and throttled progress reporting.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use regex::Regex;
use std::sync::LazyLock;

/// Minimum gap between delivered progress updates per video.
pub const PROGRESS_UPDATE_INTERVAL: Duration = Duration::from_millis(500);

static PROGRESS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[download\]\s+(\d{1,3}(?:\.\d+)?)%").expect("static regex")
});

/// Parse the external tool's documented `[download]  42.0%` progress lines.
pub fn parse_progress_line(line: &str) -> Option<f32> {
    let captures = PROGRESS_LINE.captures(line)?;
    let pct: f32 = captures[1].parse().ok()?;
    (0.0..=100.0).contains(&pct).then_some(pct)
}

struct Inner {
    callback: Box<dyn Fn(f32) + Send + Sync>,
    last_delivery: Mutex<Option<Instant>>,
    min_interval: Duration,
}

/// Delivers progress percentages to a callback, throttled so status updates
/// land at most once per interval. Terminal `100.0` always passes through.
#[derive(Clone)]
pub struct ProgressReporter {
    inner: Arc<Inner>,
}

impl ProgressReporter {
    pub fn new(callback: impl Fn(f32) + Send + Sync + 'static) -> Self {
        Self::with_interval(callback, PROGRESS_UPDATE_INTERVAL)
    }

    pub fn with_interval(
        callback: impl Fn(f32) + Send + Sync + 'static,
        min_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                callback: Box::new(callback),
                last_delivery: Mutex::new(None),
                min_interval,
            }),
        }
    }

    /// A reporter that drops every update.
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    /// Report a progress percentage, subject to throttling.
    pub fn report(&self, pct: f32) {
        let now = Instant::now();
        {
            let mut last = self.inner.last_delivery.lock();
            let throttled = last
                .map(|at| now.duration_since(at) < self.inner.min_interval)
                .unwrap_or(false);
            if throttled && pct < 100.0 {
                return;
            }
            *last = Some(now);
        }
        (self.inner.callback)(pct);
    }

    /// Feed a raw output line; recognized progress lines are reported.
    pub fn observe_line(&self, line: &str) {
        if let Some(pct) = parse_progress_line(line) {
            self.report(pct);
        }
    }
}
