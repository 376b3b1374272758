//! Progress reporting for analysis batches.
//!
//! Interactive callers can use `IndicatifReporter` for a terminal progress
//! bar. Library callers use `NoopReporter` or provide their own.

use indicatif::{ProgressBar, ProgressStyle};

/// Receives progress of the extract and resolve stages.
pub trait ProgressReporter: Send + Sync {
    /// Begin a stage with an optional total count.
    fn start(&self, stage: &str, total: Option<u64>);

    /// Advance the current stage by the given amount.
    fn advance(&self, amount: u64);

    /// Mark the current stage as finished.
    fn finish(&self);

    /// Display an informational message.
    fn message(&self, msg: &str);
}

#[derive(Debug, Default)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn start(&self, _stage: &str, _total: Option<u64>) {}
    fn advance(&self, _amount: u64) {}
    fn finish(&self) {}
    fn message(&self, _msg: &str) {}
}

const BAR_TEMPLATE: &str = "{spinner:.green} {msg} [{bar:30.cyan/blue}] {pos}/{len} ({eta})";
const SPINNER_TEMPLATE: &str = "{spinner:.green} {msg} {pos} files";

/// Reporter backed by an `indicatif` progress bar.
#[derive(Debug)]
pub struct IndicatifReporter {
    bar: ProgressBar,
}

impl Default for IndicatifReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl IndicatifReporter {
    /// A reporter drawing to stderr.
    pub fn new() -> Self {
        Self::with_bar(ProgressBar::new(0))
    }

    /// A reporter that tracks progress without drawing anything.
    pub fn hidden() -> Self {
        Self::with_bar(ProgressBar::hidden())
    }

    fn with_bar(bar: ProgressBar) -> Self {
        Self { bar }
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }
}

impl ProgressReporter for IndicatifReporter {
    fn start(&self, stage: &str, total: Option<u64>) {
        let template = if total.is_some() {
            BAR_TEMPLATE
        } else {
            SPINNER_TEMPLATE
        };
        if let Ok(style) = ProgressStyle::with_template(template) {
            self.bar.set_style(style.progress_chars("=> "));
        }
        self.bar.set_length(total.unwrap_or(0));
        self.bar.set_message(stage.to_string());
        self.bar.reset();
    }

    fn advance(&self, amount: u64) {
        self.bar.inc(amount);
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }

    fn message(&self, msg: &str) {
        self.bar.println(msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_reporter_is_silent() {
        let reporter = NoopReporter;
        reporter.start("extracting", Some(100));
        reporter.advance(50);
        reporter.message("hello");
        reporter.finish();
    }

    #[test]
    fn indicatif_reporter_counts_per_stage() {
        let reporter = IndicatifReporter::hidden();
        reporter.start("extracting", Some(10));
        reporter.advance(4);
        reporter.advance(5);
        assert_eq!(reporter.position(), 9);
        reporter.start("resolving", None);
        assert_eq!(reporter.position(), 0);
        reporter.finish();
    }
}
