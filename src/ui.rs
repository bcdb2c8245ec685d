use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::str::FromStr;
use std::time::{Duration, Instant};

use crate::capture::{CaptureHandle, DeviceCandidate, FormatHint, ProbeObserver, Resolution};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UiMode {
    #[default]
    Auto,
    Plain,
    Pretty,
}

impl FromStr for UiMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(UiMode::Auto),
            "plain" => Ok(UiMode::Plain),
            "pretty" => Ok(UiMode::Pretty),
            other => Err(format!("unknown ui mode '{}', expected auto, plain or pretty", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
    disable_pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool, disable_pretty: bool) -> Self {
        Self {
            mode,
            is_tty,
            disable_pretty,
        }
    }

    fn use_pretty(&self) -> bool {
        self.is_tty
            && match self.mode {
                UiMode::Pretty => true,
                UiMode::Auto => !self.disable_pretty,
                UiMode::Plain => false,
            }
    }

    /// Probe progress reporter: a spinner on a TTY, plain stderr lines otherwise.
    pub fn probe_reporter(&self) -> ProbeReporter {
        let spinner = if self.use_pretty() {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message("probing camera…");
            Some(spinner)
        } else {
            eprintln!("==> probing camera");
            None
        };
        ProbeReporter {
            start: Instant::now(),
            spinner,
            attempts: 0,
        }
    }
}

pub struct ProbeReporter {
    start: Instant,
    spinner: Option<ProgressBar>,
    attempts: usize,
}

impl ProbeReporter {
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    fn finish(&mut self, message: String) {
        match self.spinner.take() {
            Some(spinner) => spinner.finish_with_message(message),
            None => eprintln!("{message}"),
        }
    }
}

impl ProbeObserver for ProbeReporter {
    fn on_attempt(&mut self, candidate: &DeviceCandidate, resolution: Resolution, format: FormatHint) {
        self.attempts += 1;
        let message = format!(
            "probing camera {} ({}) {} {}…",
            candidate.index, candidate.backend, resolution, format
        );
        match &self.spinner {
            Some(spinner) => spinner.set_message(message),
            None => eprintln!("    {message}"),
        }
    }

    fn on_accepted(&mut self, handle: &CaptureHandle) {
        let message = format!(
            "✔ camera ready: {} ({})",
            handle.describe(),
            format_duration(self.start.elapsed())
        );
        self.finish(message);
    }

    fn on_exhausted(&mut self, attempts: usize) {
        let message = format!(
            "✘ no camera passed the liveness check ({} configurations, {})",
            attempts,
            format_duration(self.start.elapsed())
        );
        self.finish(message);
    }
}

impl Drop for ProbeReporter {
    fn drop(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::BackendHint;

    #[test]
    fn plain_reporter_counts_attempts() {
        let ui = Ui::new(UiMode::Plain, true, false);
        let mut reporter = ui.probe_reporter();
        let candidate = DeviceCandidate::new(0, BackendHint::Synthetic);
        reporter.on_attempt(&candidate, Resolution::new(640, 480), FormatHint::Unset);
        reporter.on_attempt(&candidate, Resolution::new(1280, 720), FormatHint::Unset);
        reporter.on_exhausted(2);
        assert_eq!(reporter.attempts(), 2);
    }

    #[test]
    fn pretty_requires_a_tty() {
        assert!(!Ui::new(UiMode::Pretty, false, false).use_pretty());
        assert!(Ui::new(UiMode::Auto, true, false).use_pretty());
        assert!(!Ui::new(UiMode::Auto, true, true).use_pretty());
    }

    #[test]
    fn durations_format_compactly() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }
}
