//! Execution-time logging around a call.

use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::config::InstrumentSettings;

/// How slow a call was relative to the configured thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slowness {
    Fast,
    Notice,
    Slow,
}

/// Times a call and logs it when it is slow or fails.
///
/// - elapsed > notice threshold: `info`
/// - elapsed > warn threshold: `warn`
/// - `Err`: `error` with the elapsed time; the error itself is returned as is
#[derive(Debug, Clone)]
pub struct Instrument {
    name: String,
    notice_threshold: Duration,
    warn_threshold: Duration,
}

/// Instrument a call named `name` with the default thresholds.
pub fn instrument(name: impl Into<String>) -> Instrument {
    Instrument::new(name, &InstrumentSettings::default())
}

impl Instrument {
    pub fn new(name: impl Into<String>, settings: &InstrumentSettings) -> Self {
        Self {
            name: name.into(),
            notice_threshold: settings.notice_threshold,
            warn_threshold: settings.warn_threshold,
        }
    }

    pub fn with_thresholds(mut self, notice: Duration, warn: Duration) -> Self {
        self.notice_threshold = notice;
        self.warn_threshold = warn;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn classify(&self, elapsed: Duration) -> Slowness {
        if elapsed > self.warn_threshold {
            Slowness::Slow
        } else if elapsed > self.notice_threshold {
            Slowness::Notice
        } else {
            Slowness::Fast
        }
    }

    pub fn run<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: Display,
        F: FnOnce() -> Result<T, E>,
    {
        let started = Instant::now();
        let outcome = f();
        self.report(&outcome, started.elapsed());
        outcome
    }

    pub async fn run_async<T, E, Fut>(&self, fut: Fut) -> Result<T, E>
    where
        E: Display,
        Fut: Future<Output = Result<T, E>>,
    {
        let started = Instant::now();
        let outcome = fut.await;
        self.report(&outcome, started.elapsed());
        outcome
    }

    fn report<T, E: Display>(&self, outcome: &Result<T, E>, elapsed: Duration) {
        let elapsed_ms = elapsed.as_millis() as u64;
        if let Err(e) = outcome {
            error!(function = %self.name, elapsed_ms, error = %e, "call failed");
            return;
        }
        match self.classify(elapsed) {
            Slowness::Slow => warn!(function = %self.name, elapsed_ms, "slow call"),
            Slowness::Notice => info!(function = %self.name, elapsed_ms, "call took a while"),
            Slowness::Fast => {}
        }
    }
}
