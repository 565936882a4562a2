//! ---
//! vsl_section: "03-logging-metrics"
//! vsl_subsection: "module"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Structured logging adapters and sinks."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! Release-aware logging for the build pipeline, launcher and updater.
//!
//! Every event carries the same four fields (`product`, `version`,
//! `platform`, `stage`) so that one release can be followed from upload
//! through installation by filtering on them.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub mod macros;

#[doc(hidden)]
pub use tracing as __tracing;

/// Variable holding the filter for command line tools.
pub const FILTER_ENV: &str = "VESSEL_LOG";

/// Install a compact stderr subscriber for the command line tools.
///
/// Stdout stays free for command output. The filter comes from
/// `VESSEL_LOG` and defaults to `info`. Calling it twice is harmless.
pub fn init_cli() {
    let filter = EnvFilter::try_from_env(FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_target(false).with_writer(std::io::stderr))
        .try_init();
}

/// Release a log event refers to. Empty fields are logged as `""`.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Product identifier.
    pub product: Option<&'a str>,
    /// Release version.
    pub version: Option<&'a str>,
    /// Target platform (darwin, windows, linux).
    pub platform: Option<&'a str>,
    /// Pipeline or updater stage.
    pub stage: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Context with no release attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the product identifier.
    pub fn with_product(mut self, product: &'a str) -> Self {
        self.product = Some(product);
        self
    }

    /// Set the release version.
    pub fn with_version(mut self, version: &'a str) -> Self {
        self.version = Some(version);
        self
    }

    /// Set the target platform.
    pub fn with_platform(mut self, platform: &'a str) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Set the stage name. Replaces any stage already set.
    pub fn with_stage(mut self, stage: &'a str) -> Self {
        self.stage = Some(stage);
        self
    }
}

/// How a pipeline or updater stage ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// Finished; the run continues.
    Success,
    /// Aborted the run.
    Failed,
}

impl StageOutcome {
    /// Value of the `outcome` field.
    pub fn as_str(self) -> &'static str {
        match self {
            StageOutcome::Success => "success",
            StageOutcome::Failed => "failed",
        }
    }
}

/// Record the end of a stage as one audit line.
///
/// Successes log at INFO and failures at ERROR. `event` names the kind of
/// stage (`build.stage`, `update.stage`, `product.delete`).
pub fn log_stage_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: StageOutcome,
) {
    let empty = LogContext::default();
    let ctx = context.unwrap_or(&empty);
    match outcome {
        StageOutcome::Success => {
            crate::__vessel_event!(INFO, ctx, event = event, outcome = outcome.as_str(); "{message}")
        }
        StageOutcome::Failed => {
            crate::__vessel_event!(ERROR, ctx, event = event, outcome = outcome.as_str(); "{message}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macros_accept_context_and_plain_forms() {
        init_cli();
        let ctx = LogContext::new()
            .with_product("demo")
            .with_version("1.0.0")
            .with_platform("darwin");
        vessel_info!(context = ctx.clone(), "release registered");
        vessel_debug!("no release attached");
        vessel_warn!(context = ctx.clone().with_stage("download"), "retrying");
        vessel_error!(context = ctx, "installer exited with {}", 42);
    }

    #[test]
    fn stage_events_accept_missing_context() {
        init_cli();
        let ctx = LogContext::new().with_stage("bundle");
        log_stage_event(Some(&ctx), "build.stage", "bundler finished", StageOutcome::Success);
        log_stage_event(None, "build.stage", "bundler failed", StageOutcome::Failed);
    }

    #[test]
    fn later_stage_replaces_earlier_one() {
        let ctx = LogContext::new().with_stage("pack").with_stage("bundle");
        assert_eq!(ctx.stage, Some("bundle"));
        assert_eq!(ctx.product, None);
        assert_eq!(StageOutcome::Failed.as_str(), "failed");
    }
}
