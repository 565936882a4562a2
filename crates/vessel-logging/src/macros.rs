//! ---
//! vsl_section: "03-logging-metrics"
//! vsl_subsection: "module"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Structured logging adapters and sinks."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---
//! Leveled macros stamping events with a [`LogContext`](crate::LogContext).
//!
//! ```ignore
//! vessel_info!(context = ctx.with_stage("bundle"), "bundle built at {}", path.display());
//! vessel_warn!("no context attached");
//! ```

#[doc(hidden)]
#[macro_export]
macro_rules! __vessel_event {
    ($level:ident, $ctx:expr, $($field:ident = $value:expr),* ; $($arg:tt)+) => {{
        let ctx: &$crate::LogContext<'_> = &$ctx;
        $crate::__tracing::event!(
            $crate::__tracing::Level::$level,
            $($field = $value,)*
            product = ctx.product.unwrap_or(""),
            version = ctx.version.unwrap_or(""),
            platform = ctx.platform.unwrap_or(""),
            stage = ctx.stage.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}

/// INFO event for a release.
#[macro_export]
macro_rules! vessel_info {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__vessel_event!(INFO, $ctx, ; $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__vessel_event!(INFO, $crate::LogContext::default(), ; $($arg)+)
    };
}

/// DEBUG event for a release.
#[macro_export]
macro_rules! vessel_debug {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__vessel_event!(DEBUG, $ctx, ; $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__vessel_event!(DEBUG, $crate::LogContext::default(), ; $($arg)+)
    };
}

/// WARN event for a release.
#[macro_export]
macro_rules! vessel_warn {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__vessel_event!(WARN, $ctx, ; $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__vessel_event!(WARN, $crate::LogContext::default(), ; $($arg)+)
    };
}

/// ERROR event for a release.
#[macro_export]
macro_rules! vessel_error {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__vessel_event!(ERROR, $ctx, ; $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__vessel_event!(ERROR, $crate::LogContext::default(), ; $($arg)+)
    };
}
