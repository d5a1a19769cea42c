//! Logging.
use cinder_error::{ErrorContext as _, GenericError};
use tracing::Subscriber;
use tracing_subscriber::{layer::SubscriberExt as _, registry::LookupSpan, util::SubscriberInitExt as _, Layer};

mod config;
pub use self::config::{LogLevel, LoggingConfiguration};

/// Logs a message to standard error and exits the process with a non-zero exit code.
///
/// Meant for failures that happen before logging is initialized, or that make it impossible to continue.
pub fn fatal_and_exit(message: String) -> ! {
    eprintln!("FATAL: {}", message);
    std::process::exit(1);
}

/// Initializes the logging subsystem for `tracing`.
///
/// Events are filtered with the directives from `log_level`, and written to standard output either as JSON objects,
/// one per line, or in a human-readable format, depending on `log_format_json`.
///
/// # Errors
///
/// If the logging subsystem was already initialized, an error will be returned.
pub fn initialize_logging(config: &LoggingConfiguration) -> Result<(), GenericError> {
    let filter = config.log_level.as_env_filter();

    let result = if config.log_format_json {
        tracing_subscriber::registry()
            .with(json_layer().with_filter(filter))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(pretty_layer().with_filter(filter))
            .try_init()
    };

    result.error_context("Failed to install global tracing subscriber.")
}

fn json_layer<S>() -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    tracing_subscriber::fmt::Layer::new()
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
}

fn pretty_layer<S>() -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    tracing_subscriber::fmt::Layer::new().with_target(true)
}
