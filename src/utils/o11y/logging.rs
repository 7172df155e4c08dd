//! Logging helpers built on `tracing`.
use std::iter::successors;

use tracing::Subscriber;
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, EnvFilter, Layer};

/// Iterate over the `Display` representations of the sources of the given error
/// by recursively calling `std::error::Error::source()`.
pub fn iter_sources<T: std::error::Error>(
    error: &T,
) -> impl std::iter::Iterator<Item = String> + use<'_, T> {
    successors(error.source(), |&error| error.source()).map(ToString::to_string)
}

/// Level used by `log_error`.
pub const ERROR: tracing::Level = tracing::Level::ERROR;

/// Separator used by `log_error` to format error sources.
pub const SEP: &str = " | ";

/// Emit an ERROR event for an error with a message.
///
/// The event carries the error's `Display` and `Debug` forms along with its
/// chain of sources.
///
/// ```no_run
/// use bugtracker_init::utils::o11y::logging::log_error;
/// use std::io::{Error, ErrorKind};
///
/// let error = Error::new(ErrorKind::Other, "borked");
/// log_error!(error, "bootstrap failed");
/// ```
#[macro_export]
macro_rules! log_error {
    ($error:expr, $msg:literal) => {
        tracing::event!(
            $crate::utils::o11y::logging::ERROR,
            error = %$error,
            source = %$crate::utils::o11y::logging::iter_sources(&$error).collect::<Vec<_>>().join($crate::utils::o11y::logging::SEP),
            debug = ?$error,
            $msg
        )
    };
}

pub use log_error;

/// Closure form of `log_error`, for `inspect_err`.
#[macro_export]
macro_rules! as_error {
    ($msg:literal) => {
        |error| $crate::utils::o11y::logging::log_error!(error, $msg)
    };
}

pub use as_error;

/// The error type returned when building a subscriber.
#[derive(Debug, thiserror::Error)]
pub enum BuildSubscriberError {
    #[error("failed to parse filtering directive")]
    Parse(#[from] tracing_subscriber::filter::ParseError),
}

/// Parse a comma-separated list of span event kinds, e.g. `"new,close"`.
///
/// Unknown entries are ignored. Returns `None` when nothing usable is left.
fn parse_span_events(value: &str) -> Option<FmtSpan> {
    value
        .split(',')
        .filter_map(|part| match part.trim().to_lowercase().as_str() {
            "new" => Some(FmtSpan::NEW),
            "enter" => Some(FmtSpan::ENTER),
            "exit" => Some(FmtSpan::EXIT),
            "close" => Some(FmtSpan::CLOSE),
            "none" => Some(FmtSpan::NONE),
            "active" => Some(FmtSpan::ACTIVE),
            "full" => Some(FmtSpan::FULL),
            _ => None,
        })
        .reduce(|lhs, rhs| lhs | rhs)
}

/// Build a tracing subscriber.
///
/// Filtering follows `RUST_LOG` (default `info`); span events can be turned on
/// with `RUST_LOG_SPAN_EVENTS`.
pub fn build_subscriber() -> Result<impl Subscriber, BuildSubscriberError> {
    let mut fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_file(true)
        .with_line_number(true);

    if let Some(kind) = std::env::var("RUST_LOG_SPAN_EVENTS")
        .ok()
        .and_then(|string| parse_span_events(&string))
    {
        fmt_layer = fmt_layer.with_span_events(kind);
    }

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    Ok(tracing_subscriber::registry().with(fmt_layer.with_filter(env_filter)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("outer")]
    struct Outer(#[source] Inner);

    #[derive(Debug, thiserror::Error)]
    #[error("inner")]
    struct Inner;

    #[test]
    fn test_iter_sources() {
        let error = Outer(Inner);
        let sources: Vec<String> = iter_sources(&error).collect();
        assert_eq!(sources, vec!["inner".to_string()]);
    }

    #[test]
    fn test_error_macros() {
        let error = Outer(Inner);
        log_error!(error, "outer failed");

        let result: Result<(), Outer> = Err(Outer(Inner));
        assert!(result.inspect_err(as_error!("outer failed")).is_err());
    }

    #[test]
    fn test_parse_span_events() {
        assert_eq!(
            parse_span_events("new, CLOSE"),
            Some(FmtSpan::NEW | FmtSpan::CLOSE)
        );
        assert_eq!(parse_span_events("bogus"), None);
    }
}
