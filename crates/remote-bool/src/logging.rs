//! Tracing setup shared by the binaries.
//!
//! Everything goes to stderr: the worker's stdout is the response channel.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing with REMOTE_BOOL_LOG and LOG_FORMAT support.
///
/// `RUST_LOG`, when set, replaces the built-in filter entirely.
pub fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = base_level(std::env::var("REMOTE_BOOL_LOG").ok().as_deref());
        EnvFilter::new(filter_directives(level))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

fn base_level(value: Option<&str>) -> &'static str {
    match value {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("warn") | Some("warning") => "warn",
        Some("error") => "error",
        _ => "info",
    }
}

fn filter_directives(level: &str) -> String {
    // The codec warns on every skipped byte: warn at most, error when `level` is error.
    let codec_level = if level == "error" { "error" } else { "warn" };
    format!(
        "remote_bool={level},remote_bool_worker={level},remote_bool::bridge::codec={codec_level}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_level_defaults_to_info() {
        assert_eq!(base_level(None), "info");
        assert_eq!(base_level(Some("loud")), "info");
        assert_eq!(base_level(Some("warning")), "warn");
        assert_eq!(base_level(Some("debug")), "debug");
    }

    #[test]
    fn directives_cover_library_and_worker() {
        insta::assert_snapshot!(
            filter_directives("debug"),
            @"remote_bool=debug,remote_bool_worker=debug,remote_bool::bridge::codec=warn"
        );
    }

    #[test]
    fn codec_directive_never_below_chosen_level() {
        insta::assert_snapshot!(
            filter_directives(base_level(Some("error"))),
            @"remote_bool=error,remote_bool_worker=error,remote_bool::bridge::codec=error"
        );
        insta::assert_snapshot!(
            filter_directives(base_level(Some("warn"))),
            @"remote_bool=warn,remote_bool_worker=warn,remote_bool::bridge::codec=warn"
        );
    }
}
