//! env_logger setup: compact `time level target message` lines on stderr.
//!
//! Stdout carries the sidecar's JSON-lines protocol, so logs never go there.
//! `RUST_LOG` overrides the default `info` filter.

use std::io::Write;

const TARGET_PREFIX: &str = "mediapress::";

/// Strip the crate prefix from a log target for display.
pub fn short_target(target: &str) -> &str {
    target.strip_prefix(TARGET_PREFIX).unwrap_or(target)
}

/// Install the global logger. Safe to call more than once; later calls are ignored.
pub fn init() {
    let env = env_logger::Env::default().default_filter_or("info");
    let result = env_logger::Builder::from_env(env)
        .target(env_logger::Target::Stderr)
        .format(|buf, record| {
            writeln!(
                buf,
                "{}  {:5}  {}  {}",
                buf.timestamp_millis(),
                record.level(),
                short_target(record.target()),
                record.args()
            )
        })
        .try_init();
    if result.is_ok() {
        log::debug!(target: "mediapress::logging", "Logger initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_prefix_is_stripped() {
        assert_eq!(short_target("mediapress::supervisor"), "supervisor");
        assert_eq!(short_target("mediapress::ffmpeg::runner"), "ffmpeg::runner");
        assert_eq!(short_target("tokio::runtime"), "tokio::runtime");
    }

    #[test]
    fn init_twice_does_not_panic() {
        init();
        init();
    }
}
