use std::sync::LazyLock;

/// Defines the application version.
///
/// Git metadata is optional: builds outside a checkout fall back to `unknown`.
pub static VERSION: LazyLock<String> = LazyLock::new(|| {
    format!(
        "{}-{}{}",
        env!("RUNNER_VERSION"),
        option_env!("VERGEN_GIT_SHA").unwrap_or("unknown"),
        if option_env!("VERGEN_GIT_DIRTY") == Some("true") {
            "-dirty"
        } else {
            ""
        }
    )
});
