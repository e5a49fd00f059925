//! Logger installation for hosts that do not bring their own.

#[cfg(not(target_os = "android"))]
use std::sync::Once;

/// Tag shown in logcat.
pub const LOG_TAG: &str = "VRLens";

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Level used when no filter is given.
    pub max_level: log::LevelFilter,
    /// `env_logger` filter string, e.g. "vr_lens=debug,wgpu=warn". Falls back
    /// to `RUST_LOG`. Ignored on Android.
    pub env_filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            max_level: log::LevelFilter::Info,
            env_filter: None,
        }
    }
}

/// Installs the global logger. Later calls are ignored.
#[cfg(target_os = "android")]
pub fn init_logging(config: LoggingConfig) {
    android_logger::init_once(
        android_logger::Config::default()
            .with_max_level(config.max_level)
            .with_tag(LOG_TAG),
    );
}

#[cfg(not(target_os = "android"))]
static INIT: Once = Once::new();

/// Installs the global logger. Later calls are ignored.
#[cfg(not(target_os = "android"))]
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let mut builder = env_logger::Builder::new();
        if let Some(filter) = config.env_filter {
            builder.parse_filters(&filter);
        } else if let Ok(filter) = std::env::var("RUST_LOG") {
            builder.parse_filters(&filter);
        } else {
            builder.filter_level(config.max_level);
        }
        // Another logger may already be installed by the host or a test.
        if builder.try_init().is_ok() {
            log::debug!("logging initialized");
        }
    });
}
