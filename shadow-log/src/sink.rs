use tracing_subscriber::EnvFilter;

use crate::level::Level;

/// Install a global `tracing` subscriber filtered at `default_level`,
/// honoring `RUST_LOG` if set (spec.md §6 `--log-level`, §7 leveled sink).
pub fn init(default_level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.tracing_level().to_string()));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Emit one engine log line at `level`. A thin indirection over `tracing`'s
/// macros so call sites elsewhere in the workspace speak the engine's level
/// names instead of `tracing::Level` directly.
#[macro_export]
macro_rules! log_at {
    ($level:expr, $($arg:tt)+) => {
        match $level {
            $crate::Level::Error | $crate::Level::Critical => tracing::error!($($arg)+),
            $crate::Level::Warning => tracing::warn!($($arg)+),
            $crate::Level::Message | $crate::Level::Info => tracing::info!($($arg)+),
            $crate::Level::Debug => tracing::debug!($($arg)+),
        }
    };
}
