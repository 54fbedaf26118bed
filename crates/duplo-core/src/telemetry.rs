//! Tracing initialization.

use std::sync::Once;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static INIT: Once = Once::new();

/// Install the global tracing subscriber.
///
/// Reads `DUPLO_LOG` for per-module levels, e.g.
/// `DUPLO_LOG=duplo_core::finder=debug,duplo_core::memory=warn`, and falls
/// back to `duplo_core=info` when unset or invalid. Safe to call repeatedly;
/// a subscriber installed elsewhere first is left in place.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("DUPLO_LOG")
            .unwrap_or_else(|_| EnvFilter::new("duplo_core=info"));

        let _ = tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true),
            )
            .with(filter)
            .try_init();
    });
}
