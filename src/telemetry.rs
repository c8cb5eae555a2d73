//! Tracing setup, grounded in how `weavegraph`'s examples wire up
//! `tracing-subscriber`: an `EnvFilter` defaulting to a quiet level when
//! `RUST_LOG` is unset, plus the `fmt` layer.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a global `tracing` subscriber reading `RUST_LOG`, falling back
/// to `info,flowloom=debug` when unset. Call once, at process start.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,flowloom=debug"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}
