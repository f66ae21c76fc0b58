//! Tracing setup helpers.
//!
//! The engine itself only emits `tracing` events; installing a
//! subscriber is the embedding application's choice. These helpers cover
//! the common cases (binaries, examples, integration tests) with an
//! `EnvFilter`-driven fmt subscriber.

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered by `RUST_LOG` (default `info`).
///
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    init_with_filter("info");
}

/// Install a fmt subscriber with the given default filter directive,
/// still overridable through `RUST_LOG`.
pub fn init_with_filter(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
        init_with_filter("debug");
    }
}
