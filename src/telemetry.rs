//! Tracing bootstrap for hosts that do not install their own subscriber.

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

static INITIALIZED: OnceCell<()> = OnceCell::new();

/// Install a global tracing subscriber filtered by `RUST_LOG` (default
/// `info`). Safe to call on every cold or warm start; only the first call
/// does anything, and an already-installed subscriber wins.
pub fn init() {
    INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    });
}
