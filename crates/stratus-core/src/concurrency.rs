use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Cancellation flag shared between a build and whoever may abort it.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Raise `signal` on the first Ctrl-C; exit on the second.
///
/// Returns `false` when the handler could not be installed, for example
/// because the process already has one.
pub fn install_signal_handler(signal: AbortSignal) -> bool {
    let installed = ctrlc::set_handler(move || {
        if signal.is_raised() {
            std::process::exit(1);
        }
        signal.raise();
        eprintln!("\nabort requested, stopping the build...");
    });
    match installed {
        Ok(()) => true,
        Err(e) => {
            warn!("failed to install Ctrl-C handler, Ctrl-C will not abort the build cleanly: {e}");
            false
        }
    }
}
