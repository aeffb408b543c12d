pub mod email;
pub mod webhook;

use std::sync::atomic::{AtomicBool, Ordering};

/// Enabled flag shared by the built-in channels.
#[derive(Debug)]
pub(crate) struct Switch(AtomicBool);

impl Switch {
    pub(crate) fn new(enabled: bool) -> Self {
        Self(AtomicBool::new(enabled))
    }

    pub(crate) fn get(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub(crate) fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::Relaxed);
    }
}
