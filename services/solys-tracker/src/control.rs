//! Shared control flags between automation owners and their workers

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A boolean shared between an automation owner and its worker task
///
/// Exposes only `get`/`set`; no lock or inner handle ever escapes the
/// owner/worker pair. Cloning shares the underlying flag.
#[derive(Debug, Clone, Default)]
pub struct SharedFlag {
    inner: Arc<AtomicBool>,
}

impl SharedFlag {
    pub fn new(value: bool) -> Self {
        Self {
            inner: Arc::new(AtomicBool::new(value)),
        }
    }

    pub fn get(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }

    pub fn set(&self, value: bool) {
        self.inner.store(value, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let flag = SharedFlag::new(false);
        let other = flag.clone();
        other.set(true);
        assert!(flag.get());
        flag.set(false);
        assert!(!other.get());
    }

    #[test]
    fn default_is_false() {
        assert!(!SharedFlag::default().get());
    }
}
