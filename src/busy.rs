use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::Error;

/// Single-flight flag shared by training batches and the detection loop.
/// At most one of either may hold it at a time.
#[derive(Clone, Default)]
pub struct Busy {
    flag: Arc<AtomicBool>,
}

impl Busy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the pipeline, failing with `Error::Busy` when a batch or loop
    /// already holds it.
    pub fn try_acquire(&self) -> Result<BusyGuard, Error> {
        if self
            .flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::Busy);
        }
        Ok(BusyGuard {
            flag: self.flag.clone(),
        })
    }

    pub fn is_busy(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Releases the flag when dropped.
pub struct BusyGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_while_held() {
        let busy = Busy::new();
        let guard = busy.try_acquire().unwrap();

        assert!(matches!(busy.try_acquire(), Err(Error::Busy)));
        assert!(busy.is_busy());
        drop(guard);
    }

    #[test]
    fn released_on_drop() {
        let busy = Busy::new();
        drop(busy.try_acquire().unwrap());

        assert!(!busy.is_busy());
        let _guard = busy.try_acquire().unwrap();
    }

    #[test]
    fn clones_share_the_flag() {
        let busy = Busy::new();
        let other = busy.clone();
        let _guard = busy.try_acquire().unwrap();

        assert!(matches!(other.try_acquire(), Err(Error::Busy)));
    }
}
