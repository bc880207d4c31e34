use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A one-shot cancellation flag shared between a waiter and whoever may
/// cancel it.
///
/// Threads cannot be interrupted in Rust, so every blocking wait in this crate
/// takes an `Interrupt` and re-checks it whenever it is woken. Triggering is
/// monotonic: once set, the flag is never cleared. Triggering alone does not
/// wake anyone; the owner of the condition variable must also be woken (see
/// [`BoundedQueue::wake_all`] and [`FairSemaphore::wake_all`]).
///
/// [`BoundedQueue::wake_all`]: crate::BoundedQueue::wake_all
/// [`FairSemaphore::wake_all`]: crate::FairSemaphore::wake_all
#[derive(Clone, Debug, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
