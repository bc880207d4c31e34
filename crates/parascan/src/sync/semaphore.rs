use crate::{Interrupt, Interrupted};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// A counting semaphore that grants permits in strict FIFO order.
///
/// A request for `n` permits waits until every earlier request has been
/// served and `n` permits are free. Later requests never overtake it, even
/// when they need fewer permits than are currently available. This is what
/// lets a request for *all* permits make progress under a constant stream of
/// single-permit requests.
///
/// Waiting is interruptible: a waiter whose [`Interrupt`] fires leaves the
/// line without being granted anything, and the next waiter moves up.
///
/// # Example
/// ```
/// use parascan::{FairSemaphore, Interrupt};
///
/// let semaphore = FairSemaphore::new(4);
/// let interrupt = Interrupt::new();
///
/// semaphore.acquire(4, &interrupt).unwrap();
/// assert_eq!(semaphore.available(), 0);
/// semaphore.release(4);
/// assert_eq!(semaphore.available(), 4);
/// ```
#[derive(Debug)]
pub struct FairSemaphore {
    permits: usize,
    state: Mutex<SemaphoreState>,
    cond: Condvar,
}

#[derive(Debug)]
struct SemaphoreState {
    available: usize,
    waiters: VecDeque<u64>,
    next_ticket: u64,
}

impl FairSemaphore {
    /// Creates a semaphore with `permits` permits, all available.
    pub const fn new(permits: usize) -> Self {
        Self {
            permits,
            state: Mutex::new(SemaphoreState {
                available: permits,
                waiters: VecDeque::new(),
                next_ticket: 0,
            }),
            cond: Condvar::new(),
        }
    }

    /// Total number of permits.
    pub const fn permits(&self) -> usize {
        self.permits
    }

    /// Number of permits not currently held.
    pub fn available(&self) -> usize {
        self.state.lock().available
    }

    /// Number of requests queued behind the head of the line.
    pub fn waiting(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Blocks until `n` permits are granted in FIFO order.
    ///
    /// `n` is clamped to the total number of permits so an oversized request
    /// cannot wait forever.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if `interrupt` is triggered before the permits
    /// are granted. Nothing is held in that case.
    pub fn acquire(&self, n: usize, interrupt: &Interrupt) -> Result<(), Interrupted> {
        let n = n.min(self.permits);
        let mut state = self.state.lock();

        if interrupt.is_triggered() {
            return Err(Interrupted);
        }

        if state.waiters.is_empty() && state.available >= n {
            state.available -= n;
            return Ok(());
        }

        let ticket = state.next_ticket;
        state.next_ticket = state.next_ticket.wrapping_add(1);
        state.waiters.push_back(ticket);

        loop {
            if interrupt.is_triggered() {
                state.waiters.retain(|&t| t != ticket);
                // The head of the line may have changed.
                self.cond.notify_all();
                return Err(Interrupted);
            }

            if state.waiters.front() == Some(&ticket) && state.available >= n {
                state.waiters.pop_front();
                state.available -= n;
                if !state.waiters.is_empty() {
                    self.cond.notify_all();
                }
                return Ok(());
            }

            self.cond.wait(&mut state);
        }
    }

    /// Returns `n` permits.
    ///
    /// Releasing permits that were never acquired is a bug. Debug builds
    /// panic on it.
    pub fn release(&self, n: usize) {
        if n == 0 {
            return;
        }
        let mut state = self.state.lock();
        debug_assert!(
            state.available + n <= self.permits,
            "released more permits than were acquired"
        );
        state.available = (state.available + n).min(self.permits);
        self.cond.notify_all();
    }

    /// Wakes every waiter so it re-checks its [`Interrupt`].
    pub fn wake_all(&self) {
        let _state = self.state.lock();
        self.cond.notify_all();
    }
}

/// The permits one holder currently owns on a [`FairSemaphore`].
///
/// Held permits are released on [`release_all`](Self::release_all) or when
/// the guard is dropped, including during unwinding.
#[derive(Debug)]
pub struct Permits<'a> {
    semaphore: &'a FairSemaphore,
    held: usize,
}

impl<'a> Permits<'a> {
    pub const fn new(semaphore: &'a FairSemaphore) -> Self {
        Self { semaphore, held: 0 }
    }

    pub const fn held(&self) -> usize {
        self.held
    }

    /// Acquires `n` permits unless some are already held.
    ///
    /// Returns `true` if permits were acquired by this call.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if the wait was interrupted.
    pub fn acquire(&mut self, n: usize, interrupt: &Interrupt) -> Result<bool, Interrupted> {
        if self.held > 0 {
            return Ok(false);
        }
        let n = n.min(self.semaphore.permits());
        self.semaphore.acquire(n, interrupt)?;
        self.held = n;
        Ok(true)
    }

    /// Acquires every permit unless some are already held.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if the wait was interrupted.
    pub fn acquire_all(&mut self, interrupt: &Interrupt) -> Result<bool, Interrupted> {
        self.acquire(self.semaphore.permits(), interrupt)
    }

    pub fn release_all(&mut self) {
        self.semaphore.release(self.held);
        self.held = 0;
    }
}

impl Drop for Permits<'_> {
    fn drop(&mut self) {
        self.release_all();
    }
}
