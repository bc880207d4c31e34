use crate::{Interrupt, Interrupted};
use core::time::Duration;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// A bounded, blocking FIFO queue with interruptible waits.
///
/// Producers block in [`push`](Self::push) while the queue is full; consumers
/// block in [`pop`](Self::pop) while it is empty. Both waits return
/// [`Interrupted`] once the caller's [`Interrupt`] fires and the queue has
/// been woken with [`wake_all`](Self::wake_all), or once the queue is
/// [closed](Self::close).
///
/// The queue also remembers the largest length it ever reached, which is
/// never more than its capacity.
///
/// # Example
/// ```
/// use parascan::{BoundedQueue, Interrupt};
///
/// let queue = BoundedQueue::new(2);
/// let interrupt = Interrupt::new();
///
/// queue.push(1, &interrupt).unwrap();
/// queue.push(2, &interrupt).unwrap();
/// assert_eq!(queue.pop(&interrupt), Ok(1));
/// assert_eq!(queue.peak_len(), 2);
///
/// queue.close();
/// assert!(queue.push(3, &interrupt).is_err());
/// assert_eq!(queue.pop(&interrupt), Ok(2));
/// ```
#[derive(Debug)]
pub struct BoundedQueue<T> {
    capacity: usize,
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    peak: usize,
    closed: bool,
}

impl<T> BoundedQueue<T> {
    /// Creates a queue holding at most `capacity` items (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                peak: 0,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Largest number of items ever buffered at once.
    pub fn peak_len(&self) -> usize {
        self.state.lock().peak
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Appends `item`, blocking while the queue is full.
    ///
    /// The interrupt is checked before anything else, so an interrupted
    /// producer never enqueues.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] (dropping `item`) if `interrupt` fires or the
    /// queue is closed.
    pub fn push(&self, item: T, interrupt: &Interrupt) -> Result<(), Interrupted> {
        let mut state = self.state.lock();
        loop {
            if state.closed || interrupt.is_triggered() {
                return Err(Interrupted);
            }
            if state.items.len() < self.capacity {
                Self::enqueue(&mut state, item);
                self.not_empty.notify_one();
                return Ok(());
            }
            self.not_full.wait(&mut state);
        }
    }

    /// Removes the oldest item, blocking while the queue is empty.
    ///
    /// Buffered items are handed out even after `interrupt` fired, so a
    /// draining consumer sees everything that was enqueued.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if the queue is empty and either `interrupt`
    /// fired or the queue is closed.
    pub fn pop(&self, interrupt: &Interrupt) -> Result<T, Interrupted> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                self.not_full.notify_all();
                return Ok(item);
            }
            if state.closed || interrupt.is_triggered() {
                return Err(Interrupted);
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Like [`pop`](Self::pop), but gives up after `timeout` and returns
    /// `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if `interrupt` fires while waiting.
    pub fn pop_timeout(
        &self,
        interrupt: &Interrupt,
        timeout: Duration,
    ) -> Result<Option<T>, Interrupted> {
        let mut state = self.state.lock();
        if state.items.is_empty() {
            if interrupt.is_triggered() {
                return Err(Interrupted);
            }
            let _ = self.not_empty.wait_for(&mut state, timeout);
        }
        match state.items.pop_front() {
            Some(item) => {
                self.not_full.notify_all();
                Ok(Some(item))
            }
            None if interrupt.is_triggered() => Err(Interrupted),
            None => Ok(None),
        }
    }

    /// Waits up to `timeout` for the queue to become non-empty and reports
    /// whether it is.
    pub fn wait_non_empty(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if state.items.is_empty() {
            let _ = self.not_empty.wait_for(&mut state, timeout);
        }
        !state.items.is_empty()
    }

    /// Refuses further pushes. Buffered items can still be popped.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Wakes consumers without enqueuing, so they re-check external state.
    pub fn notify_consumers(&self) {
        let _state = self.state.lock();
        self.not_empty.notify_all();
    }

    /// Wakes every producer and consumer so they re-check their
    /// [`Interrupt`].
    pub fn wake_all(&self) {
        let _state = self.state.lock();
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    fn enqueue(state: &mut QueueState<T>, item: T) {
        state.items.push_back(item);
        state.peak = state.peak.max(state.items.len());
    }
}
