//! Blocking primitives shared by the worker loops.

use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex},
    time::Duration,
};

/// Wakes a worker parked in [Signal::wait].
///
/// A notification delivered while nobody waits is kept until the next wait, so an
/// enqueue that races with a worker going idle is never lost.
pub struct Signal {
    state: Mutex<bool>,
    cv: Condvar,
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl Signal {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    pub fn notify(&self) {
        let mut signaled = self.state.lock().unwrap();
        *signaled = true;
        self.cv.notify_one();
    }

    /// Parks until notified or until `timeout` elapses. Returns `true` if notified.
    pub fn wait(&self, timeout: Duration) -> bool {
        let signaled = self.state.lock().unwrap();
        let (mut signaled, _) = self
            .cv
            .wait_timeout_while(signaled, timeout, |signaled| !*signaled)
            .unwrap();

        // Reset so the next wait parks again
        let fired = *signaled;
        *signaled = false;
        fired
    }
}

/// Unbounded FIFO shared between producers and a single worker.
pub struct Mailbox<T> {
    queue: Mutex<VecDeque<T>>,
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }
}

impl<T> Mailbox<T> {
    pub fn push(&self, item: T) {
        self.queue.lock().unwrap().push_back(item);
    }

    pub fn pop(&self) -> Option<T> {
        self.queue.lock().unwrap().pop_front()
    }

    /// Drops everything queued and returns how many items were dropped.
    pub fn clear(&self) -> usize {
        let mut queue = self.queue.lock().unwrap();
        let dropped = queue.len();
        queue.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        time::Instant,
    };

    #[test]
    fn test_signal_wakes_waiter() {
        let signal = Arc::new(Signal::new());
        let woken = Arc::new(AtomicBool::new(false));

        let thread_signal = signal.clone();
        let thread_woken = woken.clone();
        let handle = std::thread::spawn(move || {
            let fired = thread_signal.wait(Duration::from_secs(10));
            thread_woken.store(fired, Ordering::SeqCst);
        });

        signal.notify();
        handle.join().unwrap();
        assert!(woken.load(Ordering::SeqCst));
    }

    #[test]
    fn test_signal_kept_until_wait() {
        let signal = Signal::new();
        signal.notify();
        let start = Instant::now();
        assert!(signal.wait(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(5));

        // Consumed by the previous wait
        assert!(!signal.wait(Duration::from_millis(10)));
    }

    #[test]
    fn test_mailbox_fifo() {
        let mailbox = Mailbox::default();
        mailbox.push(1);
        mailbox.push(2);
        assert_eq!(mailbox.len(), 2);
        assert_eq!(mailbox.pop(), Some(1));
        mailbox.push(3);
        assert_eq!(mailbox.clear(), 2);
        assert!(mailbox.is_empty());
        assert_eq!(mailbox.pop(), None);
    }
}
