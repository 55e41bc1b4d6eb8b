//! Synchronization primitives for the interpreter ↔ I/O thread hand-off.

use std::sync::{Condvar, Mutex};

/// One-shot event: a single fire, any number of waiters.
#[derive(Default)]
pub struct SyncEvent {
    fired: Mutex<bool>,
    cv: Condvar,
}

impl SyncEvent {
    /// Block until the event is fired.
    pub fn wait(&self) {
        let mut fired = self.fired.lock().unwrap();
        while !*fired {
            fired = self.cv.wait(fired).unwrap();
        }
    }

    /// Fire the event, unblocking all current and future waiters.
    pub fn fire(&self) {
        let mut fired = self.fired.lock().unwrap();
        *fired = true;
        self.cv.notify_all();
    }
}

/// Counting semaphore, initial count 0.
///
/// The interpreter thread waits on this after emitting a `stopped` event;
/// handlers that resume execution notify it. Counting (rather than binary)
/// keeps a notification delivered before the wait from being lost.
#[derive(Default)]
pub struct Semaphore {
    count: Mutex<u64>,
    cv: Condvar,
}

impl Semaphore {
    pub fn notify(&self) {
        let mut count = self.count.lock().unwrap();
        *count += 1;
        self.cv.notify_one();
    }

    pub fn wait(&self) {
        let mut count = self.count.lock().unwrap();
        while *count == 0 {
            count = self.cv.wait(count).unwrap();
        }
        *count -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn event_unblocks_all_waiters() {
        let event = Arc::new(SyncEvent::default());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let event = event.clone();
                thread::spawn(move || event.wait())
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        event.fire();
        for waiter in waiters {
            waiter.join().unwrap();
        }
        // Late waiters return immediately.
        event.wait();
    }

    #[test]
    fn semaphore_keeps_early_notifications() {
        let sem = Semaphore::default();
        sem.notify();
        sem.notify();
        sem.wait();
        sem.wait();
    }

    #[test]
    fn semaphore_hands_off_across_threads() {
        let sem = Arc::new(Semaphore::default());
        let waiter = {
            let sem = sem.clone();
            thread::spawn(move || sem.wait())
        };
        thread::sleep(Duration::from_millis(20));
        sem.notify();
        waiter.join().unwrap();
    }
}
