use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

struct State<T> {
    value: Option<T>,
    closed: bool,
}

/// One-element, latest-wins hand-off between two threads.
///
/// `offer` never blocks: a value that has not been taken yet is displaced
/// and handed back to the caller. `take` waits at most the given duration.
pub struct HandoffSlot<T> {
    state: Mutex<State<T>>,
    ready: Condvar,
}

impl<T> Default for HandoffSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandoffSlot<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                value: None,
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `value`, returning the unconsumed value it replaced.
    ///
    /// Once the slot is closed the value is refused and returned as `Err`.
    pub fn offer(&self, value: T) -> Result<Option<T>, T> {
        let mut state = self.lock();
        if state.closed {
            return Err(value);
        }
        let displaced = state.value.replace(value);
        drop(state);
        self.ready.notify_one();
        Ok(displaced)
    }

    /// Wait up to `wait` for a value. `None` on timeout or once closed.
    pub fn take(&self, wait: Duration) -> Option<T> {
        let deadline = Instant::now() + wait;
        let mut state = self.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(value) = state.value.take() {
                return Some(value);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            state = self
                .ready
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    /// Put back a value that was taken but not consumed.
    ///
    /// Refused when the slot is closed or already holds a newer value.
    pub fn restore(&self, value: T) -> Result<(), T> {
        let mut state = self.lock();
        if state.closed || state.value.is_some() {
            return Err(value);
        }
        state.value = Some(value);
        drop(state);
        self.ready.notify_one();
        Ok(())
    }

    /// Discard any pending value.
    pub fn clear(&self) -> Option<T> {
        self.lock().value.take()
    }

    /// Refuse further offers and wake every waiter.
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    #[cfg(test)]
    fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn latest_value_wins() {
        let slot = HandoffSlot::new();
        assert_eq!(slot.offer(1), Ok(None));
        assert_eq!(slot.offer(2), Ok(Some(1)));
        assert_eq!(slot.offer(3), Ok(Some(2)));
        assert_eq!(slot.take(Duration::ZERO), Some(3));
        assert_eq!(slot.take(Duration::ZERO), None);
    }

    #[test]
    fn take_times_out_when_empty() {
        let slot: HandoffSlot<u32> = HandoffSlot::new();
        let start = Instant::now();
        assert_eq!(slot.take(Duration::from_millis(20)), None);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn take_wakes_on_offer() {
        let slot = Arc::new(HandoffSlot::new());
        let producer = {
            let slot = slot.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                slot.offer(7u32).unwrap();
            })
        };
        assert_eq!(slot.take(Duration::from_secs(5)), Some(7));
        producer.join().unwrap();
    }

    #[test]
    fn close_refuses_offers_and_releases_waiters() {
        let slot = Arc::new(HandoffSlot::<u32>::new());
        let waiter = {
            let slot = slot.clone();
            thread::spawn(move || slot.take(Duration::from_secs(10)))
        };
        thread::sleep(Duration::from_millis(10));
        slot.close();
        assert_eq!(waiter.join().unwrap(), None);
        assert_eq!(slot.offer(1), Err(1));
        assert_eq!(slot.restore(1), Err(1));
        assert_eq!(slot.clear(), None);
    }

    #[test]
    fn restore_never_displaces_a_newer_value() {
        let slot = HandoffSlot::new();
        assert_eq!(slot.restore(1), Ok(()));
        assert_eq!(slot.restore(2), Err(2));
        assert_eq!(slot.take(Duration::ZERO), Some(1));

        slot.offer(5).unwrap();
        assert_eq!(slot.restore(4), Err(4));
        assert_eq!(slot.take(Duration::ZERO), Some(5));
    }

    #[test]
    fn fast_producer_slow_consumer_sees_subset() {
        let slot = Arc::new(HandoffSlot::new());
        let producer = {
            let slot = slot.clone();
            thread::spawn(move || {
                for i in 0..1000u32 {
                    let _ = slot.offer(i);
                }
                slot.close();
            })
        };
        let mut seen = Vec::new();
        loop {
            match slot.take(Duration::from_millis(5)) {
                Some(v) => {
                    seen.push(v);
                    thread::sleep(Duration::from_millis(1));
                }
                None if slot.is_closed() => break,
                None => {}
            }
        }
        producer.join().unwrap();
        assert!(seen.len() < 1000);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }
}
