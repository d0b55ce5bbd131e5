use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Position of a logged transaction in the apply order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ApplyTicket(u64);

#[derive(Debug, Default)]
struct TrackerState {
    issued: u64,
    applied: u64,
}

/// Tracks transactions that are in the log but not yet in the store.
///
/// Tickets are issued while the log section is held, so ticket order is
/// log order. Applies then run strictly in ticket order, which keeps the
/// store's notion of "last applied" a prefix of the log.
#[derive(Debug, Default)]
pub struct TransactionTracker {
    state: Mutex<TrackerState>,
    changed: Condvar,
}

impl TransactionTracker {
    /// Creates a tracker with nothing in flight.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a transaction that was just appended to the log.
    pub fn begin_apply(&self) -> ApplyTicket {
        let mut state = self.state.lock();
        state.issued += 1;
        ApplyTicket(state.issued)
    }

    /// Blocks until every earlier ticket has finished applying.
    pub fn await_turn(&self, ticket: ApplyTicket) {
        let mut state = self.state.lock();
        while state.applied + 1 < ticket.0 {
            self.changed.wait(&mut state);
        }
    }

    /// Marks `ticket` as applied, successfully or not.
    pub fn end_apply(&self, ticket: ApplyTicket) {
        let mut state = self.state.lock();
        state.applied = state.applied.max(ticket.0);
        self.changed.notify_all();
    }

    /// Number of transactions logged but not yet applied.
    #[must_use]
    pub fn in_flight(&self) -> u64 {
        let state = self.state.lock();
        state.issued - state.applied
    }

    /// Waits up to `timeout` for every issued ticket to be applied.
    ///
    /// Returns `false` on timeout.
    #[must_use]
    pub fn await_all_closed(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        while state.applied < state.issued {
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut state, deadline).timed_out() {
                        return state.applied >= state.issued;
                    }
                }
                None => self.changed.wait(&mut state),
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn idle_tracker_is_closed() {
        let tracker = TransactionTracker::new();
        assert!(tracker.await_all_closed(Duration::ZERO));
        assert_eq!(tracker.in_flight(), 0);
    }

    #[test]
    fn await_all_closed_times_out_while_in_flight() {
        let tracker = TransactionTracker::new();
        let ticket = tracker.begin_apply();
        assert!(!tracker.await_all_closed(Duration::from_millis(20)));
        tracker.end_apply(ticket);
        assert!(tracker.await_all_closed(Duration::ZERO));
    }

    #[test]
    fn unbounded_timeout_waits_for_the_applier() {
        let tracker = Arc::new(TransactionTracker::new());
        let ticket = tracker.begin_apply();
        let applier = {
            let tracker = Arc::clone(&tracker);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                tracker.end_apply(ticket);
            })
        };
        assert!(tracker.await_all_closed(Duration::MAX));
        applier.join().unwrap();
        assert_eq!(tracker.in_flight(), 0);
    }

    #[test]
    fn applies_run_in_ticket_order() {
        let tracker = Arc::new(TransactionTracker::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let first = tracker.begin_apply();
        let second = tracker.begin_apply();

        let handle = {
            let tracker = Arc::clone(&tracker);
            let order = Arc::clone(&order);
            thread::spawn(move || {
                tracker.await_turn(second);
                order.lock().push(2);
                tracker.end_apply(second);
            })
        };

        thread::sleep(Duration::from_millis(20));
        tracker.await_turn(first);
        order.lock().push(1);
        tracker.end_apply(first);
        handle.join().unwrap();

        assert_eq!(*order.lock(), vec![1, 2]);
        assert_eq!(tracker.in_flight(), 0);
    }
}
