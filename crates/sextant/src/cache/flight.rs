//! Single-flight coalescing of concurrent work on the same key.
//!
//! The first caller for a key becomes the leader and runs the computation;
//! callers arriving while it runs block on a condition variable and receive a
//! clone of the leader's result. The group lock is only held to look up or
//! register a call, never while the computation runs.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use tracing::trace;

/// Outcome of [`FlightGroup::run`].
#[derive(Debug)]
pub(crate) enum Flight<V> {
    /// This caller ran the computation.
    Led(V),
    /// This caller waited on another caller's computation.
    ///
    /// `None` only if the leader unwound without producing a value.
    Joined(Option<V>),
}

#[derive(Debug)]
struct Call<V> {
    state: Mutex<CallState<V>>,
    done: Condvar,
}

#[derive(Debug)]
struct CallState<V> {
    finished: bool,
    value: Option<V>,
}

/// Group of in-flight computations keyed by `K`.
#[derive(Debug)]
pub(crate) struct FlightGroup<K, V> {
    calls: Mutex<HashMap<K, Arc<Call<V>>>>,
}

impl<K, V> Default for FlightGroup<K, V> {
    fn default() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }
}

/// Completes a call when the leader returns or unwinds.
struct LeaderGuard<'a, K: Eq + Hash, V> {
    group: &'a FlightGroup<K, V>,
    key: &'a K,
    call: Arc<Call<V>>,
    value: Option<V>,
}

impl<K: Eq + Hash, V> Drop for LeaderGuard<'_, K, V> {
    fn drop(&mut self) {
        // Unregister first so late arrivals start a fresh call instead of
        // joining a finished one.
        self.group
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(self.key);

        let mut state = self
            .call
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state.finished = true;
        state.value = self.value.take();
        drop(state);
        self.call.done.notify_all();
    }
}

impl<K, V> FlightGroup<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Run `work` for `key`, or wait for the call already running for it.
    pub(crate) fn run<F>(&self, key: &K, work: F) -> Flight<V>
    where
        F: FnOnce() -> V,
    {
        let (call, leader) = {
            let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = calls.get(key) {
                (Arc::clone(existing), false)
            } else {
                let call = Arc::new(Call {
                    state: Mutex::new(CallState {
                        finished: false,
                        value: None,
                    }),
                    done: Condvar::new(),
                });
                calls.insert(key.clone(), Arc::clone(&call));
                (call, true)
            }
        };

        if leader {
            let mut guard = LeaderGuard {
                group: self,
                key,
                call,
                value: None,
            };
            let value = work();
            guard.value = Some(value.clone());
            drop(guard);
            return Flight::Led(value);
        }

        trace!("joining in-flight computation");
        let state = call.state.lock().unwrap_or_else(PoisonError::into_inner);
        let state = call
            .done
            .wait_while(state, |s| !s.finished)
            .unwrap_or_else(PoisonError::into_inner);
        Flight::Joined(state.value.clone())
    }

    /// Number of computations currently running.
    pub(crate) fn in_flight(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn sequential_calls_each_run() {
        let group: FlightGroup<&str, usize> = FlightGroup::default();
        let runs = AtomicUsize::new(0);

        for _ in 0..3 {
            let flight = group.run(&"k", || runs.fetch_add(1, Ordering::SeqCst));
            assert!(matches!(flight, Flight::Led(_)));
        }

        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(group.in_flight(), 0);
    }

    #[test]
    fn concurrent_callers_share_one_run() {
        let group: Arc<FlightGroup<String, usize>> = Arc::new(FlightGroup::default());
        let runs = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let group = Arc::clone(&group);
                let runs = Arc::clone(&runs);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    match group.run(&"same".to_string(), || {
                        thread::sleep(Duration::from_millis(100));
                        runs.fetch_add(1, Ordering::SeqCst) + 42
                    }) {
                        Flight::Led(v) => v,
                        Flight::Joined(v) => v.expect("leader should produce a value"),
                    }
                })
            })
            .collect();

        let results: Vec<usize> = handles
            .into_iter()
            .map(|h| h.join().expect("thread should not panic"))
            .collect();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|&v| v == 42));
    }

    #[test]
    fn distinct_keys_do_not_wait_on_each_other() {
        let group: Arc<FlightGroup<u32, u32>> = Arc::new(FlightGroup::default());
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|k| {
                let group = Arc::clone(&group);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    group.run(&k, || {
                        // Both leaders must be inside `work` at the same time to pass.
                        barrier.wait();
                        k
                    })
                })
            })
            .collect();

        for handle in handles {
            assert!(matches!(handle.join().expect("no panic"), Flight::Led(_)));
        }
    }

    #[test]
    fn panicking_leader_releases_followers() {
        let group: Arc<FlightGroup<u8, u8>> = Arc::new(FlightGroup::default());
        let started = Arc::new(Barrier::new(2));

        let leader = {
            let group = Arc::clone(&group);
            let started = Arc::clone(&started);
            thread::spawn(move || {
                group.run(&1, || {
                    started.wait();
                    thread::sleep(Duration::from_millis(50));
                    panic!("extractor blew up");
                })
            })
        };

        started.wait();
        let follower = group.run(&1, || 7);

        assert!(leader.join().is_err());
        // Either joined the failed call or ran after it was unregistered.
        assert!(matches!(follower, Flight::Joined(None) | Flight::Led(7)));
        assert_eq!(group.in_flight(), 0);
    }
}
