//! Process-wide deadlock detector (SPEC_FULL.md §4.D).
//!
//! Compiled in whenever `debug_assertions` is on, or unconditionally via the
//! `deadlock-detection` feature. Every public function here has two bodies:
//! a real one under `#[cfg(any(feature = "deadlock-detection",
//! debug_assertions))]` and a no-op stub otherwise, so an optimized release
//! build carries neither the detector's own mutex nor its graph-walking
//! code — strictly additive to the lock fast path, per the "Deadlock
//! detector debug-only" design note in spec.md §9.

pub type MutexId = usize;

#[cfg(any(feature = "deadlock-detection", debug_assertions))]
mod enabled {
    use super::MutexId;
    use std::backtrace::Backtrace;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::thread::ThreadId;

    enum Ownership {
        Exclusive {
            thread: ThreadId,
            callstack: Backtrace,
        },
        Shared(HashMap<ThreadId, Backtrace>),
    }

    /// One frame of a reported deadlock cycle.
    pub struct CycleFrame {
        pub mutex_name: String,
        pub owner: ThreadId,
        pub callstack: Backtrace,
    }

    struct State {
        mutex_thread_owner: HashMap<MutexId, Ownership>,
        thread_mutex_block: HashMap<ThreadId, MutexId>,
        mutex_names: HashMap<MutexId, String>,
    }

    impl State {
        fn new() -> Self {
            State {
                mutex_thread_owner: HashMap::new(),
                thread_mutex_block: HashMap::new(),
                mutex_names: HashMap::new(),
            }
        }

        /// Follows `owner -> what that owner waits for` starting from
        /// `start`, looking for a path back to a mutex `me` already owns
        /// (or to `me` itself). Descends through *every* owner of a shared
        /// lock, per SPEC_FULL.md §4.D.
        fn find_cycle(&self, me: ThreadId, start: MutexId) -> Option<Vec<CycleFrame>> {
            let mut visited = std::collections::HashSet::new();
            let mut path = Vec::new();
            self.walk(me, start, &mut visited, &mut path)
        }

        fn walk(
            &self,
            me: ThreadId,
            mutex: MutexId,
            visited: &mut std::collections::HashSet<MutexId>,
            path: &mut Vec<CycleFrame>,
        ) -> Option<Vec<CycleFrame>> {
            if !visited.insert(mutex) {
                return None;
            }
            let owners: Vec<ThreadId> = match self.mutex_thread_owner.get(&mutex) {
                Some(Ownership::Exclusive { thread, .. }) => vec![*thread],
                Some(Ownership::Shared(map)) => map.keys().copied().collect(),
                None => return None,
            };

            for owner in owners {
                let frame = CycleFrame {
                    mutex_name: self
                        .mutex_names
                        .get(&mutex)
                        .cloned()
                        .unwrap_or_else(|| format!("<mutex {:#x}>", mutex)),
                    owner,
                    callstack: Backtrace::capture(),
                };

                if owner == me {
                    path.push(frame);
                    return Some(path.clone());
                }

                if let Some(&next_mutex) = self.thread_mutex_block.get(&owner) {
                    path.push(frame);
                    if let Some(cycle) = self.walk(me, next_mutex, visited, path) {
                        return Some(cycle);
                    }
                    path.pop();
                }
            }
            None
        }
    }

    impl Clone for CycleFrame {
        fn clone(&self) -> Self {
            // `Backtrace` has no `Clone`; a fresh capture at clone time is
            // good enough since this only happens while unwinding a found
            // cycle back up the recursion, not on any hot path.
            CycleFrame {
                mutex_name: self.mutex_name.clone(),
                owner: self.owner,
                callstack: Backtrace::capture(),
            }
        }
    }

    static DETECTOR: Mutex<Option<State>> = Mutex::new(None);

    fn with_state<R>(f: impl FnOnce(&mut State) -> R) -> R {
        let mut guard = DETECTOR.lock().unwrap();
        let state = guard.get_or_insert_with(State::new);
        f(state)
    }

    fn current_thread() -> ThreadId {
        std::thread::current().id()
    }

    pub fn register_name(mutex: MutexId, name: &str) {
        with_state(|s| {
            s.mutex_names.insert(mutex, name.to_string());
        });
    }

    pub fn unregister(mutex: MutexId) {
        with_state(|s| {
            s.mutex_names.remove(&mutex);
            s.mutex_thread_owner.remove(&mutex);
        });
    }

    pub fn mark_waiting_for(mutex: MutexId) {
        let me = current_thread();
        let cycle = with_state(|s| {
            s.thread_mutex_block.insert(me, mutex);
            s.find_cycle(me, mutex)
        });
        if let Some(cycle) = cycle {
            report_and_abort(me, cycle);
        }
    }

    pub fn clear_waiting(_mutex: MutexId) {
        let me = current_thread();
        with_state(|s| {
            s.thread_mutex_block.remove(&me);
        });
    }

    pub fn set_exclusive_owner(mutex: MutexId) {
        let me = current_thread();
        with_state(|s| {
            s.mutex_thread_owner.insert(
                mutex,
                Ownership::Exclusive {
                    thread: me,
                    callstack: Backtrace::capture(),
                },
            );
        });
    }

    pub fn add_shared_owner(mutex: MutexId) {
        let me = current_thread();
        with_state(|s| {
            match s
                .mutex_thread_owner
                .entry(mutex)
                .or_insert_with(|| Ownership::Shared(HashMap::new()))
            {
                Ownership::Shared(map) => {
                    map.insert(me, Backtrace::capture());
                }
                Ownership::Exclusive { .. } => {
                    // Unreachable: a writer cannot hold this mutex while
                    // readers are being added.
                }
            }
        });
    }

    pub fn remove_shared_owner(mutex: MutexId) {
        let me = current_thread();
        with_state(|s| {
            if let Some(Ownership::Shared(map)) = s.mutex_thread_owner.get_mut(&mutex) {
                map.remove(&me);
                if map.is_empty() {
                    s.mutex_thread_owner.remove(&mutex);
                }
            }
        });
    }

    pub fn unset_owner(mutex: MutexId) {
        with_state(|s| {
            s.mutex_thread_owner.remove(&mutex);
        });
    }

    fn report_and_abort(me: ThreadId, cycle: Vec<CycleFrame>) -> ! {
        eprintln!("mn: deadlock detected");
        eprintln!("thread {:?} is part of a wait-for cycle:", me);
        for frame in &cycle {
            eprintln!(
                "  waiting on `{}`, held by {:?}\n{}",
                frame.mutex_name, frame.owner, frame.callstack
            );
        }
        eprintln!("current thread's callstack:\n{}", Backtrace::capture());
        crate::log::Logger::new().log(|| crate::log::Event::DeadlockDetected {
            mutexes: cycle.len(),
            threads: cycle.len(),
        });
        std::process::abort();
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn no_cycle_when_single_owner() {
            let id: MutexId = 0xdead_0001;
            set_exclusive_owner(id);
            unset_owner(id);
        }
    }
}

#[cfg(any(feature = "deadlock-detection", debug_assertions))]
pub use enabled::*;

#[cfg(not(any(feature = "deadlock-detection", debug_assertions)))]
mod disabled {
    use super::MutexId;

    #[inline(always)]
    pub fn register_name(_mutex: MutexId, _name: &str) {}
    #[inline(always)]
    pub fn unregister(_mutex: MutexId) {}
    #[inline(always)]
    pub fn mark_waiting_for(_mutex: MutexId) {}
    #[inline(always)]
    pub fn clear_waiting(_mutex: MutexId) {}
    #[inline(always)]
    pub fn set_exclusive_owner(_mutex: MutexId) {}
    #[inline(always)]
    pub fn add_shared_owner(_mutex: MutexId) {}
    #[inline(always)]
    pub fn remove_shared_owner(_mutex: MutexId) {}
    #[inline(always)]
    pub fn unset_owner(_mutex: MutexId) {}
}

#[cfg(not(any(feature = "deadlock-detection", debug_assertions)))]
pub use disabled::*;
