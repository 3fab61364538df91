//! One OS thread, its local task queue, and its liveness timestamps
//! (SPEC_FULL.md §3, §4.H).
//!
//! Grounded on the teacher's `WorkerThread`/`ThreadInfo`/`main_loop` triad in
//! `registry.rs`: a back-pointer to the pool, a per-worker queue, and a
//! `main_loop` that pops, runs, and falls back to stealing. The queue itself
//! is lock-protected rather than the teacher's lock-free `crossbeam_deque`
//! pair, per SPEC_FULL.md §4.H's explicit "lock-protected double-ended ring"
//! — a deliberate divergence from the teacher's concrete data structure,
//! keeping its push-front/pop-front/steal-from-back protocol.

use crate::block;
use crate::context;
use crate::fabric::Shared;
use crate::log::Event;
use crate::task::Task;
use crossbeam_utils::CachePadded;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Cap on how many tasks a single steal takes from a victim's queue.
const STEAL_CAP: usize = 128;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum State {
    Run = 0,
    Stop = 1,
    PauseRequested = 2,
    PauseAcknowledged = 3,
}

impl State {
    fn from_u8(v: u8) -> State {
        match v {
            0 => State::Run,
            1 => State::Stop,
            2 => State::PauseRequested,
            3 => State::PauseAcknowledged,
            _ => unreachable!("mn: invalid worker state byte"),
        }
    }
}

/// A thread-local xorshift generator, exactly the teacher's own
/// `XorShift64Star` used to pick steal victims on every probe after the
/// first, without herding toward "always steal from the next worker."
struct XorShift64Star {
    state: u64,
}

impl XorShift64Star {
    fn new(seed: u64) -> Self {
        XorShift64Star {
            state: if seed == 0 { 0x9E3779B97F4A7C15 } else { seed },
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    /// A uniform value in `0..bound`. `bound` must be nonzero.
    fn next_usize(&mut self, bound: usize) -> usize {
        (self.next_u64() % bound as u64) as usize
    }
}

pub(crate) struct Worker {
    pub(crate) id: usize,
    name: String,
    fabric: Weak<Shared>,
    queue: Mutex<VecDeque<Task>>,
    state: AtomicU8,
    job_start_millis: CachePadded<AtomicU64>,
    block_start_millis: CachePadded<AtomicU64>,
}

impl Worker {
    pub(crate) fn new(id: usize, name: String, fabric: Weak<Shared>, initial: State) -> Arc<Worker> {
        Arc::new(Worker {
            id,
            name,
            fabric,
            queue: Mutex::new(VecDeque::new()),
            state: AtomicU8::new(initial as u8),
            job_start_millis: CachePadded::new(AtomicU64::new(0)),
            block_start_millis: CachePadded::new(AtomicU64::new(0)),
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_state(&self, state: State) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub(crate) fn job_start_millis(&self) -> u64 {
        self.job_start_millis.load(Ordering::SeqCst)
    }

    pub(crate) fn block_start_millis(&self) -> u64 {
        self.block_start_millis.load(Ordering::SeqCst)
    }

    /// Pushes a task to the front of this worker's own queue — used both
    /// for self-submission and for dispatch from the fabric.
    pub(crate) fn push(&self, task: Task) {
        self.queue.lock().unwrap().push_front(task);
    }

    fn pop_front(&self) -> Option<Task> {
        self.queue.lock().unwrap().pop_front()
    }

    /// Takes up to half of this worker's queue (capped at `STEAL_CAP`) from
    /// the back, for a thief. Returns an empty `Vec` if there is nothing to
    /// spare.
    fn steal(&self) -> Vec<Task> {
        let mut queue = self.queue.lock().unwrap();
        let take = (queue.len() / 2).min(STEAL_CAP);
        let mut stolen = Vec::with_capacity(take);
        for _ in 0..take {
            if let Some(t) = queue.pop_back() {
                stolen.push(t);
            }
        }
        stolen
    }

    /// Hands this worker's entire remaining queue to a replacement, used by
    /// sysmon when swapping out a stuck worker (SPEC_FULL.md §4.I).
    pub(crate) fn drain_queue(&self) -> VecDeque<Task> {
        std::mem::take(&mut *self.queue.lock().unwrap())
    }

    pub(crate) fn adopt_queue(&self, tasks: VecDeque<Task>) {
        *self.queue.lock().unwrap() = tasks;
    }

    fn queue_len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// Runs on the worker's own OS thread until `Stop`.
    pub(crate) fn main_loop(self: Arc<Worker>) {
        let job_start_ptr: *const AtomicU64 = &*self.job_start_millis;
        let block_start_ptr: *const AtomicU64 = &*self.block_start_millis;
        // SAFETY: this `Worker` outlives its own OS thread; the fabric only
        // joins it after observing `Stop`.
        unsafe { block::install_block_timestamp(block_start_ptr) };

        let mut rng = XorShift64Star::new(self.id as u64 ^ 0xD1B54A32D192ED03);

        loop {
            match self.state() {
                State::Stop => break,
                State::PauseRequested => {
                    self.set_state(State::PauseAcknowledged);
                    if let Some(fabric) = self.fabric.upgrade() {
                        fabric.logger.log(|| Event::WorkerPaused { worker: self.id });
                    }
                    // Parked: sysmon owns the transition back to `Run` (by
                    // reactivating this worker from `ready_side`) or to
                    // `Stop` (teardown). Spin gently in between.
                    while self.state() == State::PauseAcknowledged {
                        std::thread::sleep(std::time::Duration::from_millis(1));
                    }
                    continue;
                }
                State::PauseAcknowledged => {
                    std::thread::sleep(std::time::Duration::from_millis(1));
                    continue;
                }
                State::Run => {}
            }

            let task = self.pop_front().or_else(|| self.try_steal(&mut rng));

            match task {
                Some(task) => {
                    unsafe { (*job_start_ptr).store(block::now_millis(), Ordering::SeqCst) };
                    if let Some(fabric) = self.fabric.upgrade() {
                        fabric.logger.log(|| Event::JobPopped { worker: self.id });
                    }

                    task.run();

                    unsafe { (*job_start_ptr).store(0, Ordering::SeqCst) };
                    context::current().tmp().reset();

                    if let Some(fabric) = self.fabric.upgrade() {
                        if let Some(after) = fabric.settings.after_each_job.clone() {
                            after();
                        }
                    }
                }
                None => std::thread::sleep(std::time::Duration::from_millis(1)),
            }
        }

        block::uninstall_block_timestamp();
    }

    /// First probe lands on the fabric's shared `steal_next` cursor so a
    /// burst of simultaneous thieves fan out across victims instead of
    /// herding onto the same one; every probe after the first falls back to
    /// this thread's own RNG, exactly the teacher's `steal()` order.
    fn try_steal(&self, rng: &mut XorShift64Star) -> Option<Task> {
        let fabric = self.fabric.upgrade()?;
        let workers = fabric.workers.read().unwrap();
        let n = workers.len();
        if n <= 1 {
            return None;
        }

        let first = fabric.steal_next(n);
        if let Some(task) = self.try_steal_from(&fabric, &workers, first) {
            return Some(task);
        }

        for _ in 0..n {
            let idx = rng.next_usize(n);
            if let Some(task) = self.try_steal_from(&fabric, &workers, idx) {
                return Some(task);
            }
        }
        None
    }

    fn try_steal_from(&self, fabric: &Shared, workers: &[Arc<Worker>], idx: usize) -> Option<Task> {
        let victim = &workers[idx];
        if victim.id == self.id {
            return None;
        }
        let mut stolen = victim.steal();
        let first = stolen.pop()?;
        fabric.logger.log(|| Event::JobStolen {
            worker: self.id,
            victim: victim.id,
        });
        for remaining in stolen {
            self.push(remaining);
        }
        Some(first)
    }

    pub(crate) fn approx_queue_len(&self) -> usize {
        self.queue_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xorshift_is_deterministic_and_in_bounds() {
        let mut rng = XorShift64Star::new(42);
        for _ in 0..1000 {
            let v = rng.next_usize(7);
            assert!(v < 7);
        }
    }

    #[test]
    fn push_pop_is_fifo_from_the_front() {
        let worker = Worker::new(0, "w0".into(), Weak::new(), State::Run);
        worker.push(Task::new(|| {}));
        worker.push(Task::new(|| {}));
        assert_eq!(worker.queue_len(), 2);
        assert!(worker.pop_front().is_some());
        assert!(worker.pop_front().is_some());
        assert!(worker.pop_front().is_none());
    }

    #[test]
    fn steal_takes_half_from_the_back() {
        let worker = Worker::new(0, "w0".into(), Weak::new(), State::Run);
        for _ in 0..10 {
            worker.push(Task::new(|| {}));
        }
        let stolen = worker.steal();
        assert_eq!(stolen.len(), 5);
        assert_eq!(worker.queue_len(), 5);
    }

    #[test]
    fn steal_is_capped() {
        let worker = Worker::new(0, "w0".into(), Weak::new(), State::Run);
        for _ in 0..1000 {
            worker.push(Task::new(|| {}));
        }
        let stolen = worker.steal();
        assert_eq!(stolen.len(), STEAL_CAP);
    }
}
