//! Fixed pool of cooperative workers, round-robin dispatch, and the sysmon
//! supervisor thread that replaces apparently-stuck workers
//! (SPEC_FULL.md §3, §4.I).
//!
//! Grounded on `registry.rs`'s `Registry::new`/`Registry::terminate` and the
//! `ThreadPoolBuilder` normalization pattern (`n_threads = Ord::min(...)`):
//! [`FabricBuilder`] fills in unset fields the same way before spawning
//! worker threads in bulk. The sysmon loop generalizes the teacher's
//! `sleep` module idea of "idle bookkeeping on a side thread" from
//! park/unpark to "detect stuck workers and swap their identity."

use crate::error::FabricBuildError;
use crate::log::{Event, Logger};
use crate::task::Task;
use crate::unwind::{halt_unwinding, AbortIfPanic};
use crate::worker::{State, Worker};
use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

type StartHandler = Arc<dyn Fn(usize) + Send + Sync>;
type ExitHandler = Arc<dyn Fn(usize) + Send + Sync>;
type PanicHandler = Arc<dyn Fn(usize, Box<dyn std::any::Any + Send>) + Send + Sync>;

/// Immutable, normalized configuration for a [`Fabric`].
#[derive(Clone)]
pub struct FabricSettings {
    pub name: String,
    pub workers_count: usize,
    pub coop_blocking_threshold_ms: u64,
    pub external_blocking_threshold_ms: u64,
    pub spare_workers_count: usize,
    pub(crate) after_each_job: Option<Arc<dyn Fn() + Send + Sync>>,
}

/// Builds a [`Fabric`], normalizing unset fields the way
/// `ThreadPoolBuilder` does (SPEC_FULL.md §4.I's ambient addition).
pub struct FabricBuilder {
    name: Option<String>,
    workers_count: Option<usize>,
    coop_blocking_threshold_ms: Option<u64>,
    external_blocking_threshold_ms: Option<u64>,
    spare_workers_count: Option<usize>,
    after_each_job: Option<Arc<dyn Fn() + Send + Sync>>,
    start_handler: Option<StartHandler>,
    exit_handler: Option<ExitHandler>,
    panic_handler: Option<PanicHandler>,
}

impl FabricBuilder {
    pub fn new() -> Self {
        FabricBuilder {
            name: None,
            workers_count: None,
            coop_blocking_threshold_ms: None,
            external_blocking_threshold_ms: None,
            spare_workers_count: None,
            after_each_job: None,
            start_handler: None,
            exit_handler: None,
            panic_handler: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn workers_count(mut self, n: usize) -> Self {
        self.workers_count = Some(n);
        self
    }

    pub fn coop_blocking_threshold_ms(mut self, ms: u64) -> Self {
        self.coop_blocking_threshold_ms = Some(ms);
        self
    }

    pub fn external_blocking_threshold_ms(mut self, ms: u64) -> Self {
        self.external_blocking_threshold_ms = Some(ms);
        self
    }

    pub fn spare_workers_count(mut self, n: usize) -> Self {
        self.spare_workers_count = Some(n);
        self
    }

    pub fn after_each_job<F: Fn() + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.after_each_job = Some(Arc::new(f));
        self
    }

    pub fn start_handler<F: Fn(usize) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.start_handler = Some(Arc::new(f));
        self
    }

    pub fn exit_handler<F: Fn(usize) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.exit_handler = Some(Arc::new(f));
        self
    }

    pub fn panic_handler<F: Fn(usize, Box<dyn std::any::Any + Send>) + Send + Sync + 'static>(
        mut self,
        f: F,
    ) -> Self {
        self.panic_handler = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> Result<Fabric, FabricBuildError> {
        let workers_count = self.workers_count.unwrap_or_else(|| num_cpus::get().max(1));
        let settings = FabricSettings {
            name: self.name.unwrap_or_else(|| "mn-fabric".to_string()),
            workers_count,
            coop_blocking_threshold_ms: self.coop_blocking_threshold_ms.unwrap_or(100),
            external_blocking_threshold_ms: self.external_blocking_threshold_ms.unwrap_or(10_000),
            spare_workers_count: self.spare_workers_count.unwrap_or(workers_count / 2),
            after_each_job: self.after_each_job,
        };
        Fabric::with_settings(
            settings,
            self.start_handler,
            self.exit_handler,
            self.panic_handler,
        )
    }
}

impl Default for FabricBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// State shared between the `Fabric` handle, every worker, and the sysmon
/// thread. Kept out of `Fabric` itself so workers can hold a `Weak`
/// back-reference without creating a reference cycle.
pub(crate) struct Shared {
    pub(crate) settings: FabricSettings,
    pub(crate) workers: RwLock<Vec<Arc<Worker>>>,
    pub(crate) dispatch_cursor: CachePadded<AtomicUsize>,
    pub(crate) steal_cursor: CachePadded<AtomicUsize>,
    pub(crate) logger: Logger,
    sysmon_close: AtomicBool,
    next_worker_id: AtomicUsize,
    worker_threads: Mutex<Vec<JoinHandle<()>>>,
    start_handler: Option<StartHandler>,
    exit_handler: Option<ExitHandler>,
    panic_handler: Option<PanicHandler>,
}

impl Shared {
    /// Atomic round-robin cursor over the worker vector, used as a thief's
    /// first steal probe (SPEC_FULL.md §3, §4.I); the `steal_next` ABI
    /// entry point. Subsequent probes on a miss fall back to the thief's
    /// own xorshift RNG (`worker.rs`'s `try_steal`), per SPEC_FULL.md §4.H.
    pub(crate) fn steal_next(&self, workers_len: usize) -> usize {
        self.steal_cursor.fetch_add(1, Ordering::SeqCst) % workers_len
    }
}

/// Spawns a fresh worker (struct + its own OS thread running `main_loop`),
/// registers it in `shared.workers`, and records its `JoinHandle` for
/// teardown. Used both for the initial pool and for sysmon's replacements.
fn spawn_worker(shared: &Arc<Shared>, initial: State) -> Result<Arc<Worker>, FabricBuildError> {
    let id = shared.next_worker_id.fetch_add(1, Ordering::SeqCst);
    let worker = Worker::new(
        id,
        format!("{}-{}", shared.settings.name, id),
        Arc::downgrade(shared),
        initial,
    );

    let handle_worker = Arc::clone(&worker);
    let start_handler = shared.start_handler.clone();
    let exit_handler = shared.exit_handler.clone();
    let panic_handler = shared.panic_handler.clone();
    let logger = shared.logger.clone();
    let spawned = std::thread::Builder::new()
        .name(handle_worker.name().to_string())
        .spawn(move || {
            if let Some(on_start) = &start_handler {
                // A panicking start hook is a scheduler-bookkeeping bug, not
                // user task code; abort rather than limp on half-initialized.
                let guard = AbortIfPanic;
                on_start(handle_worker.id);
                std::mem::forget(guard);
            }
            logger.log(|| Event::WorkerStarted { worker: handle_worker.id });

            let result = halt_unwinding(|| {
                Arc::clone(&handle_worker).main_loop();
            });

            logger.log(|| Event::WorkerStopped { worker: handle_worker.id });
            if let Err(payload) = result {
                match &panic_handler {
                    Some(on_panic) => {
                        let guard = AbortIfPanic;
                        on_panic(handle_worker.id, payload);
                        std::mem::forget(guard);
                    }
                    None => std::process::abort(),
                }
            }
            if let Some(on_exit) = &exit_handler {
                let guard = AbortIfPanic;
                on_exit(handle_worker.id);
                std::mem::forget(guard);
            }
        })
        .map_err(FabricBuildError::spawn_failed)?;

    shared.worker_threads.lock().unwrap().push(spawned);
    Ok(worker)
}

/// A fixed pool of cooperative workers plus the sysmon supervisor thread
/// that replaces one that appears stuck (SPEC_FULL.md §4.I).
pub struct Fabric {
    shared: Arc<Shared>,
    sysmon: Mutex<Option<JoinHandle<()>>>,
}

static GLOBAL: OnceLock<Fabric> = OnceLock::new();

impl Fabric {
    /// Builds a fabric with every setting defaulted per SPEC_FULL.md §4.I.
    pub fn new() -> Result<Fabric, FabricBuildError> {
        FabricBuilder::new().build()
    }

    fn with_settings(
        settings: FabricSettings,
        start_handler: Option<StartHandler>,
        exit_handler: Option<ExitHandler>,
        panic_handler: Option<PanicHandler>,
    ) -> Result<Fabric, FabricBuildError> {
        let logger = Logger::new();
        logger.log(|| Event::FabricStarted {
            workers: settings.workers_count,
        });

        let workers_count = settings.workers_count;
        let shared = Arc::new(Shared {
            workers: RwLock::new(Vec::with_capacity(workers_count)),
            dispatch_cursor: CachePadded::new(AtomicUsize::new(0)),
            steal_cursor: CachePadded::new(AtomicUsize::new(0)),
            sysmon_close: AtomicBool::new(false),
            next_worker_id: AtomicUsize::new(0),
            worker_threads: Mutex::new(Vec::with_capacity(workers_count)),
            start_handler,
            exit_handler,
            panic_handler,
            logger,
            settings,
        });

        // Workers start `PauseAcknowledged`, are installed as a batch, then
        // released to `Run` together (SPEC_FULL.md §4.I).
        {
            let mut workers = shared.workers.write().unwrap();
            for _ in 0..workers_count {
                workers.push(spawn_worker(&shared, State::PauseAcknowledged)?);
            }
            for worker in workers.iter() {
                worker.set_state(State::Run);
            }
        }

        let sysmon_shared = Arc::clone(&shared);
        let sysmon = std::thread::Builder::new()
            .name(format!("{}-sysmon", shared.settings.name))
            .spawn(move || sysmon_loop(sysmon_shared))
            .map_err(FabricBuildError::spawn_failed)?;

        Ok(Fabric {
            shared,
            sysmon: Mutex::new(Some(sysmon)),
        })
    }

    /// Installs this fabric as the process-wide default used by the
    /// thread-local `go`/`compute` free functions.
    ///
    /// Fails if a global fabric has already been installed.
    pub fn init_global(self) -> Result<(), FabricBuildError> {
        GLOBAL
            .set(self)
            .map_err(|_| FabricBuildError::global_already_initialized())
    }

    /// The process-wide default fabric, if one has been installed via
    /// [`Fabric::init_global`].
    pub fn global() -> Option<&'static Fabric> {
        GLOBAL.get()
    }

    pub fn settings(&self) -> &FabricSettings {
        &self.shared.settings
    }

    pub(crate) fn logger(&self) -> &Logger {
        &self.shared.logger
    }

    /// Dispatches `f` to the next worker in round-robin order.
    pub fn go<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let workers = self.shared.workers.read().unwrap();
        let idx = self.shared.dispatch_cursor.fetch_add(1, Ordering::SeqCst) % workers.len();
        let worker = &workers[idx];
        worker.push(Task::new(f));
        self.shared.logger.log(|| Event::JobPushed { worker: worker.id });
    }
}

impl Drop for Fabric {
    fn drop(&mut self) {
        self.shared.sysmon_close.store(true, Ordering::SeqCst);
        if let Some(handle) = self.sysmon.lock().unwrap().take() {
            let _ = handle.join();
        }

        let workers: Vec<Arc<Worker>> = self.shared.workers.read().unwrap().clone();
        for worker in &workers {
            worker.set_state(State::Stop);
        }
        for handle in self.shared.worker_threads.lock().unwrap().drain(..) {
            let _ = handle.join();
        }

        self.shared.logger.log(|| Event::FabricTerminated);
    }
}

/// Runs at ~1ms cadence on its own thread, harvesting paused workers and
/// replacing any that appear stuck (SPEC_FULL.md §4.I).
fn sysmon_loop(shared: Arc<Shared>) {
    let mut ready_side: Vec<Arc<Worker>> = Vec::new();
    let mut sleepy_side: Vec<Arc<Worker>> = Vec::new();

    while !shared.sysmon_close.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(1));

        // 1. Harvest: workers that acknowledged a pause either join the
        // spare pool (up to `spare_workers_count`) or get stopped.
        sleepy_side.retain(|w| {
            if w.state() == State::PauseAcknowledged {
                if ready_side.len() < shared.settings.spare_workers_count {
                    ready_side.push(Arc::clone(w));
                } else {
                    w.set_state(State::Stop);
                }
                false
            } else {
                true
            }
        });

        // 2. Scan: a worker is a replacement candidate if it has been
        // cooperatively blocked or mid-job longer than its threshold.
        let workers = shared.workers.read().unwrap().clone();
        if workers.is_empty() {
            continue;
        }
        let now = crate::block::now_millis();
        let mut candidates = Vec::new();
        for worker in &workers {
            let block_start = worker.block_start_millis();
            let job_start = worker.job_start_millis();
            let coop_stuck = block_start != 0
                && now.saturating_sub(block_start) > shared.settings.coop_blocking_threshold_ms;
            let job_stuck = job_start != 0
                && now.saturating_sub(job_start) > shared.settings.external_blocking_threshold_ms;
            if coop_stuck || job_stuck {
                candidates.push(Arc::clone(worker));
            }
        }

        // 3. Only act when the whole fabric appears stuck.
        if candidates.is_empty() || candidates.len() < workers.len() {
            continue;
        }

        // 4. Replace every candidate. A candidate stuck inside a running
        // task cannot ack a pause request on its own (it only observes
        // state between tasks), so sysmon does not spin waiting for one:
        // it requests the pause (so the worker parks itself once it does
        // return between tasks) and immediately takes over the queue under
        // the write lock, which is safe since a worker never touches its
        // own queue while a task is running.
        for candidate in candidates {
            candidate.set_state(State::PauseRequested);

            let mut workers_mut = shared.workers.write().unwrap();
            let queue = candidate.drain_queue();
            shared.logger.log(|| Event::JobUninjected { worker: candidate.id });

            let replacement = if let Some(spare) = ready_side.pop() {
                spare.adopt_queue(queue);
                spare.set_state(State::Run);
                shared.logger.log(|| Event::WorkerResumed { worker: spare.id });
                spare
            } else {
                match spawn_worker(&shared, State::PauseAcknowledged) {
                    Ok(fresh) => {
                        fresh.adopt_queue(queue);
                        fresh.set_state(State::Run);
                        fresh
                    }
                    Err(_) => {
                        // Could not spin up a replacement thread; put the
                        // queue back so no task is silently dropped and
                        // try again on the next scan.
                        candidate.adopt_queue(queue);
                        candidate.set_state(State::Run);
                        continue;
                    }
                }
            };

            if let Some(pos) = workers_mut.iter().position(|w| w.id == candidate.id) {
                workers_mut[pos] = replacement;
            }
            drop(workers_mut);

            shared.logger.log(|| Event::SysmonReplacing {
                worker: candidate.id,
                cooperative: candidate.block_start_millis() != 0,
            });
            sleepy_side.push(candidate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;
    use std::sync::Arc as StdArc;

    #[test]
    fn go_dispatches_and_runs() {
        let fabric = FabricBuilder::new().workers_count(2).build().unwrap();
        let counter = StdArc::new(StdAtomicUsize::new(0));
        let c = StdArc::clone(&counter);
        fabric.go(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let mut waited = 0;
        while counter.load(Ordering::SeqCst) == 0 && waited < 2000 {
            std::thread::sleep(Duration::from_millis(1));
            waited += 1;
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn settings_normalize_spare_workers() {
        let fabric = FabricBuilder::new().workers_count(4).build().unwrap();
        assert_eq!(fabric.settings().spare_workers_count, 2);
    }
}
