//! Batch coordination: worker pool, progress events, cancellation, summary.
//!
//! A batch runs on its own coordinator thread, which feeds a dedicated
//! [rayon](https://docs.rs/rayon) thread pool and collects one
//! [`TransmutationOutcome`] per image. The caller gets a [`BatchHandle`] back
//! immediately and observes the run through its event channel.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle ──start──▶ Running ──all outcomes in──────────▶ Completed
//!                    │
//!                    └──cancel, records left over──▶ Cancelled
//! ```
//!
//! ## Dispatch
//!
//! At most `workers` tasks are in flight. The coordinator hands out the next
//! record only after an outcome comes back and the cancel token is still clear,
//! so cancelling after N outcomes leaves exactly N images processed. A worker
//! that picks up a task after the token was set reports `Skipped` and never
//! opens the file.
//!
//! A panicking task is caught at the task boundary and reported as a `Failed`
//! outcome for that image only.
//!
//! ## Events
//!
//! [`BatchEvent::Started`] comes first. One [`BatchEvent::Progress`] then
//! follows per finished task, in completion order. The channel closes when the
//! coordinator is done, so iterating [`BatchHandle::events`] ends exactly when
//! the batch does.

use crate::imaging::{ImageBackend, Quality, RustBackend};
use crate::inventory::{ImageRecord, Inventory, InventoryError, ScanOptions};
use crate::quality::{QualityPlan, Strategy, StrategyError};
use crate::transmute::{OutcomeStatus, TransmutationOutcome, transmute};
use serde::{Serialize, Serializer};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum BatchError {
    #[error(transparent)]
    InputPath(#[from] InventoryError),
    #[error("Output directory {path} is not usable: {source}")]
    OutputPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid strategy: {0}")]
    InvalidStrategy(#[from] StrategyError),
    #[error("Worker count must be at least 1")]
    ZeroWorkers,
    #[error("Failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("Failed to spawn coordinator thread: {0}")]
    Spawn(#[source] std::io::Error),
}

const WORKER_THREAD_PREFIX: &str = "holy-compress-worker-";

/// Whether a thread name belongs to a batch pool worker.
///
/// Panics on these threads are already caught and reported as `Failed`
/// outcomes, so a binary can keep the panic hook quiet for them.
pub fn is_worker_thread(name: &str) -> bool {
    name.starts_with(WORKER_THREAD_PREFIX)
}

/// Number of workers used when none is requested: the available parallelism.
pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

// ============================================================================
// Cancellation and state
// ============================================================================

/// Cloneable cooperative cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum BatchState {
    Idle = 0,
    Running = 1,
    Completed = 2,
    Cancelled = 3,
}

impl BatchState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => BatchState::Running,
            2 => BatchState::Completed,
            3 => BatchState::Cancelled,
            _ => BatchState::Idle,
        }
    }
}

#[derive(Debug, Default)]
struct SharedState(AtomicU8);

impl SharedState {
    fn get(&self) -> BatchState {
        BatchState::from_u8(self.0.load(Ordering::SeqCst))
    }

    fn set(&self, state: BatchState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}

// ============================================================================
// Events and summary
// ============================================================================

#[derive(Debug, Clone)]
pub enum BatchEvent {
    Started {
        total: usize,
        workers: usize,
    },
    Progress {
        completed: usize,
        total: usize,
        outcome: TransmutationOutcome,
    },
}

/// Final report of one batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub state: BatchState,
    pub total_images: usize,
    pub workers: usize,
    pub succeeded: usize,
    pub partial: usize,
    pub failed: usize,
    pub skipped: usize,
    pub not_attempted: usize,
    /// Original bytes of saved images only.
    pub original_bytes: u64,
    /// Written bytes of saved images.
    pub result_bytes: u64,
    pub quality_min: Option<Quality>,
    pub quality_max: Option<Quality>,
    pub quality_mean: Option<f64>,
    #[serde(rename = "elapsed_seconds", serialize_with = "as_seconds")]
    pub elapsed: Duration,
    /// `(file name, message)` for every failed image.
    pub failures: Vec<(String, String)>,
}

fn as_seconds<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

impl BatchSummary {
    /// Images that ran to an outcome: succeeded, partial or failed.
    pub fn processed(&self) -> usize {
        self.succeeded + self.partial + self.failed
    }

    /// Images left alone because of cancellation.
    pub fn cancelled_count(&self) -> usize {
        self.skipped + self.not_attempted
    }

    pub fn saved(&self) -> usize {
        self.succeeded + self.partial
    }

    /// Size reduction across saved images, in percent.
    pub fn reduction_percent(&self) -> Option<f64> {
        if self.original_bytes == 0 {
            return None;
        }
        Some((1.0 - self.result_bytes as f64 / self.original_bytes as f64) * 100.0)
    }

    pub fn images_per_second(&self) -> Option<f64> {
        let secs = self.elapsed.as_secs_f64();
        if self.processed() == 0 || secs <= 0.0 {
            return None;
        }
        Some(self.processed() as f64 / secs)
    }
}

/// Running counters, owned by the coordinator thread.
struct Tally {
    summary: BatchSummary,
    quality_sum: u64,
    completed: usize,
}

impl Tally {
    fn new(total_images: usize, workers: usize) -> Self {
        Self {
            summary: BatchSummary {
                state: BatchState::Running,
                total_images,
                workers,
                succeeded: 0,
                partial: 0,
                failed: 0,
                skipped: 0,
                not_attempted: 0,
                original_bytes: 0,
                result_bytes: 0,
                quality_min: None,
                quality_max: None,
                quality_mean: None,
                elapsed: Duration::ZERO,
                failures: Vec::new(),
            },
            quality_sum: 0,
            completed: 0,
        }
    }

    fn record(&mut self, outcome: &TransmutationOutcome) {
        self.completed += 1;
        let s = &mut self.summary;
        match outcome.status {
            OutcomeStatus::Success => s.succeeded += 1,
            OutcomeStatus::PartialSuccess => s.partial += 1,
            OutcomeStatus::Skipped => s.skipped += 1,
            OutcomeStatus::Failed => {
                s.failed += 1;
                s.failures
                    .push((outcome.file_name(), outcome.message.clone()));
            }
        }

        if let (true, Some(size), Some(q)) = (
            outcome.status.is_saved(),
            outcome.result_size_bytes,
            outcome.quality_used,
        ) {
            s.original_bytes += outcome.original_size_bytes;
            s.result_bytes += size;
            s.quality_min = Some(s.quality_min.map_or(q, |m| m.min(q)));
            s.quality_max = Some(s.quality_max.map_or(q, |m| m.max(q)));
            self.quality_sum += q.value() as u64;
        }
    }

    fn finish(mut self, not_attempted: usize, cancelled: bool, elapsed: Duration) -> BatchSummary {
        let saved = self.summary.saved();
        if saved > 0 {
            self.summary.quality_mean = Some(self.quality_sum as f64 / saved as f64);
        }
        self.summary.not_attempted = not_attempted;
        self.summary.elapsed = elapsed;
        self.summary.state = if cancelled && self.summary.cancelled_count() > 0 {
            BatchState::Cancelled
        } else {
            BatchState::Completed
        };
        self.summary
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Configured but not yet started batch.
pub struct BatchCoordinator {
    strategy: Strategy,
    output_dir: PathBuf,
    workers: usize,
    backend: Arc<dyn ImageBackend>,
    cancel: CancelToken,
}

impl BatchCoordinator {
    /// `workers = None` uses [`default_workers`].
    pub fn new(strategy: Strategy, output_dir: impl Into<PathBuf>, workers: Option<usize>) -> Self {
        Self {
            strategy,
            output_dir: output_dir.into(),
            workers: workers.unwrap_or_else(default_workers),
            backend: Arc::new(RustBackend::new()),
            cancel: CancelToken::new(),
        }
    }

    /// Replace the image backend (tests use a mock).
    pub fn with_backend(mut self, backend: Arc<dyn ImageBackend>) -> Self {
        self.backend = backend;
        self
    }

    /// Token that cancels this batch; usable before and after `start`.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Validate, prepare the output directory and launch the run.
    ///
    /// All fatal errors surface here, before any image is touched.
    pub fn start(self, inventory: Inventory) -> Result<BatchHandle, BatchError> {
        self.strategy.validate()?;
        if self.workers == 0 {
            return Err(BatchError::ZeroWorkers);
        }
        prepare_output_dir(&self.output_dir)?;

        let average = inventory.average_size();
        let tasks = inventory
            .records
            .into_iter()
            .map(|record| {
                let plan = QualityPlan::for_record(&self.strategy, &record, average)?;
                Ok((record, plan))
            })
            .collect::<Result<Vec<_>, StrategyError>>()?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("{WORKER_THREAD_PREFIX}{i}"))
            .build()?;

        let (event_tx, event_rx) = mpsc::channel();
        let state = Arc::new(SharedState::default());

        let run = Run {
            pool,
            tasks,
            workers: self.workers,
            output_dir: self.output_dir,
            backend: self.backend,
            cancel: self.cancel.clone(),
            state: Arc::clone(&state),
            events: event_tx,
            strategy_label: self.strategy.label(),
        };
        let join = thread::Builder::new()
            .name("holy-compress-coordinator".to_string())
            .spawn(move || run.execute())
            .map_err(BatchError::Spawn)?;

        Ok(BatchHandle {
            events: event_rx,
            cancel: self.cancel,
            state,
            join,
        })
    }
}

fn prepare_output_dir(dir: &Path) -> Result<(), BatchError> {
    let unusable = |source| BatchError::OutputPath {
        path: dir.to_path_buf(),
        source,
    };
    std::fs::create_dir_all(dir).map_err(unusable)?;
    // Unnamed temp file, gone as soon as it is dropped.
    tempfile::tempfile_in(dir).map_err(unusable)?;
    Ok(())
}

/// Handle to a running batch.
pub struct BatchHandle {
    events: Receiver<BatchEvent>,
    cancel: CancelToken,
    state: Arc<SharedState>,
    join: JoinHandle<BatchSummary>,
}

impl BatchHandle {
    /// Progress events. Iteration ends when the batch is over.
    pub fn events(&self) -> &Receiver<BatchEvent> {
        &self.events
    }

    /// Stop dispatching further images. In-flight images still finish.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> BatchState {
        self.state.get()
    }

    /// Block until the batch ends and return its summary.
    pub fn wait(self) -> BatchSummary {
        match self.join.join() {
            Ok(summary) => summary,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    /// Drain every event, then wait. Returns outcomes in completion order.
    pub fn collect(self) -> (Vec<TransmutationOutcome>, BatchSummary) {
        let outcomes = self
            .events
            .iter()
            .filter_map(|event| match event {
                BatchEvent::Progress { outcome, .. } => Some(outcome),
                BatchEvent::Started { .. } => None,
            })
            .collect();
        (outcomes, self.wait())
    }
}

/// Everything the coordinator thread owns for one run.
struct Run {
    pool: rayon::ThreadPool,
    tasks: Vec<(ImageRecord, QualityPlan)>,
    workers: usize,
    output_dir: PathBuf,
    backend: Arc<dyn ImageBackend>,
    cancel: CancelToken,
    state: Arc<SharedState>,
    events: Sender<BatchEvent>,
    strategy_label: &'static str,
}

impl Run {
    fn execute(self) -> BatchSummary {
        let started = Instant::now();
        let total = self.tasks.len();
        self.state.set(BatchState::Running);
        info!(
            images = total,
            workers = self.workers,
            strategy = self.strategy_label,
            "batch started"
        );
        // A dropped receiver only means nobody is listening.
        let _ = self.events.send(BatchEvent::Started {
            total,
            workers: self.workers,
        });

        let (done_tx, done_rx) = mpsc::channel::<TransmutationOutcome>();
        let mut pending = self.tasks.iter();
        let mut in_flight = 0usize;
        let mut tally = Tally::new(total, self.workers);

        while in_flight < self.workers && !self.cancel.is_cancelled() {
            let Some(task) = pending.next() else { break };
            self.dispatch(task, &done_tx);
            in_flight += 1;
        }

        while in_flight > 0 {
            // Every dispatched task sends exactly once, and `done_tx` is still
            // alive here, so `recv` cannot disconnect.
            let Ok(outcome) = done_rx.recv() else { break };
            in_flight -= 1;
            tally.record(&outcome);
            let _ = self.events.send(BatchEvent::Progress {
                completed: tally.completed,
                total,
                outcome,
            });

            if !self.cancel.is_cancelled() {
                if let Some(task) = pending.next() {
                    self.dispatch(task, &done_tx);
                    in_flight += 1;
                }
            }
        }

        let not_attempted = pending.count();
        let cancelled = self.cancel.is_cancelled();
        let summary = tally.finish(not_attempted, cancelled, started.elapsed());
        if summary.state == BatchState::Cancelled {
            warn!(
                processed = summary.processed(),
                skipped = summary.skipped,
                not_attempted,
                "batch cancelled"
            );
        }
        info!(
            succeeded = summary.succeeded,
            partial = summary.partial,
            failed = summary.failed,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "batch finished"
        );
        self.state.set(summary.state);
        summary
    }

    fn dispatch(&self, (record, plan): &(ImageRecord, QualityPlan), done: &Sender<TransmutationOutcome>) {
        debug!(source = %record.path.display(), "dispatch");
        let record = record.clone();
        let plan = *plan;
        let output_dir = self.output_dir.clone();
        let backend = Arc::clone(&self.backend);
        let cancel = self.cancel.clone();
        let done = done.clone();

        self.pool.spawn(move || {
            let outcome = if cancel.is_cancelled() {
                TransmutationOutcome::skipped(&record)
            } else {
                run_task(backend.as_ref(), &record, &plan, &output_dir)
            };
            let _ = done.send(outcome);
        });
    }
}

/// Run one image, turning a panic into a `Failed` outcome.
fn run_task(
    backend: &dyn ImageBackend,
    record: &ImageRecord,
    plan: &QualityPlan,
    output_dir: &Path,
) -> TransmutationOutcome {
    panic::catch_unwind(AssertUnwindSafe(|| {
        transmute(backend, record, plan, output_dir)
    }))
    .unwrap_or_else(|payload| {
        let reason = panic_message(payload.as_ref());
        error!(source = %record.path.display(), reason = %reason, "worker fault");
        TransmutationOutcome::failed(record, format!("Worker fault: {reason}"))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ============================================================================
// One-call entry point
// ============================================================================

/// Everything needed to run a batch from a folder.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub strategy: Strategy,
    /// `None` uses every available core.
    pub workers: Option<usize>,
    pub scan: ScanOptions,
}

/// Scan the input folder and start a batch over it.
pub fn start(request: &BatchRequest) -> Result<BatchHandle, BatchError> {
    let inventory = crate::inventory::scan(&request.input_dir, &request.scan)?;
    BatchCoordinator::new(request.strategy, &request.output_dir, request.workers).start(inventory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::MockBackend;
    use crate::test_helpers::{assert_summary_balanced, count_status, find_outcome, list_dir};
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    fn q(v: u32) -> Quality {
        Quality::new(v)
    }

    fn target_size(kb: u64, best_effort: bool) -> Strategy {
        Strategy::TargetSize {
            target_kb: kb,
            min_quality: q(40),
            max_quality: q(95),
            save_best_effort: best_effort,
        }
    }

    fn relative() -> Strategy {
        Strategy::RelativeQuality {
            base_quality: q(80),
            min_quality: q(50),
            max_quality: q(95),
        }
    }

    /// Inventory of files that need not exist: the mock never reads them.
    fn inventory(sizes_kb: &[(&str, u64)]) -> Inventory {
        Inventory {
            root: PathBuf::from("/in"),
            records: sizes_kb
                .iter()
                .map(|(name, kb)| ImageRecord {
                    path: PathBuf::from("/in").join(name),
                    original_size_bytes: kb * 1024,
                })
                .collect(),
        }
    }

    fn five_images() -> Inventory {
        inventory(&[
            ("a.png", 300),
            ("b.png", 300),
            ("c.png", 300),
            ("d.png", 300),
            ("e.png", 300),
        ])
    }

    fn coordinator(strategy: Strategy, out: &Path, workers: usize, backend: MockBackend) -> BatchCoordinator {
        BatchCoordinator::new(strategy, out, Some(workers)).with_backend(Arc::new(backend))
    }

    // =========================================================================
    // Normal runs
    // =========================================================================

    #[test]
    fn every_image_produces_one_progress_event() {
        let tmp = TempDir::new().unwrap();
        let handle = coordinator(target_size(60, false), tmp.path(), 3, MockBackend::new())
            .start(five_images())
            .unwrap();

        let events: Vec<BatchEvent> = handle.events().iter().collect();
        assert!(matches!(
            events[0],
            BatchEvent::Started { total: 5, workers: 3 }
        ));
        let completed: Vec<usize> = events[1..]
            .iter()
            .map(|e| match e {
                BatchEvent::Progress { completed, total, .. } => {
                    assert_eq!(*total, 5);
                    *completed
                }
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(completed, vec![1, 2, 3, 4, 5]);
        assert_eq!(handle.state(), BatchState::Completed);

        let summary = handle.wait();
        assert_eq!(summary.state, BatchState::Completed);
        assert_eq!(summary.succeeded, 5);
        assert_eq!(summary.quality_min, Some(q(60)));
        assert_eq!(summary.quality_max, Some(q(60)));
        assert_eq!(summary.quality_mean, Some(60.0));
        assert_eq!(summary.result_bytes, 5 * 60 * 1024);
        assert_eq!(summary.original_bytes, 5 * 300 * 1024);
        assert_summary_balanced(&summary);
        assert_eq!(list_dir(tmp.path()).len(), 5);
    }

    #[test]
    fn relative_quality_orders_by_size() {
        let tmp = TempDir::new().unwrap();
        let inv = inventory(&[("small.png", 500), ("mid.png", 1000), ("large.png", 1500)]);
        let (outcomes, summary) = coordinator(relative(), tmp.path(), 2, MockBackend::new())
            .start(inv)
            .unwrap()
            .collect();

        let quality = |name| find_outcome(&outcomes, name).quality_used.unwrap();
        assert_eq!(quality("mid.png"), q(80));
        assert!(quality("large.png") < q(80));
        assert!(quality("small.png") > q(80));
        assert_eq!(summary.succeeded, 3);
    }

    #[test]
    fn mixed_outcomes_are_counted() {
        let tmp = TempDir::new().unwrap();
        // Fits the 60 KB target at q51 and below.
        let backend = MockBackend::with_size_curve(|q| q.value() as usize * 1200)
            .failing_decode("broken.png");
        let inv = inventory(&[("ok.png", 200), ("broken.png", 200)]);
        let (outcomes, summary) = coordinator(target_size(60, false), tmp.path(), 2, backend)
            .start(inv)
            .unwrap()
            .collect();

        assert_eq!(count_status(&outcomes, OutcomeStatus::Success), 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].0, "broken.png");
        assert_eq!(summary.original_bytes, 200 * 1024);
        assert_summary_balanced(&summary);
    }

    #[test]
    fn empty_inventory_completes_with_zero_counts() {
        let tmp = TempDir::new().unwrap();
        let (outcomes, summary) = coordinator(relative(), tmp.path(), 4, MockBackend::new())
            .start(Inventory::default())
            .unwrap()
            .collect();

        assert!(outcomes.is_empty());
        assert_eq!(summary.state, BatchState::Completed);
        assert_eq!(summary.total_images, 0);
        assert_eq!(summary.processed(), 0);
        assert_eq!(summary.quality_mean, None);
        assert_eq!(summary.reduction_percent(), None);
    }

    // =========================================================================
    // Faults
    // =========================================================================

    #[test]
    fn worker_panic_fails_only_that_image() {
        let tmp = TempDir::new().unwrap();
        let backend = MockBackend::new().panicking_on("c.png");
        let (outcomes, summary) = coordinator(target_size(90, false), tmp.path(), 2, backend)
            .start(five_images())
            .unwrap()
            .collect();

        let bad = find_outcome(&outcomes, "c.png");
        assert_eq!(bad.status, OutcomeStatus::Failed);
        assert!(bad.message.starts_with("Worker fault"), "{}", bad.message);
        assert_eq!(summary.succeeded, 4);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.state, BatchState::Completed);
    }

    #[test]
    fn tasks_run_on_recognisable_worker_threads() {
        let tmp = TempDir::new().unwrap();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let backend = MockBackend::new().on_decode(move |_| {
            let name = thread::current().name().unwrap_or_default().to_string();
            sink.lock().unwrap().push(name);
        });

        coordinator(relative(), tmp.path(), 2, backend)
            .start(five_images())
            .unwrap()
            .wait();

        let names = seen.lock().unwrap();
        assert_eq!(names.len(), 5);
        assert!(names.iter().all(|n| is_worker_thread(n)), "{names:?}");
        assert!(!is_worker_thread("holy-compress-coordinator"));
        assert!(!is_worker_thread("main"));
    }

    // =========================================================================
    // Cancellation
    // =========================================================================

    #[test]
    fn cancel_after_two_completions_processes_exactly_two() {
        let tmp = TempDir::new().unwrap();
        let coord = BatchCoordinator::new(target_size(90, false), tmp.path(), Some(1));
        let token = coord.cancel_token();
        let decoded = AtomicUsize::new(0);
        let backend = MockBackend::new().on_decode(move |_| {
            if decoded.fetch_add(1, Ordering::SeqCst) + 1 == 2 {
                token.cancel();
            }
        });

        let (outcomes, summary) = coord
            .with_backend(Arc::new(backend))
            .start(five_images())
            .unwrap()
            .collect();

        assert_eq!(outcomes.len(), 2);
        assert_eq!(summary.processed(), 2);
        assert_eq!(summary.not_attempted, 3);
        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.state, BatchState::Cancelled);
        assert_eq!(list_dir(tmp.path()).len(), 2);
        assert_summary_balanced(&summary);
    }

    #[test]
    fn cancel_before_start_touches_nothing() {
        let tmp = TempDir::new().unwrap();
        let backend = Arc::new(MockBackend::new());
        let coord = BatchCoordinator::new(relative(), tmp.path(), Some(2))
            .with_backend(backend.clone());
        coord.cancel_token().cancel();

        let (outcomes, summary) = coord.start(five_images()).unwrap().collect();

        assert!(outcomes.is_empty());
        assert_eq!(summary.state, BatchState::Cancelled);
        assert_eq!(summary.not_attempted, 5);
        assert_eq!(summary.cancelled_count(), 5);
        assert!(backend.get_operations().is_empty());
        assert!(list_dir(tmp.path()).is_empty());
    }

    #[test]
    fn queued_task_is_skipped_when_cancel_lands_first() {
        let tmp = TempDir::new().unwrap();
        let backend = Arc::new(MockBackend::new());
        let (events, _events_rx) = mpsc::channel();
        let run = Run {
            pool: rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap(),
            tasks: Vec::new(),
            workers: 1,
            output_dir: tmp.path().to_path_buf(),
            backend: backend.clone(),
            cancel: CancelToken::new(),
            state: Arc::new(SharedState::default()),
            events,
            strategy_label: "fixed",
        };

        // Hold the only pool thread so the dispatched task has to queue.
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        run.pool.spawn(move || {
            let _ = gate_rx.recv();
        });
        let (done_tx, done_rx) = mpsc::channel();
        let record = ImageRecord {
            path: PathBuf::from("/in/late.png"),
            original_size_bytes: 100 * 1024,
        };
        run.dispatch(&(record, QualityPlan::Fixed(q(70))), &done_tx);
        run.cancel.cancel();
        gate_tx.send(()).unwrap();

        let outcome = done_rx.recv().unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Skipped);
        assert_eq!(outcome.message, "Skipped: batch cancelled");
        assert!(outcome.output_path.is_none());
        assert!(backend.get_operations().is_empty());
        assert!(list_dir(tmp.path()).is_empty());

        let mut tally = Tally::new(2, 1);
        tally.record(&outcome);
        let summary = tally.finish(1, true, Duration::ZERO);
        assert_eq!(summary.state, BatchState::Cancelled);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.cancelled_count(), 2);
        assert_summary_balanced(&summary);
    }

    #[test]
    fn cancel_after_last_dispatch_still_completes() {
        let tmp = TempDir::new().unwrap();
        let handle = coordinator(relative(), tmp.path(), 2, MockBackend::new())
            .start(inventory(&[("only.png", 10)]))
            .unwrap();
        let outcomes: Vec<_> = handle.events().iter().collect();
        handle.cancel();

        let summary = handle.wait();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(summary.state, BatchState::Completed);
        assert_eq!(summary.succeeded, 1);
    }

    // =========================================================================
    // Fatal errors
    // =========================================================================

    #[test]
    fn invalid_strategy_is_rejected_before_dispatch() {
        let tmp = TempDir::new().unwrap();
        let strategy = Strategy::TargetSize {
            target_kb: 100,
            min_quality: q(90),
            max_quality: q(20),
            save_best_effort: true,
        };
        let result = coordinator(strategy, tmp.path(), 1, MockBackend::new()).start(five_images());
        assert!(matches!(result, Err(BatchError::InvalidStrategy(_))));
    }

    #[test]
    fn zero_workers_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let result = coordinator(relative(), tmp.path(), 0, MockBackend::new()).start(five_images());
        assert!(matches!(result, Err(BatchError::ZeroWorkers)));
    }

    #[test]
    fn output_dir_is_created_when_missing() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("nested/out");
        let (_, summary) = coordinator(relative(), &out, 1, MockBackend::new())
            .start(inventory(&[("x.png", 5)]))
            .unwrap()
            .collect();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(list_dir(&out).len(), 1);
    }

    #[test]
    fn output_below_a_regular_file_is_output_path_error() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("occupied");
        std::fs::write(&file, b"x").unwrap();

        let result = coordinator(relative(), &file.join("out"), 1, MockBackend::new())
            .start(five_images());
        assert!(matches!(result, Err(BatchError::OutputPath { .. })));
    }

    // =========================================================================
    // Summary helpers
    // =========================================================================

    #[test]
    fn summary_serializes_elapsed_as_seconds() {
        let mut tally = Tally::new(0, 1);
        tally.summary.failures.push(("a.png".into(), "boom".into()));
        let summary = tally.finish(0, false, Duration::from_millis(1500));

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["elapsed_seconds"], 1.5);
        assert_eq!(json["state"], "completed");
        assert_eq!(json["failures"][0][0], "a.png");
    }

    #[test]
    fn panic_message_reads_str_and_string_payloads() {
        let s: Box<dyn Any + Send> = Box::new("static");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let other: Box<dyn Any + Send> = Box::new(7u32);
        assert_eq!(panic_message(s.as_ref()), "static");
        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }
}
