use super::metrics::{LineMetrics, LineMetricsStorage};
use crate::deferred::{Deferred, Outcome};
use crate::environment::Environment;
use crate::errors::GrainResult;
use crate::executor::{Executor, SerialQueue};
use crate::options::ProductionLineOptions;
use crate::stage::{Stage, execute};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// Counts describing a line at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LineStatus {
    pub pending: usize,
    pub active: usize,
    pub completed: usize,
    /// Commands submitted to the line that have not been applied yet.
    pub queued_commands: usize,
    pub suspended: bool,
}

/// Bookkeeping owned by the serialization queue.
///
/// Only jobs running on the line's queue mutate it. The lock is never held
/// while a stage starts.
struct LineState<S: Stage> {
    pending: VecDeque<S>,
    active: HashSet<u64>,
    completed: Vec<Outcome<S::Output>>,
    next_ticket: u64,
}

struct LineShared<S: Stage> {
    max_active: usize,
    env: Arc<dyn Environment<S>>,
    queue: SerialQueue,
    state: Mutex<LineState<S>>,
    metrics: LineMetricsStorage,
}

impl<S: Stage> LineShared<S> {
    fn status(&self) -> LineStatus {
        let state = self.state.lock();
        LineStatus {
            pending: state.pending.len(),
            active: state.active.len(),
            completed: state.completed.len(),
            queued_commands: self.queue.queued(),
            suspended: self.queue.is_suspended(),
        }
    }

    /// Start pending stages until the line is full. Runs on the queue.
    fn admit(self: &Arc<Self>) {
        let ready: Vec<(u64, S)> = {
            let mut state = self.state.lock();
            let mut ready = Vec::new();
            while state.active.len() < self.max_active {
                let Some(stage) = state.pending.pop_front() else {
                    break;
                };
                let ticket = state.next_ticket;
                state.next_ticket += 1;
                state.active.insert(ticket);
                ready.push((ticket, stage));
            }
            ready
        };

        for (ticket, stage) in ready {
            self.start(ticket, stage);
        }
    }

    fn start(self: &Arc<Self>, ticket: u64, stage: S) {
        tracing::debug!(line = self.queue.label(), ticket, "Starting stage");
        self.metrics.record_started();

        let shared = Arc::clone(self);
        let completion: Arc<dyn Executor> = Arc::new(self.queue.clone());
        execute(
            stage,
            Arc::clone(&self.env),
            Some(completion),
            move |outcome| shared.complete(ticket, outcome),
        );
    }

    /// Record a finished stage and refill the freed slot. Runs on the queue.
    fn complete(self: &Arc<Self>, ticket: u64, outcome: Outcome<S::Output>) {
        {
            let mut state = self.state.lock();
            if !state.active.remove(&ticket) {
                tracing::warn!(ticket, "Completion for unknown stage ticket");
            }
            state.completed.push(outcome);
        }
        self.metrics.record_completed();
        tracing::debug!(line = self.queue.label(), ticket, "Stage completed");
        self.admit();
    }
}

/// Bounded-concurrency scheduler for stages.
///
/// At most `max_active` stages run at once; the rest wait in FIFO order and
/// start as running stages complete. Outcomes are kept in completion order
/// and are not materialized by the line, so a failed stage's error surfaces
/// only when its outcome is called.
///
/// Every change to the line's bookkeeping is applied by one [`SerialQueue`].
/// [`ProductionLine::suspend`] pauses that queue, which holds back new
/// activations while running stages keep going.
pub struct ProductionLine<S: Stage> {
    shared: Arc<LineShared<S>>,
}

impl<S: Stage> ProductionLine<S> {
    pub fn new(max_active: usize, env: Arc<dyn Environment<S>>) -> GrainResult<Self> {
        let options = ProductionLineOptions {
            max_active,
            ..Default::default()
        };
        Self::from_options(&options, env)
    }

    pub fn from_options(
        options: &ProductionLineOptions,
        env: Arc<dyn Environment<S>>,
    ) -> GrainResult<Self> {
        options.sanitize()?;
        let queue = SerialQueue::new(options.label.clone())?;
        tracing::debug!(
            line = %options.label,
            max_active = options.max_active,
            "Production line created"
        );

        Ok(Self {
            shared: Arc::new(LineShared {
                max_active: options.max_active,
                env,
                queue,
                state: Mutex::new(LineState {
                    pending: VecDeque::new(),
                    active: HashSet::new(),
                    completed: Vec::new(),
                    next_ticket: 0,
                }),
                metrics: LineMetricsStorage::default(),
            }),
        })
    }

    pub fn max_active(&self) -> usize {
        self.shared.max_active
    }

    /// Submit one stage.
    pub fn add(&self, stage: S) {
        self.add_all(std::iter::once(stage));
    }

    /// Submit stages in order; they are admitted in that order.
    pub fn add_all(&self, stages: impl IntoIterator<Item = S>) {
        let stages: Vec<S> = stages.into_iter().collect();
        if stages.is_empty() {
            return;
        }
        self.shared.metrics.record_submitted(stages.len() as u64);

        let shared = Arc::clone(&self.shared);
        self.shared.queue.dispatch(Box::new(move || {
            {
                let mut state = shared.state.lock();
                tracing::trace!(
                    count = stages.len(),
                    pending = state.pending.len(),
                    "Stages submitted"
                );
                state.pending.extend(stages);
            }
            shared.admit();
        }));
    }

    /// Hold back activations until a matching [`ProductionLine::resume`].
    pub fn suspend(&self) {
        tracing::debug!(line = self.shared.queue.label(), "Suspending production line");
        self.shared.queue.suspend();
    }

    pub fn resume(&self) {
        tracing::debug!(line = self.shared.queue.label(), "Resuming production line");
        self.shared.queue.resume();
    }

    pub fn is_suspended(&self) -> bool {
        self.shared.queue.is_suspended()
    }

    /// Discard every stage that has not started. Running stages are unaffected.
    pub fn clear_pending(&self) {
        let shared = Arc::clone(&self.shared);
        self.shared.queue.dispatch(Box::new(move || {
            let cleared = std::mem::take(&mut shared.state.lock().pending).len();
            shared.metrics.record_cleared(cleared as u64);
            tracing::debug!(cleared, "Cleared pending stages");
        }));
    }

    /// Status observed by the queue once every earlier command has been applied.
    ///
    /// The request is queued when the returned deferred is performed.
    pub fn status(&self) -> Deferred<LineStatus> {
        let shared = Arc::clone(&self.shared);
        Deferred::future(move |resolver| {
            let queue = shared.queue.clone();
            queue.dispatch(Box::new(move || resolver.succeed(shared.status())));
        })
    }

    /// Immediate counts, possibly behind commands still waiting on the queue.
    pub fn snapshot(&self) -> LineStatus {
        self.shared.status()
    }

    /// Take every outcome collected so far, in completion order.
    pub fn drain_completed(&self) -> Deferred<Vec<Outcome<S::Output>>> {
        let shared = Arc::clone(&self.shared);
        Deferred::future(move |resolver| {
            let queue = shared.queue.clone();
            queue.dispatch(Box::new(move || {
                let completed = std::mem::take(&mut shared.state.lock().completed);
                resolver.succeed(completed);
            }));
        })
    }

    pub fn metrics(&self) -> LineMetrics {
        self.shared.metrics.snapshot()
    }
}

impl<S: Stage> Drop for ProductionLine<S> {
    fn drop(&mut self) {
        // A suspended queue never drains the jobs that keep the line alive.
        while self.shared.queue.is_suspended() {
            self.shared.queue.resume();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::ExecutorEnvironment;
    use crate::errors::GrainError;
    use crate::executor::{Inline, ThreadPool};
    use crate::options::ThreadPoolOptions;
    use crate::test_support::{
        Gate, GatedStage, StartLog, await_deferred, eventually, init_test_logging,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    fn inline_env<S: Stage>() -> Arc<dyn Environment<S>> {
        Arc::new(ExecutorEnvironment::new(Arc::new(Inline)))
    }

    fn gated(names: &[&str], log: &StartLog) -> (Vec<GatedStage>, Vec<Gate>) {
        names
            .iter()
            .map(|name| {
                let gate = Gate::new();
                (GatedStage::new(name, gate.clone()).logged(log), gate)
            })
            .unzip()
    }

    fn started(log: &StartLog) -> Vec<String> {
        log.lock().clone()
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = ProductionLine::<GatedStage>::new(0, inline_env());
        assert!(matches!(result, Err(GrainError::Config(_))));
    }

    #[test]
    fn test_releases_activate_pending_in_fifo_order() {
        init_test_logging();
        let log = StartLog::default();
        let (stages, gates) = gated(&["A", "B", "C", "D"], &log);
        let line = ProductionLine::new(2, inline_env()).unwrap();

        line.add_all(stages);
        let status = await_deferred(line.status()).unwrap();
        assert_eq!((status.active, status.pending), (2, 2));
        assert_eq!(started(&log), vec!["A", "B"]);

        gates[0].open();
        assert!(eventually(WAIT, || started(&log).len() == 3));
        assert_eq!(started(&log), vec!["A", "B", "C"]);
        let status = await_deferred(line.status()).unwrap();
        assert_eq!((status.active, status.pending, status.completed), (2, 1, 1));

        gates[1].open();
        assert!(eventually(WAIT, || started(&log).len() == 4));
        assert_eq!(started(&log), vec!["A", "B", "C", "D"]);

        gates[2].open();
        gates[3].open();
        assert!(eventually(WAIT, || line.snapshot().completed == 4));

        let names: Vec<String> = await_deferred(line.drain_completed())
            .unwrap()
            .into_iter()
            .map(|produced| produced().unwrap())
            .collect();
        assert_eq!(&names[..2], &["A".to_string(), "B".to_string()]);
        assert_eq!(names.len(), 4);
        assert_eq!(line.snapshot().completed, 0);
    }

    #[test]
    fn test_more_stages_than_capacity_stay_pending() {
        let log = StartLog::default();
        let names = ["s0", "s1", "s2", "s3", "s4", "s5", "s6"];
        let (stages, gates) = gated(&names, &log);
        let line = ProductionLine::new(3, inline_env()).unwrap();

        for stage in stages {
            line.add(stage);
        }
        let status = await_deferred(line.status()).unwrap();
        assert_eq!(status.active, 3);
        assert_eq!(status.pending, 4);

        gates[1].open();
        assert!(eventually(WAIT, || started(&log).len() == 4));
        assert_eq!(started(&log)[3], "s3");

        for gate in &gates {
            gate.open();
        }
        assert!(eventually(WAIT, || line.snapshot().completed == names.len()));
        let metrics = line.metrics();
        assert_eq!(metrics.submitted, 7);
        assert_eq!(metrics.started, 7);
        assert!(eventually(WAIT, || line.metrics().completed == 7));
    }

    #[test]
    fn test_suspend_blocks_activation_until_resume() {
        let log = StartLog::default();
        let (stages, gates) = gated(&["A", "B"], &log);
        let line = ProductionLine::new(1, inline_env()).unwrap();
        let mut stages = stages.into_iter();

        line.add(stages.next().unwrap());
        await_deferred(line.status()).unwrap();
        assert_eq!(started(&log), vec!["A"]);

        line.suspend();
        assert!(line.is_suspended());
        line.add_all(stages);
        gates[0].open();

        // A completes, but its slot stays empty while suspended.
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(started(&log), vec!["A"]);
        assert!(line.snapshot().queued_commands >= 1);

        line.resume();
        assert!(eventually(WAIT, || started(&log).len() == 2));
        assert_eq!(started(&log), vec!["A", "B"]);

        gates[1].open();
        assert!(eventually(WAIT, || line.snapshot().completed == 2));
    }

    #[test]
    fn test_clear_pending_leaves_active_running() {
        let log = StartLog::default();
        let (stages, gates) = gated(&["A", "B", "C"], &log);
        let line = ProductionLine::new(1, inline_env()).unwrap();

        line.add_all(stages);
        line.clear_pending();
        let status = await_deferred(line.status()).unwrap();
        assert_eq!((status.active, status.pending), (1, 0));
        assert_eq!(line.metrics().cleared, 2);

        gates[0].open();
        assert!(eventually(WAIT, || line.snapshot().completed == 1));
        let status = await_deferred(line.status()).unwrap();
        assert_eq!((status.active, status.pending), (0, 0));
        assert_eq!(started(&log), vec!["A"]);
    }

    #[test]
    fn test_failed_outcome_stays_inert_until_called() {
        let log = StartLog::default();
        let gate = Gate::new();
        gate.open();
        let line = ProductionLine::new(1, inline_env()).unwrap();

        line.add(GatedStage::new("broken", gate).logged(&log).failing());
        assert!(eventually(WAIT, || line.snapshot().completed == 1));

        let mut outcomes = await_deferred(line.drain_completed()).unwrap();
        assert_eq!(outcomes.len(), 1);
        let produced = outcomes.pop().unwrap();
        assert!(matches!(produced(), Err(GrainError::Stage(_))));
    }

    /// Counts how many instances are inside their asynchronous step at once.
    enum Tracked {
        Ready {
            running: Arc<AtomicUsize>,
            peak: Arc<AtomicUsize>,
        },
        Done,
    }

    impl Stage for Tracked {
        type Output = ();

        fn advance(self) -> Option<Deferred<Self>> {
            match self {
                Tracked::Ready { running, peak } => {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    Some(Deferred::future(move |resolver| {
                        std::thread::spawn(move || {
                            std::thread::sleep(Duration::from_millis(2));
                            running.fetch_sub(1, Ordering::SeqCst);
                            resolver.succeed(Tracked::Done);
                        });
                    }))
                }
                Tracked::Done => None,
            }
        }

        fn into_result(self) -> Result<(), Self> {
            match self {
                Tracked::Done => Ok(()),
                ready => Err(ready),
            }
        }
    }

    #[test]
    fn test_active_never_exceeds_capacity_under_concurrent_submission() {
        let pool = Arc::new(ThreadPool::new(&ThreadPoolOptions::default()).unwrap());
        let env: Arc<dyn Environment<Tracked>> = Arc::new(ExecutorEnvironment::new(pool));
        let line = ProductionLine::new(3, env).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..10 {
                        line.add(Tracked::Ready {
                            running: Arc::clone(&running),
                            peak: Arc::clone(&peak),
                        });
                        assert!(line.snapshot().active <= 3);
                    }
                });
            }
        });

        assert!(eventually(WAIT, || line.snapshot().completed == 40));
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 1);
        assert_eq!(line.metrics().submitted, 40);
    }
}
