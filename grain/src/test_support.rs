//! Stages and helpers shared by unit tests.

use crate::deferred::Deferred;
use crate::errors::GrainResult;
use crate::stage::Stage;
use parking_lot::{Condvar, Mutex};
use std::future::IntoFuture;
use std::sync::Arc;
use std::sync::Once;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

static INIT_LOGGING: Once = Once::new();

/// Route test output through the test writer, once per process.
pub(crate) fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .with_ansi(false)
            .try_init();
    });
}

/// Block the test thread until the deferred resolves.
pub(crate) fn await_deferred<T: Send + 'static>(deferred: Deferred<T>) -> GrainResult<T> {
    futures::executor::block_on(deferred.into_future())
}

/// Poll `condition` until it holds or `timeout` elapses.
pub(crate) fn eventually(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Externally released latch.
#[derive(Clone, Default)]
pub(crate) struct Gate {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Gate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn open(&self) {
        let (open, cv) = &*self.inner;
        *open.lock() = true;
        cv.notify_all();
    }

    pub(crate) fn wait(&self) {
        let (open, cv) = &*self.inner;
        let mut open = open.lock();
        while !*open {
            cv.wait(&mut open);
        }
    }
}

/// Counts down to zero one synchronous step at a time, then yields `value`.
#[derive(Debug)]
pub(crate) struct Countdown {
    remaining: u32,
    value: u32,
    advanced: Option<Arc<AtomicUsize>>,
}

impl Countdown {
    pub(crate) fn new(steps: u32, value: u32) -> Self {
        Self {
            remaining: steps,
            value,
            advanced: None,
        }
    }

    pub(crate) fn finished(value: u32) -> Self {
        Self::new(0, value)
    }

    /// Count every `advance` call into `advanced`.
    pub(crate) fn with_counter(mut self, advanced: Arc<AtomicUsize>) -> Self {
        self.advanced = Some(advanced);
        self
    }

    pub(crate) fn remaining(&self) -> u32 {
        self.remaining
    }
}

impl Stage for Countdown {
    type Output = u32;

    fn advance(self) -> Option<Deferred<Self>> {
        if self.remaining == 0 {
            return None;
        }
        if let Some(advanced) = &self.advanced {
            advanced.fetch_add(1, Ordering::SeqCst);
        }
        Some(Deferred::value(Countdown {
            remaining: self.remaining - 1,
            ..self
        }))
    }

    fn into_result(self) -> Result<u32, Self> {
        if self.remaining == 0 {
            Ok(self.value)
        } else {
            Err(self)
        }
    }
}

/// Every step fails unless the stage was healed right before it.
pub(crate) struct Flaky {
    done: u32,
    total: u32,
    broken: bool,
    attempts: Arc<AtomicUsize>,
}

impl Flaky {
    pub(crate) fn new(total: u32) -> Self {
        Self {
            done: 0,
            total,
            broken: true,
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn with_attempts(mut self, attempts: Arc<AtomicUsize>) -> Self {
        self.attempts = attempts;
        self
    }

    pub(crate) fn healed(mut self) -> Self {
        self.broken = false;
        self
    }
}

impl Stage for Flaky {
    type Output = u32;

    fn advance(self) -> Option<Deferred<Self>> {
        if self.done == self.total {
            return None;
        }
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.broken {
            return Some(Deferred::failed(
                anyhow::anyhow!("flaky step {} failed", self.done).into(),
            ));
        }
        Some(Deferred::value(Flaky {
            done: self.done + 1,
            broken: true,
            ..self
        }))
    }

    fn into_result(self) -> Result<u32, Self> {
        if self.done == self.total {
            Ok(self.done)
        } else {
            Err(self)
        }
    }
}

pub(crate) type StartLog = Arc<Mutex<Vec<String>>>;

/// One asynchronous step that completes when its gate opens.
///
/// The step's work happens on a helper thread, like an I/O callback would.
pub(crate) enum GatedStage {
    Waiting {
        name: String,
        gate: Gate,
        log: Option<StartLog>,
        fail: bool,
    },
    Done(String),
}

impl GatedStage {
    pub(crate) fn new(name: &str, gate: Gate) -> Self {
        GatedStage::Waiting {
            name: name.to_string(),
            gate,
            log: None,
            fail: false,
        }
    }

    /// Record the stage name in `log` when its step starts.
    pub(crate) fn logged(self, log: &StartLog) -> Self {
        match self {
            GatedStage::Waiting { name, gate, fail, .. } => GatedStage::Waiting {
                name,
                gate,
                log: Some(Arc::clone(log)),
                fail,
            },
            done => done,
        }
    }

    /// Fail instead of completing once the gate opens.
    pub(crate) fn failing(self) -> Self {
        match self {
            GatedStage::Waiting { name, gate, log, .. } => GatedStage::Waiting {
                name,
                gate,
                log,
                fail: true,
            },
            done => done,
        }
    }
}

impl Stage for GatedStage {
    type Output = String;

    fn advance(self) -> Option<Deferred<Self>> {
        match self {
            GatedStage::Waiting {
                name,
                gate,
                log,
                fail,
            } => {
                if let Some(log) = log {
                    log.lock().push(name.clone());
                }
                Some(Deferred::future(move |resolver| {
                    std::thread::spawn(move || {
                        gate.wait();
                        if fail {
                            resolver.fail(anyhow::anyhow!("{name} failed").into());
                        } else {
                            resolver.succeed(GatedStage::Done(name));
                        }
                    });
                }))
            }
            GatedStage::Done(_) => None,
        }
    }

    fn into_result(self) -> Result<String, Self> {
        match self {
            GatedStage::Done(name) => Ok(name),
            waiting => Err(waiting),
        }
    }
}
