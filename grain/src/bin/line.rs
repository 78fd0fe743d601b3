//! Drives simulated batch jobs through a production line or in sequence.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::{Parser, ValueEnum};
use grain::{
    Deferred, Environment, Executor, ExecutorEnvironment, FailurePolicy, GrainError,
    GrainOptions, Outcome, ProductionLine, Stage, ThreadPool, init_logging, serially,
};
use tokio::runtime::Handle;

#[derive(Parser, Debug)]
#[command(name = "grain-line", version, about = "Run simulated stages through grain")]
struct Cli {
    /// JSON options file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of stages to run
    #[arg(long, default_value_t = 8)]
    stages: usize,

    /// Concurrently active stages (overrides the config)
    #[arg(long)]
    max_active: Option<usize>,

    /// Steps per stage
    #[arg(long, default_value_t = 3)]
    steps: u32,

    /// Simulated latency of every step
    #[arg(long, default_value_t = 50)]
    step_ms: u64,

    /// Run the stages one after another instead of through the line
    #[arg(long)]
    serial: bool,

    /// Failure handling for --serial (overrides the config)
    #[arg(long, value_enum)]
    policy: Option<PolicyArg>,

    /// Make the stage with this index fail on its last step
    #[arg(long)]
    fail_stage: Option<usize>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PolicyArg {
    FailFast,
    CollectAll,
}

impl From<PolicyArg> for FailurePolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::FailFast => FailurePolicy::FailFast,
            PolicyArg::CollectAll => FailurePolicy::CollectAll,
        }
    }
}

/// A job whose every step waits on a timer.
enum Batch {
    Step {
        id: usize,
        remaining: u32,
        delay: Duration,
        fails: bool,
        timers: Handle,
    },
    Done {
        id: usize,
        elapsed: Duration,
    },
}

struct Finished {
    id: usize,
    elapsed: Duration,
}

impl Stage for Batch {
    type Output = Finished;

    fn advance(self) -> Option<Deferred<Self>> {
        let Batch::Step {
            id,
            remaining,
            delay,
            fails,
            timers,
        } = self
        else {
            return None;
        };

        let started = Instant::now();
        Some(Deferred::future(move |resolver| {
            let spawner = timers.clone();
            spawner.spawn(async move {
                tokio::time::sleep(delay).await;
                tracing::trace!(id, remaining, "Batch step finished");
                if remaining > 1 {
                    resolver.succeed(Batch::Step {
                        id,
                        remaining: remaining - 1,
                        delay,
                        fails,
                        timers,
                    });
                } else if fails {
                    resolver.fail(anyhow::anyhow!("batch {id} failed on its last step").into());
                } else {
                    resolver.succeed(Batch::Done {
                        id,
                        elapsed: started.elapsed(),
                    });
                }
            });
        }))
    }

    fn into_result(self) -> Result<Finished, Self> {
        match self {
            Batch::Done { id, elapsed } => Ok(Finished { id, elapsed }),
            step => Err(step),
        }
    }
}

fn report(outcomes: Vec<Outcome<Finished>>) -> usize {
    let mut failures = 0;
    for produced in outcomes {
        match produced() {
            Ok(finished) => println!(
                "stage {:>3}  ok      last step {:>5} ms",
                finished.id,
                finished.elapsed.as_millis()
            ),
            Err(e) => {
                failures += 1;
                println!("stage   ?  failed  {e}");
            }
        }
    }
    failures
}

async fn run_line(
    options: &GrainOptions,
    stages: Vec<Batch>,
    env: Arc<dyn Environment<Batch>>,
) -> Result<Vec<Outcome<Finished>>> {
    let total = stages.len();
    let line = ProductionLine::from_options(&options.production_line, env)?;
    line.add_all(stages);

    loop {
        let status = line.status().await?;
        tracing::debug!(
            active = status.active,
            pending = status.pending,
            completed = status.completed,
            "Line status"
        );
        if status.completed == total {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let outcomes = line.drain_completed().await?;
    println!("metrics: {}", serde_json::to_string(&line.metrics())?);
    Ok(outcomes)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut options = match &cli.config {
        Some(path) => GrainOptions::from_json_file(path)?,
        None => GrainOptions::default(),
    };
    if let Some(max_active) = cli.max_active {
        options.production_line.max_active = max_active;
    }
    if let Some(policy) = cli.policy {
        options.serial.failure_policy = policy.into();
    }
    options.sanitize()?;
    init_logging(&options.logging)?;

    if cli.steps == 0 {
        return Err(GrainError::Config("--steps must be greater than zero".into()).into());
    }

    let pool: Arc<dyn Executor> = Arc::new(ThreadPool::new(&options.thread_pool)?);
    let env: Arc<dyn Environment<Batch>> = Arc::new(ExecutorEnvironment::new(pool));
    let timers = Handle::current();
    let stages: Vec<Batch> = (0..cli.stages)
        .map(|id| Batch::Step {
            id,
            remaining: cli.steps,
            delay: Duration::from_millis(cli.step_ms),
            fails: cli.fail_stage == Some(id),
            timers: timers.clone(),
        })
        .collect();

    tracing::info!(
        stages = cli.stages,
        serial = cli.serial,
        max_active = options.production_line.max_active,
        "Running stages"
    );
    let started = Instant::now();

    let outcomes = if cli.serial {
        serially(stages, env, options.serial.failure_policy).await?
    } else {
        run_line(&options, stages, env).await?
    };

    let finished = outcomes.len();
    let failures = report(outcomes);
    println!(
        "{finished} of {} stages finished, {failures} failed, {} ms total",
        cli.stages,
        started.elapsed().as_millis()
    );
    Ok(())
}
