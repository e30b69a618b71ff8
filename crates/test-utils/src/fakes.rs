use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::watch;

use sheetflow::pool::{ProgressObserver, TaskEvent};
use sheetflow::process::{effective_input, BoxFuture, ProcessContext, ProcessOutput, Processor};
use sheetflow::task::Task;

/// A fake processor that:
/// - records which task ids were processed, in call order
/// - returns `"<prefix><input>"` for every task
/// - optionally sleeps per call, and tracks peak concurrency
#[derive(Debug, Default)]
pub struct RecordingProcessor {
    prefix: String,
    delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl RecordingProcessor {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Highest number of calls that were in progress at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Processor for RecordingProcessor {
    fn name(&self) -> &str {
        "recording"
    }

    fn process<'a>(
        &'a self,
        task: &'a Task,
        ctx: &'a ProcessContext,
    ) -> BoxFuture<'a, anyhow::Result<ProcessOutput>> {
        Box::pin(async move {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.calls.lock().unwrap().push(task.task_id.clone());

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let result = effective_input(task, ctx)
                .map(|input| ProcessOutput::new(format!("{}{}", self.prefix, input)));

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        })
    }
}

/// Fails selected tasks a fixed number of times before succeeding.
///
/// `usize::MAX` failures means "always fail".
#[derive(Debug, Default)]
pub struct FlakyProcessor {
    failures: HashMap<String, usize>,
    attempts: Mutex<HashMap<String, usize>>,
}

impl FlakyProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, task_id: &str, times: usize) -> Self {
        self.failures.insert(task_id.to_string(), times);
        self
    }

    pub fn always_failing(self, task_id: &str) -> Self {
        self.failing(task_id, usize::MAX)
    }

    pub fn attempts(&self, task_id: &str) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .get(task_id)
            .copied()
            .unwrap_or(0)
    }
}

impl Processor for FlakyProcessor {
    fn name(&self) -> &str {
        "flaky"
    }

    fn process<'a>(
        &'a self,
        task: &'a Task,
        ctx: &'a ProcessContext,
    ) -> BoxFuture<'a, anyhow::Result<ProcessOutput>> {
        Box::pin(async move {
            let attempt = {
                let mut attempts = self.attempts.lock().unwrap();
                let n = attempts.entry(task.task_id.clone()).or_insert(0);
                *n += 1;
                *n
            };
            let allowed_failures = self.failures.get(&task.task_id).copied().unwrap_or(0);
            if attempt <= allowed_failures {
                return Err(anyhow!("simulated failure #{attempt} for {}", task.task_id));
            }
            let input = effective_input(task, ctx)?;
            Ok(ProcessOutput::new(input.to_lowercase()))
        })
    }
}

/// Blocks every call until the gate is opened.
///
/// Lets a test hold tasks in `processing` while it pauses, stops or
/// inspects the pool.
#[derive(Debug)]
pub struct GatedProcessor {
    gate: watch::Receiver<bool>,
    started: Mutex<HashSet<String>>,
    started_count: watch::Sender<usize>,
}

/// Opens a [`GatedProcessor`]'s gate and observes how many calls started.
#[derive(Debug, Clone)]
pub struct Gate {
    open: Arc<watch::Sender<bool>>,
    started: watch::Receiver<usize>,
}

impl Gate {
    pub fn open(&self) {
        self.open.send_replace(true);
    }

    /// Wait until at least `n` calls have started.
    pub async fn wait_started(&mut self, n: usize) {
        self.started
            .wait_for(|count| *count >= n)
            .await
            .expect("gated processor dropped");
    }
}

impl GatedProcessor {
    pub fn new() -> (Self, Gate) {
        let (open_tx, open_rx) = watch::channel(false);
        let (started_tx, started_rx) = watch::channel(0usize);
        let processor = Self {
            gate: open_rx,
            started: Mutex::new(HashSet::new()),
            started_count: started_tx,
        };
        let gate = Gate {
            open: Arc::new(open_tx),
            started: started_rx,
        };
        (processor, gate)
    }

    pub fn started(&self) -> HashSet<String> {
        self.started.lock().unwrap().clone()
    }
}

impl Processor for GatedProcessor {
    fn name(&self) -> &str {
        "gated"
    }

    fn process<'a>(
        &'a self,
        task: &'a Task,
        ctx: &'a ProcessContext,
    ) -> BoxFuture<'a, anyhow::Result<ProcessOutput>> {
        Box::pin(async move {
            {
                let mut started = self.started.lock().unwrap();
                started.insert(task.task_id.clone());
                self.started_count.send_replace(started.len());
            }
            let mut gate = self.gate.clone();
            gate.wait_for(|open| *open)
                .await
                .map_err(|_| anyhow!("gate dropped"))?;
            let input = effective_input(task, ctx)?;
            Ok(ProcessOutput::new(format!("gated:{input}")))
        })
    }
}

/// Records every task event pushed by a worker pool.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<TaskEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TaskEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressObserver for RecordingObserver {
    fn on_task_event(&self, event: &TaskEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
