// tests/session_runner.rs
mod common;
use crate::common::{
    eventually, init_tracing, translate_rules, translation_sheet, with_timeout, TestResult,
};

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::watch;

use sheetflow::checkpoint::{
    CheckpointStore, FsCheckpointStore, InMemorySessionStore, InMemoryTaskStore, ResumeHandler,
    SessionStatus, SessionStore, TaskStore,
};
use sheetflow::config::parse_config;
use sheetflow::data::{DataStore, InMemoryDataStore};
use sheetflow::engine::SessionRunner;
use sheetflow::pipeline::{Orchestrator, PipelineStage, StageExecutor};
use sheetflow::pool::{PoolConfig, PoolTransformer, WorkerPool};
use sheetflow::process::{
    effective_input, BoxFuture, ProcessContext, ProcessOutput, Processor, Transformer,
};
use sheetflow::split::{PatternRule, SplitRule};
use sheetflow::task::{Task, TaskStatus, TaskTable};
use sheetflow::{run_with_config, DataState, SheetflowError};
use sheetflow_test_utils::fakes::RecordingProcessor;

struct Harness {
    _dir: tempfile::TempDir,
    sessions: Arc<InMemorySessionStore>,
    store: Arc<FsCheckpointStore>,
    tasks: Arc<InMemoryTaskStore>,
    handler: Arc<ResumeHandler>,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let sessions = Arc::new(InMemorySessionStore::new());
    let store = Arc::new(FsCheckpointStore::new(dir.path().to_path_buf()));
    let tasks = Arc::new(InMemoryTaskStore::new());
    let handler = Arc::new(ResumeHandler::new(sessions.clone(), store.clone(), tasks.clone()));
    Harness { _dir: dir, sessions, store, tasks, handler }
}

/// Completes the first pending task by hand, then fails, on its first call
/// only. Later calls go straight to the wrapped transformer.
#[derive(Debug)]
struct FailOnceExecutor {
    inner: Transformer,
    failed: AtomicBool,
}

impl FailOnceExecutor {
    fn new(inner: Transformer) -> Arc<Self> {
        Arc::new(Self {
            inner,
            failed: AtomicBool::new(false),
        })
    }
}

impl StageExecutor for FailOnceExecutor {
    fn execute<'a>(
        &'a self,
        state: &'a DataState,
        tasks: &'a mut TaskTable,
        ctx: &'a ProcessContext,
    ) -> BoxFuture<'a, sheetflow::Result<DataState>> {
        if self.failed.swap(true, Ordering::SeqCst) {
            return Box::pin(self.inner.execute(state, tasks, ctx));
        }
        Box::pin(async move {
            if let Some(task) = tasks.iter_mut().find(|t| t.status == TaskStatus::Pending) {
                task.mark_processing();
                task.complete("reviewed by hand".to_string(), None, Duration::from_millis(1));
            }
            if let Some(task) = tasks.iter_mut().find(|t| t.status == TaskStatus::Pending) {
                // Left mid-flight; resume must put it back to pending.
                task.mark_processing();
            }
            Err::<DataState, _>(SheetflowError::Other(anyhow!("connection reset")))
        })
    }
}

/// Lets the first call through and holds every later one until released.
#[derive(Debug)]
struct FirstThenHold {
    release: watch::Receiver<bool>,
    first: Mutex<Option<String>>,
}

impl FirstThenHold {
    fn new() -> (Arc<Self>, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let processor = Arc::new(Self {
            release: rx,
            first: Mutex::new(None),
        });
        (processor, tx)
    }

    fn first(&self) -> Option<String> {
        self.first.lock().unwrap().clone()
    }
}

impl Processor for FirstThenHold {
    fn name(&self) -> &str {
        "first-then-hold"
    }

    fn process<'a>(
        &'a self,
        task: &'a Task,
        ctx: &'a ProcessContext,
    ) -> BoxFuture<'a, anyhow::Result<ProcessOutput>> {
        Box::pin(async move {
            let is_first = {
                let mut first = self.first.lock().unwrap();
                *first.get_or_insert_with(|| task.task_id.clone()) == task.task_id
            };
            if !is_first {
                let mut release = self.release.clone();
                release
                    .wait_for(|open| *open)
                    .await
                    .map_err(|_| anyhow!("release dropped"))?;
            }
            let input = effective_input(task, ctx)?;
            Ok(ProcessOutput::new(format!("done:{input}")))
        })
    }
}

/// Newest checkpoint of the only session whose in-flight table shows
/// finished work.
fn checkpoint_with_progress(h: &Harness) -> Option<(PathBuf, TaskTable)> {
    let id = h.sessions.ids().into_iter().next()?;
    let entry = h.store.list(Some(&id)).ok()?.into_iter().next()?;
    let checkpoint = h.store.read(&entry.path).ok()?;
    let in_flight = checkpoint.payload.resume.in_flight?;
    (in_flight.stage_id == "translate" && in_flight.tasks.counts().completed > 0)
        .then_some((entry.path, in_flight.tasks))
}

fn review_rules() -> Vec<Arc<dyn SplitRule>> {
    let rule = PatternRule::new("^en:", "review", 5)
        .expect("static pattern")
        .in_columns(["EN", "TH"]);
    vec![Arc::new(rule)]
}

#[tokio::test]
async fn a_run_checkpoints_after_every_stage() -> TestResult {
    init_tracing();
    let h = harness();
    let translate = Arc::new(Transformer::new(Arc::new(RecordingProcessor::new("en:"))));
    let review = Arc::new(Transformer::new(Arc::new(RecordingProcessor::new("ok:"))));
    let mut orchestrator = Orchestrator::new();
    orchestrator
        .add_stage(PipelineStage::new("translate", translate).with_rules(translate_rules()))
        .add_stage(
            PipelineStage::new("review", review)
                .with_rules(review_rules())
                .depends_on(["translate"]),
        );
    let runner = SessionRunner::new(h.handler.clone());

    let report = with_timeout(runner.run(&mut orchestrator, translation_sheet())).await?;

    assert!(report.restored_from.is_none());
    assert_eq!(report.state.get_cell_value("Sheet1", 0, 1)?, Some("ok:en:你好"));
    assert_eq!(report.state.get_cell_value("Sheet1", 1, 2)?, Some("ok:en:谢谢"));
    assert_eq!(report.state.get_cell_value("Sheet1", 1, 1)?, Some("thanks"));

    let session = h.sessions.get(&report.session_id).ok_or("session missing")?;
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.data_state, report.state);
    assert!(session.current_stage.is_none());
    assert!(session.resume.in_flight.is_none());
    let completed: Vec<&String> = session.resume.completed_stages.keys().collect();
    assert_eq!(completed, vec!["review", "translate"]);

    let checkpoints = h.store.list(Some(&report.session_id))?;
    assert_eq!(checkpoints.len(), 2);
    assert_eq!(session.latest_checkpoint.as_ref(), Some(&checkpoints[0].path));

    let stored = h.tasks.load_tasks(&report.session_id)?.ok_or("no stored tasks")?;
    assert_eq!(stored.ids(), vec!["review-T000001", "review-T000002", "review-T000003"]);
    assert!(!stored.has_incomplete());
    Ok(())
}

#[tokio::test]
async fn stage_checkpoints_can_be_turned_off() -> TestResult {
    init_tracing();
    let h = harness();
    let executor = Arc::new(Transformer::new(Arc::new(RecordingProcessor::new("en:"))));
    let mut orchestrator = Orchestrator::new();
    orchestrator.add_stage(PipelineStage::new("translate", executor).with_rules(translate_rules()));
    let runner = SessionRunner::new(h.handler.clone()).checkpoint_after_stage(false);

    let report = with_timeout(runner.run(&mut orchestrator, translation_sheet())).await?;

    assert!(h.store.list(Some(&report.session_id))?.is_empty());
    Ok(())
}

#[tokio::test]
async fn a_failed_session_resumes_without_redoing_finished_work() -> TestResult {
    init_tracing();
    let h = harness();
    let translate_processor = Arc::new(RecordingProcessor::new("en:"));
    let review_processor = Arc::new(RecordingProcessor::new("ok:"));
    let translate = Arc::new(Transformer::new(translate_processor.clone()));
    let review = FailOnceExecutor::new(Transformer::new(review_processor.clone()));

    let mut orchestrator = Orchestrator::new();
    orchestrator
        .add_stage(PipelineStage::new("translate", translate).with_rules(translate_rules()))
        .add_stage(
            PipelineStage::new("review", review)
                .with_rules(review_rules())
                .depends_on(["translate"]),
        );
    let runner = SessionRunner::new(h.handler.clone());

    let err = with_timeout(runner.run(&mut orchestrator, translation_sheet()))
        .await
        .unwrap_err();
    assert!(matches!(err, SheetflowError::StageExecution { ref stage, .. } if stage == "review"));

    let ids = h.sessions.ids();
    assert_eq!(ids.len(), 1);
    let failed = h.sessions.get(&ids[0]).ok_or("failed session missing")?;
    assert_eq!(failed.status, SessionStatus::Failed);
    assert!(failed.error.as_deref().unwrap_or("").contains("connection reset"));
    assert!(h.handler.can_resume(&failed.session_id)?);

    // One checkpoint after translate, one after the failure.
    assert_eq!(h.store.list(Some(&failed.session_id))?.len(), 2);
    let saved = h.tasks.load_tasks(&failed.session_id)?.ok_or("no stored tasks")?;
    assert_eq!(saved.counts().completed, 1);
    assert_eq!(saved.counts().processing, 0);

    let checkpoint = h
        .handler
        .latest_checkpoint(&failed.session_id)?
        .ok_or("no checkpoint")?;
    let report = with_timeout(runner.resume(&mut orchestrator, &checkpoint)).await?;

    assert_eq!(report.restored_from.as_deref(), Some(failed.session_id.as_str()));
    assert_ne!(report.session_id, failed.session_id);
    assert_eq!(translate_processor.calls().len(), 3);
    assert_eq!(review_processor.calls(), vec!["review-T000002", "review-T000003"]);

    assert_eq!(report.state.get_cell_value("Sheet1", 0, 1)?, Some("reviewed by hand"));
    assert_eq!(report.state.get_cell_value("Sheet1", 0, 2)?, Some("ok:en:你好"));
    assert_eq!(report.state.get_cell_value("Sheet1", 1, 2)?, Some("ok:en:谢谢"));

    let resumed = h.sessions.get(&report.session_id).ok_or("resumed session missing")?;
    assert_eq!(resumed.status, SessionStatus::Completed);
    assert_eq!(resumed.checkpoint_path.as_ref(), Some(&checkpoint));
    Ok(())
}

#[tokio::test]
async fn run_with_config_saves_the_result_and_checkpoints() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let cfg = parse_config(&format!(
        r#"
        [pool]
        max_workers = 2
        retry_cooldown_ms = 1

        [checkpoint]
        dir = '{}'

        [[stage]]
        id = "translate"

        [[stage.rule]]
        kind = "empty_cell"
        source_column = "CH"
        target_columns = ["EN", "TH"]
        "#,
        dir.path().display()
    ))?;
    let store = InMemoryDataStore::new(translation_sheet());

    let report = with_timeout(run_with_config(&cfg, &store, Arc::new(RecordingProcessor::new("x:")))).await?;

    let saved = store.load()?;
    assert_eq!(saved, report.state);
    assert_eq!(saved.get_cell_value("Sheet1", 0, 1)?, Some("x:你好"));
    assert_eq!(saved.get_cell_value("Sheet1", 0, 2)?, Some("x:你好"));
    assert_eq!(saved.get_cell_value("Sheet1", 1, 2)?, Some("x:谢谢"));
    assert_eq!(saved.get_cell_value("Sheet1", 1, 1)?, Some("thanks"));

    let checkpoints = FsCheckpointStore::new(dir.path().to_path_buf()).list(Some(&report.session_id))?;
    assert!(!checkpoints.is_empty());
    Ok(())
}

#[tokio::test]
async fn autosave_records_tasks_finished_mid_stage() -> TestResult {
    init_tracing();
    let h = harness();
    let (processor, release) = FirstThenHold::new();
    let pool = Arc::new(WorkerPool::new(
        PoolConfig::default()
            .with_max_workers(1)
            .with_retry_cooldown(Duration::from_millis(1)),
    ));
    let executor = Arc::new(PoolTransformer::new(pool, processor.clone()));
    let mut orchestrator = Orchestrator::new();
    orchestrator.add_stage(PipelineStage::new("translate", executor).with_rules(translate_rules()));
    let runner = SessionRunner::new(h.handler.clone()).with_autosave(Duration::from_millis(20));

    let watcher = async {
        let found = eventually(|| checkpoint_with_progress(&h)).await;
        release.send_replace(true);
        found
    };
    let (report, found) = tokio::join!(
        with_timeout(runner.run(&mut orchestrator, translation_sheet())),
        watcher
    );
    let report = report?;
    let (mid_stage, saved) = found.ok_or("no autosave captured finished work")?;

    // Saved while the other two tasks were still held.
    let first = processor.first().ok_or("nothing was processed")?;
    let counts = saved.counts();
    assert_eq!(counts.completed, 1);
    assert_eq!(counts.total, 3);
    let done = saved.get(&first).ok_or("finished task missing from checkpoint")?;
    assert_eq!(done.status, TaskStatus::Completed);
    assert!(done.result.as_deref().is_some_and(|r| r.starts_with("done:")));
    assert!(report.restored_from.is_none());

    // Picking up from that checkpoint only runs what was left.
    let redo = Arc::new(RecordingProcessor::new("en:"));
    let mut second = Orchestrator::new();
    second.add_stage(
        PipelineStage::new("translate", Arc::new(Transformer::new(redo.clone())))
            .with_rules(translate_rules()),
    );
    let resumed = with_timeout(SessionRunner::new(h.handler.clone()).resume(&mut second, &mid_stage)).await?;

    let calls = redo.calls();
    assert_eq!(calls.len(), 2);
    assert!(!calls.contains(&first));
    let kept = resumed.state.get_cell_value(&done.sheet, done.row, done.col)?;
    assert_eq!(kept, done.result.as_deref());
    Ok(())
}
