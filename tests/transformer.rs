// tests/transformer.rs
mod common;
use crate::common::{init_tracing, translate_rules, translation_sheet, TaskBuilder, TestResult};

use std::sync::Arc;

use sheetflow::process::{merge_results, ProcessContext, Transformer, UppercaseProcessor};
use sheetflow::split::TaskSplitter;
use sheetflow::task::{TaskStatus, TaskTable};
use sheetflow::SheetflowError;
use sheetflow_test_utils::fakes::{FlakyProcessor, RecordingProcessor};

#[tokio::test]
async fn results_land_in_a_new_state_and_the_input_is_untouched() -> TestResult {
    init_tracing();
    let state = translation_sheet();
    let mut tasks = TaskSplitter::default().split(&state, &translate_rules());
    let transformer = Transformer::new(Arc::new(RecordingProcessor::new("tr:")));

    let out = transformer
        .execute(&state, &mut tasks, &ProcessContext::new("translate"))
        .await?;

    assert_eq!(state, translation_sheet());
    assert_eq!(out.get_cell_value("Sheet1", 0, 1)?, Some("tr:你好"));
    assert_eq!(out.get_cell_value("Sheet1", 0, 2)?, Some("tr:你好"));
    assert_eq!(out.get_cell_value("Sheet1", 1, 2)?, Some("tr:谢谢"));
    // Untargeted cells keep their values.
    assert_eq!(out.get_cell_value("Sheet1", 1, 1)?, Some("thanks"));

    let counts = tasks.counts();
    assert_eq!((counts.completed, counts.failed, counts.pending), (3, 0, 0));
    for task in tasks.iter() {
        assert!(task.result.is_some());
        assert!(task.completed_at.is_some());
    }
    Ok(())
}

#[tokio::test]
async fn a_failing_task_is_recorded_and_the_rest_still_run() -> TestResult {
    init_tracing();
    let state = translation_sheet();
    let mut tasks = TaskSplitter::default().split(&state, &translate_rules());
    let processor = Arc::new(FlakyProcessor::new().always_failing("T000002"));
    let transformer = Transformer::new(processor);

    let out = transformer
        .execute(&state, &mut tasks, &ProcessContext::new("translate"))
        .await?;

    let failed = tasks.get("T000002").ok_or("missing T000002")?;
    assert_eq!(failed.status, TaskStatus::Failed);
    assert!(failed.result.is_none());
    assert!(failed.error_message.as_deref().unwrap_or("").contains("simulated failure"));
    assert_eq!(out.get_cell_value("Sheet1", failed.row, failed.col)?, None);

    assert_eq!(tasks.counts().completed, 2);
    Ok(())
}

#[tokio::test]
async fn completed_tasks_are_reapplied_not_reprocessed() -> TestResult {
    init_tracing();
    let state = translation_sheet();
    let mut tasks = TaskTable::from_tasks(vec![
        TaskBuilder::new("T1")
            .at("Sheet1", 0, 1)
            .target("EN")
            .status(TaskStatus::Completed)
            .result("hello")
            .build(),
        TaskBuilder::new("T2").at("Sheet1", 0, 2).target("TH").build(),
    ]);
    let processor = Arc::new(RecordingProcessor::new(">"));
    let transformer = Transformer::new(Arc::clone(&processor) as _);

    let out = transformer
        .execute(&state, &mut tasks, &ProcessContext::new("translate"))
        .await?;

    assert_eq!(processor.calls(), vec!["T2"]);
    assert_eq!(out.get_cell_value("Sheet1", 0, 1)?, Some("hello"));
    assert_eq!(out.get_cell_value("Sheet1", 0, 2)?, Some(">text of T2"));
    Ok(())
}

#[tokio::test]
async fn a_dependent_task_reads_its_dependency_result() -> TestResult {
    init_tracing();
    let state = translation_sheet();
    let mut tasks = TaskTable::from_tasks(vec![
        TaskBuilder::new("T1").at("Sheet1", 0, 1).target("EN").source("hi", "CH").build(),
        TaskBuilder::new("T2")
            .at("Sheet1", 0, 2)
            .target("TH")
            .operation("derive")
            .source("", "EN")
            .depends_on("T1")
            .build(),
    ]);
    let transformer = Transformer::new(Arc::new(UppercaseProcessor));

    let out = transformer
        .execute(&state, &mut tasks, &ProcessContext::new("translate"))
        .await?;

    assert_eq!(out.get_cell_value("Sheet1", 0, 1)?, Some("HI"));
    assert_eq!(out.get_cell_value("Sheet1", 0, 2)?, Some("HI"));
    Ok(())
}

#[tokio::test]
async fn a_dependency_that_never_completed_fails_the_dependent() -> TestResult {
    init_tracing();
    let state = translation_sheet();
    let mut tasks = TaskTable::from_tasks(vec![
        TaskBuilder::new("T1").at("Sheet1", 0, 1).target("EN").build(),
        TaskBuilder::new("T2")
            .at("Sheet1", 0, 2)
            .target("TH")
            .source("", "EN")
            .depends_on("T1")
            .build(),
    ]);
    let transformer = Transformer::new(Arc::new(FlakyProcessor::new().always_failing("T1")));

    transformer
        .execute(&state, &mut tasks, &ProcessContext::new("translate"))
        .await?;

    let dependent = tasks.get("T2").ok_or("missing T2")?;
    assert_eq!(dependent.status, TaskStatus::Failed);
    assert!(dependent.error_message.as_deref().unwrap_or("").contains("no input text"));
    Ok(())
}

#[tokio::test]
async fn a_task_pointing_outside_the_sheet_fails_alone() -> TestResult {
    init_tracing();
    let state = translation_sheet();
    let mut tasks = TaskTable::from_tasks(vec![
        TaskBuilder::new("T1").at("Sheet1", 0, 1).target("EN").build(),
        TaskBuilder::new("T2").at("Sheet1", 42, 1).target("EN").build(),
    ]);
    let transformer = Transformer::new(Arc::new(UppercaseProcessor));

    let out = transformer
        .execute(&state, &mut tasks, &ProcessContext::new("translate"))
        .await?;

    assert_eq!(tasks.get("T1").map(|t| t.status), Some(TaskStatus::Completed));
    assert_eq!(tasks.get("T2").map(|t| t.status), Some(TaskStatus::Failed));
    assert_eq!(out.get_cell_value("Sheet1", 0, 1)?, Some("TEXT OF T1"));
    Ok(())
}

#[tokio::test]
async fn duplicate_task_ids_are_rejected_up_front() -> TestResult {
    init_tracing();
    let state = translation_sheet();
    let mut tasks = TaskTable::from_tasks(vec![
        TaskBuilder::new("T1").at("Sheet1", 0, 1).build(),
        TaskBuilder::new("T1").at("Sheet1", 0, 2).build(),
    ]);
    let processor = Arc::new(RecordingProcessor::new(""));
    let transformer = Transformer::new(Arc::clone(&processor) as _);

    let err = transformer
        .execute(&state, &mut tasks, &ProcessContext::new("translate"))
        .await
        .unwrap_err();

    assert!(matches!(err, SheetflowError::InvalidTask(_)));
    assert!(processor.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn failed_tasks_are_not_processed_again() -> TestResult {
    init_tracing();
    let state = translation_sheet();
    let mut tasks = TaskTable::from_tasks(vec![
        TaskBuilder::new("T1").at("Sheet1", 0, 1).status(TaskStatus::Failed).build(),
        TaskBuilder::new("T2").at("Sheet1", 0, 2).target("TH").build(),
    ]);
    let processor = Arc::new(RecordingProcessor::new(">"));
    let transformer = Transformer::new(Arc::clone(&processor) as _);

    let out = transformer
        .execute(&state, &mut tasks, &ProcessContext::new("translate"))
        .await?;

    assert_eq!(processor.calls(), vec!["T2"]);
    assert_eq!(tasks.get("T1").map(|t| t.status), Some(TaskStatus::Failed));
    assert_eq!(out.get_cell_value("Sheet1", 0, 1)?, None);
    Ok(())
}

#[test]
fn merge_writes_only_completed_results() -> TestResult {
    let state = translation_sheet();
    let tasks = TaskTable::from_tasks(vec![
        TaskBuilder::new("T1")
            .at("Sheet1", 0, 1)
            .status(TaskStatus::Completed)
            .result("hello")
            .build(),
        TaskBuilder::new("T2").at("Sheet1", 0, 2).status(TaskStatus::Failed).build(),
        TaskBuilder::new("T3")
            .at("Sheet1", 99, 0)
            .status(TaskStatus::Completed)
            .result("lost")
            .build(),
    ]);

    let merged = merge_results(&state, &tasks);

    assert_eq!(merged.get_cell_value("Sheet1", 0, 1)?, Some("hello"));
    assert_eq!(merged.get_cell_value("Sheet1", 0, 2)?, None);
    assert_eq!(state.get_cell_value("Sheet1", 0, 1)?, None);
    Ok(())
}
