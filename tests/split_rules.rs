// tests/split_rules.rs
mod common;
use crate::common::{init_tracing, translate_rules, translation_sheet, DataStateBuilder, TestResult};

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::anyhow;

use sheetflow::data::Cell;
use sheetflow::split::{
    ColorMarkedRule, DerivedRule, EmptyCellRule, PatternRule, SplitContext, SplitRule,
    TaskSplitter, OP_DERIVE, OP_NORMAL, OP_RETRANSLATE, OP_SHORTEN,
};
use sheetflow::task::{Task, TaskStatus};

fn hello_sheet() -> DataStateBuilder {
    DataStateBuilder::new()
        .sheet("Sheet1", &["CH", "EN"])
        .row(&[Some("hello"), None])
}

#[test]
fn empty_target_with_source_yields_one_normal_task() -> TestResult {
    init_tracing();
    let state = hello_sheet().build();
    let rules: Vec<Arc<dyn SplitRule>> = vec![Arc::new(EmptyCellRule::new("CH", ["EN"]))];

    let tasks = TaskSplitter::default().split(&state, &rules);

    assert_eq!(tasks.len(), 1);
    let task = &tasks.as_slice()[0];
    assert_eq!(task.source_text, "hello");
    assert_eq!(task.source_lang, "CH");
    assert_eq!(task.target_lang, "EN");
    assert_eq!(task.operation, OP_NORMAL);
    assert_eq!((task.row, task.col), (0, 1));
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.task_id, "T000001");
    Ok(())
}

#[test]
fn color_marker_outranks_empty_cell_rule() -> TestResult {
    init_tracing();
    let state = hello_sheet().color(0, 1, "yellow").build();
    let rules: Vec<Arc<dyn SplitRule>> = vec![
        Arc::new(EmptyCellRule::new("CH", ["EN"])),
        Arc::new(ColorMarkedRule::retranslate("yellow", "CH", ["EN"])),
    ];

    let tasks = TaskSplitter::default().split(&state, &rules);

    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks.as_slice()[0].operation, OP_RETRANSLATE);
    assert_eq!(tasks.as_slice()[0].priority, ColorMarkedRule::DEFAULT_PRIORITY);
    Ok(())
}

#[test]
fn shorten_rule_reworks_the_marked_cell_text() -> TestResult {
    let state = DataStateBuilder::new()
        .sheet("Sheet1", &["CH", "EN"])
        .row(&[Some("你好"), Some("a rather long greeting")])
        .color(0, 1, "blue")
        .build();
    let rules: Vec<Arc<dyn SplitRule>> =
        vec![Arc::new(ColorMarkedRule::shorten("blue", "CH", ["EN"]))];

    let tasks = TaskSplitter::default().split(&state, &rules);

    assert_eq!(tasks.len(), 1);
    let task = &tasks.as_slice()[0];
    assert_eq!(task.operation, OP_SHORTEN);
    assert_eq!(task.source_text, "a rather long greeting");
    assert_eq!(task.source_lang, "EN");
    Ok(())
}

#[test]
fn unmatched_cells_produce_no_tasks() -> TestResult {
    let state = DataStateBuilder::new()
        .sheet("Sheet1", &["CH", "EN"])
        .row(&[Some("你好"), Some("hello")])
        .row(&[None, None])
        .build();
    let rules: Vec<Arc<dyn SplitRule>> = vec![Arc::new(EmptyCellRule::new("CH", ["EN"]))];

    let tasks = TaskSplitter::default().split(&state, &rules);

    assert!(tasks.is_empty());
    Ok(())
}

#[test]
fn every_sheet_is_scanned_in_order() -> TestResult {
    let state = DataStateBuilder::new()
        .sheet("Menu", &["CH", "EN"])
        .row(&[Some("开始"), None])
        .sheet("Dialog", &["CH", "EN"])
        .row(&[Some("再见"), None])
        .build();

    let rules: Vec<Arc<dyn SplitRule>> = vec![Arc::new(EmptyCellRule::new("CH", ["EN"]))];

    let tasks = TaskSplitter::default().split(&state, &rules);

    let sheets: Vec<&str> = tasks.iter().map(|t| t.sheet.as_str()).collect();
    assert_eq!(sheets, vec!["Menu", "Dialog"]);
    assert_eq!(tasks.ids(), vec!["T000001", "T000002"]);
    Ok(())
}

/// Errors on every call.
#[derive(Debug)]
struct BrokenRule {
    fail_in_create: bool,
}

impl SplitRule for BrokenRule {
    fn name(&self) -> &str {
        "broken"
    }

    fn priority(&self) -> u8 {
        10
    }

    fn operation_type(&self) -> &str {
        "broken"
    }

    fn matches(&self, _cell: &Cell, _ctx: &SplitContext<'_>) -> anyhow::Result<bool> {
        if self.fail_in_create {
            Ok(true)
        } else {
            Err(anyhow!("cannot classify"))
        }
    }

    fn create_task(&self, _cell: &Cell, _ctx: &SplitContext<'_>) -> anyhow::Result<Task> {
        Err(anyhow!("cannot build task"))
    }
}

#[test]
fn a_rule_that_errors_while_matching_is_skipped() -> TestResult {
    init_tracing();
    let state = hello_sheet().build();
    let rules: Vec<Arc<dyn SplitRule>> = vec![
        Arc::new(BrokenRule { fail_in_create: false }),
        Arc::new(EmptyCellRule::new("CH", ["EN"])),
    ];

    let outcome = TaskSplitter::default().split_with_metadata(&state, &rules, &BTreeMap::new());

    assert_eq!(outcome.tasks.len(), 1);
    assert_eq!(outcome.tasks.as_slice()[0].operation, OP_NORMAL);
    assert_eq!(outcome.rejected, 0);
    Ok(())
}

#[test]
fn a_rule_that_errors_while_creating_only_loses_that_cell() -> TestResult {
    init_tracing();
    let state = hello_sheet().build();
    let rules: Vec<Arc<dyn SplitRule>> = vec![Arc::new(BrokenRule { fail_in_create: true })];

    let outcome = TaskSplitter::default().split_with_metadata(&state, &rules, &BTreeMap::new());

    assert!(outcome.tasks.is_empty());
    // Both cells matched and both failed to build.
    assert_eq!(outcome.rejected, 2);
    Ok(())
}

/// Builds tasks with an out-of-range priority.
#[derive(Debug)]
struct MalformedRule;

impl SplitRule for MalformedRule {
    fn name(&self) -> &str {
        "malformed"
    }

    fn priority(&self) -> u8 {
        5
    }

    fn operation_type(&self) -> &str {
        OP_NORMAL
    }

    fn matches(&self, cell: &Cell, _ctx: &SplitContext<'_>) -> anyhow::Result<bool> {
        Ok(!cell.has_value())
    }

    fn create_task(&self, cell: &Cell, ctx: &SplitContext<'_>) -> anyhow::Result<Task> {
        Ok(Task::new(ctx.task_id, OP_NORMAL, 0, cell.sheet.as_str(), cell.row, cell.col, "EN"))
    }
}

#[test]
fn malformed_tasks_are_rejected_and_ids_stay_dense() -> TestResult {
    init_tracing();
    let state = hello_sheet().build();
    let rules: Vec<Arc<dyn SplitRule>> = vec![
        Arc::new(MalformedRule),
        Arc::new(PatternRule::new("^hello$", "review", 4)?),
    ];

    let outcome = TaskSplitter::default().split_with_metadata(&state, &rules, &BTreeMap::new());

    assert_eq!(outcome.rejected, 1);
    assert_eq!(outcome.tasks.len(), 1);
    let task = &outcome.tasks.as_slice()[0];
    assert_eq!(task.operation, "review");
    assert_eq!(task.task_id, "T000001");
    Ok(())
}

#[test]
fn equal_priorities_fall_back_to_registration_order() -> TestResult {
    let state = hello_sheet().build();
    let rules: Vec<Arc<dyn SplitRule>> = vec![
        Arc::new(PatternRule::new("hel", "first", 6)?),
        Arc::new(PatternRule::new("llo", "second", 6)?),
    ];

    let tasks = TaskSplitter::default().split(&state, &rules);

    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks.as_slice()[0].operation, "first");
    Ok(())
}

#[test]
fn invalid_pattern_is_an_error() {
    assert!(PatternRule::new("(unclosed", "review", 5).is_err());
}

#[test]
fn derived_task_is_linked_to_the_task_it_reads_from() -> TestResult {
    init_tracing();
    let state = DataStateBuilder::new()
        .sheet("Sheet1", &["CH", "EN", "TH"])
        .row(&[Some("你好"), None, None])
        .build();
    let rules: Vec<Arc<dyn SplitRule>> = vec![
        Arc::new(EmptyCellRule::new("CH", ["EN"])),
        Arc::new(DerivedRule::new("EN", ["TH"])),
    ];

    let tasks = TaskSplitter::default().split(&state, &rules);

    assert_eq!(tasks.len(), 2);
    let en = tasks.iter().find(|t| t.column_name == "EN").ok_or("missing EN task")?;
    let th = tasks.iter().find(|t| t.column_name == "TH").ok_or("missing TH task")?;
    assert_eq!(th.operation, OP_DERIVE);
    assert_eq!(th.derive_from.as_deref(), Some("EN"));
    assert_eq!(th.depends_on.as_deref(), Some(en.task_id.as_str()));
    assert_eq!(en.depends_on, None);

    // Higher priority first.
    assert_eq!(tasks.as_slice()[0].task_id, en.task_id);
    Ok(())
}

#[test]
fn derived_task_without_a_producer_reads_the_current_value() -> TestResult {
    let state = DataStateBuilder::new()
        .sheet("Sheet1", &["CH", "EN", "TH"])
        .row(&[Some("你好"), Some("hello"), None])
        .build();
    let rules: Vec<Arc<dyn SplitRule>> = vec![Arc::new(DerivedRule::new("EN", ["TH"]))];

    let tasks = TaskSplitter::default().split(&state, &rules);

    assert_eq!(tasks.len(), 1);
    let th = &tasks.as_slice()[0];
    assert_eq!(th.source_text, "hello");
    assert_eq!(th.depends_on, None);
    Ok(())
}

#[test]
fn derived_task_with_nothing_to_read_is_skipped() -> TestResult {
    init_tracing();
    let state = DataStateBuilder::new()
        .sheet("Sheet1", &["CH", "EN", "EN_SHORT"])
        .row(&[None, None, None])
        .row(&[Some("你好"), None, None])
        .build();
    let rules: Vec<Arc<dyn SplitRule>> = vec![
        Arc::new(EmptyCellRule::new("CH", ["EN"])),
        Arc::new(DerivedRule::new("EN", ["EN_SHORT"])),
    ];

    let outcome = TaskSplitter::default().split_with_metadata(&state, &rules, &BTreeMap::new());

    assert_eq!(outcome.skipped, 1);
    assert_eq!(outcome.rejected, 0);
    // Only the populated row yields work: its EN task and the derived task fed by it.
    assert_eq!(outcome.tasks.len(), 2);
    assert!(outcome.tasks.iter().all(|t| t.row == 1));
    let short = outcome
        .tasks
        .iter()
        .find(|t| t.operation == OP_DERIVE)
        .ok_or("missing derived task")?;
    assert!(short.depends_on.is_some());
    Ok(())
}

#[test]
fn tasks_are_packed_into_char_budgeted_batches_per_language() -> TestResult {
    let long = "x".repeat(25);
    let state = DataStateBuilder::new()
        .sheet("Sheet1", &["CH", "EN"])
        .row(&[Some("aaaa"), None])
        .row(&[Some("bbbb"), None])
        .row(&[Some("cccc"), None])
        .row(&[Some(long.as_str()), None])
        .build();
    let rules: Vec<Arc<dyn SplitRule>> = vec![Arc::new(EmptyCellRule::new("CH", ["EN"]))];

    let outcome = TaskSplitter::new(10).split_with_metadata(&state, &rules, &BTreeMap::new());

    let layout: Vec<(&str, Vec<String>, usize)> = outcome
        .batches
        .iter()
        .map(|b| (b.batch_id.as_str(), b.task_ids.clone(), b.chars))
        .collect();
    assert_eq!(
        layout,
        vec![
            ("EN-0001", vec!["T000001".to_string(), "T000002".to_string()], 8),
            ("EN-0002", vec!["T000003".to_string()], 4),
            // Larger than the whole budget: alone in its batch.
            ("EN-0003", vec!["T000004".to_string()], 25),
        ]
    );

    let t4 = outcome.tasks.get("T000004").ok_or("missing T000004")?;
    assert_eq!(t4.batch_id.as_deref(), Some("EN-0003"));
    Ok(())
}

#[test]
fn batches_never_mix_languages() -> TestResult {
    let tasks = TaskSplitter::default().split(&translation_sheet(), &translate_rules());

    assert_eq!(tasks.len(), 3);
    for task in tasks.iter() {
        let batch = task.batch_id.as_deref().ok_or("task without batch")?;
        assert!(batch.starts_with(&format!("{}-", task.target_lang)));
    }
    assert_eq!(tasks.batch_ids(), vec!["EN-0001", "TH-0001"]);
    Ok(())
}

#[test]
fn rules_can_read_stage_metadata() -> TestResult {
    /// Only matches when the stage enables it.
    #[derive(Debug)]
    struct Toggled;

    impl SplitRule for Toggled {
        fn name(&self) -> &str {
            "toggled"
        }
        fn priority(&self) -> u8 {
            5
        }
        fn operation_type(&self) -> &str {
            "toggled"
        }
        fn matches(&self, cell: &Cell, ctx: &SplitContext<'_>) -> anyhow::Result<bool> {
            Ok(cell.has_value() && ctx.metadata.get("enabled").is_some_and(|v| v == "yes"))
        }
        fn create_task(&self, cell: &Cell, ctx: &SplitContext<'_>) -> anyhow::Result<Task> {
            Ok(Task::new(ctx.task_id, "toggled", 5, cell.sheet.as_str(), cell.row, cell.col, ctx.column_name)
                .with_source(cell.text(), ctx.column_name))
        }
    }

    let state = hello_sheet().build();
    let rules: Vec<Arc<dyn SplitRule>> = vec![Arc::new(Toggled)];
    let splitter = TaskSplitter::default();

    let off = splitter.split_with_metadata(&state, &rules, &BTreeMap::new());
    let on = splitter.split_with_metadata(
        &state,
        &rules,
        &BTreeMap::from([("enabled".to_string(), "yes".to_string())]),
    );

    assert!(off.tasks.is_empty());
    assert_eq!(on.tasks.len(), 1);
    Ok(())
}
