use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use proptest::prelude::*;
use sheetflow::split::{
    ColorMarkedRule, DerivedRule, EmptyCellRule, PatternRule, SplitOutcome, SplitRule, TaskSplitter,
};
use sheetflow::DataState;
use sheetflow_test_utils::builders::DataStateBuilder;

const COLUMNS: [&str; 3] = ["CH", "EN", "TH"];

// One generated cell: optional text plus an optional colour marker.
fn cell_strategy() -> impl Strategy<Value = (Option<String>, Option<&'static str>)> {
    let value = prop_oneof![
        Just(None),
        Just(Some("   ".to_string())),
        "[a-z]{1,12}".prop_map(Some),
        "[一-龥]{1,6}".prop_map(Some),
    ];
    let color = prop_oneof![Just(None), Just(Some("yellow")), Just(Some("blue"))];
    (value, color)
}

fn state_strategy() -> impl Strategy<Value = DataState> {
    proptest::collection::vec(proptest::collection::vec(cell_strategy(), COLUMNS.len()), 1..8)
        .prop_map(|rows| {
            let mut builder = DataStateBuilder::new().sheet("Sheet1", &COLUMNS);
            for row in &rows {
                let values: Vec<Option<&str>> = row.iter().map(|(v, _)| v.as_deref()).collect();
                builder = builder.row(&values);
            }
            for (r, row) in rows.iter().enumerate() {
                for (c, (_, color)) in row.iter().enumerate() {
                    if let Some(color) = color {
                        builder = builder.color(r, c, color);
                    }
                }
            }
            builder.build()
        })
}

fn all_rules() -> Vec<Arc<dyn SplitRule>> {
    vec![
        Arc::new(EmptyCellRule::new("CH", ["EN", "TH"])),
        Arc::new(ColorMarkedRule::retranslate("yellow", "CH", ["EN", "TH"])),
        Arc::new(ColorMarkedRule::shorten("blue", "CH", ["EN", "TH"])),
        Arc::new(DerivedRule::new("EN", ["TH"])),
        Arc::new(PatternRule::new("^[a-z]{10,}$", "review", 2).expect("static pattern")),
    ]
}

fn split(state: &DataState, budget: usize) -> SplitOutcome {
    TaskSplitter::new(budget).split_with_metadata(state, &all_rules(), &BTreeMap::new())
}

proptest! {
    #[test]
    fn at_most_one_task_per_cell(state in state_strategy()) {
        let outcome = split(&state, 20);

        let mut cells = HashSet::new();
        for task in outcome.tasks.iter() {
            prop_assert!(cells.insert((task.sheet.clone(), task.row, task.col)));
        }
        prop_assert!(outcome.tasks.validate().is_ok());
    }

    #[test]
    fn splitting_is_deterministic(state in state_strategy(), budget in 1usize..40) {
        let first = split(&state, budget);
        let second = split(&state, budget);

        prop_assert_eq!(first.tasks, second.tasks);
        prop_assert_eq!(first.batches, second.batches);
    }

    #[test]
    fn every_task_is_well_formed_and_batched(state in state_strategy(), budget in 1usize..40) {
        let outcome = split(&state, budget);

        for task in outcome.tasks.iter() {
            prop_assert!(task.validate().is_ok());
            let batch = task.batch_id.clone().unwrap_or_default();
            let prefix = format!("{}-", task.target_lang);
            prop_assert!(batch.starts_with(&prefix));
        }

        for batch in &outcome.batches {
            prop_assert!(!batch.task_ids.is_empty());
            // Only a lone oversize task may exceed the budget.
            prop_assert!(batch.chars <= budget || batch.task_ids.len() == 1);
        }
    }

    #[test]
    fn tasks_are_ordered_by_priority_then_id(state in state_strategy()) {
        let outcome = split(&state, 2000);
        let tasks = outcome.tasks.as_slice();

        for pair in tasks.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            prop_assert!(
                a.priority > b.priority || (a.priority == b.priority && a.task_id < b.task_id)
            );
        }
    }
}
