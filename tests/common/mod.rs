#![allow(dead_code)]

use std::error::Error;
use std::sync::Arc;

use sheetflow::data::DataState;
use sheetflow::split::{EmptyCellRule, SplitRule};
pub use sheetflow_test_utils::builders::{DataStateBuilder, TaskBuilder};
pub use sheetflow_test_utils::{eventually, init_tracing, with_timeout};

pub type TestResult = Result<(), Box<dyn Error>>;

/// `Sheet1` with columns `CH | EN | TH` and three rows:
/// - row 0: CH only
/// - row 1: CH and EN, TH empty
/// - row 2: everything empty
pub fn translation_sheet() -> DataState {
    DataStateBuilder::new()
        .sheet("Sheet1", &["CH", "EN", "TH"])
        .row(&[Some("你好"), None, None])
        .row(&[Some("谢谢"), Some("thanks"), None])
        .row(&[None, None, None])
        .build()
}

/// Fill every empty `EN`/`TH` cell from `CH`.
pub fn translate_rules() -> Vec<Arc<dyn SplitRule>> {
    vec![Arc::new(EmptyCellRule::new("CH", ["EN", "TH"]))]
}
