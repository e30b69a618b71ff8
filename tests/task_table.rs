// tests/task_table.rs
mod common;
use crate::common::{TaskBuilder, TestResult};

use sheetflow::task::{TaskStatus, TaskTable};

fn table_of(n: usize) -> TaskTable {
    (1..=n)
        .map(|i| {
            TaskBuilder::new(&format!("T{i:06}"))
                .at("Sheet1", i, 1)
                .priority((i % 10) as u8 + 1)
                .build()
        })
        .collect()
}

#[test]
fn lookups_follow_the_tasks_through_sorting() -> TestResult {
    let mut tasks = table_of(25);
    tasks.sort_by_priority();

    for id in tasks.ids() {
        let task = tasks.get(&id).ok_or("lookup lost a task")?;
        assert_eq!(task.task_id, id);
    }
    let first = tasks.as_slice()[0].task_id.clone();
    tasks.get_mut(&first).ok_or("missing first")?.status = TaskStatus::Completed;
    assert_eq!(tasks.as_slice()[0].status, TaskStatus::Completed);
    assert!(tasks.get("T999999").is_none());
    Ok(())
}

#[test]
fn retain_and_replace_keep_lookups_consistent() -> TestResult {
    let mut tasks = table_of(6);
    tasks.retain(|t| t.row % 2 == 0);

    assert_eq!(tasks.ids(), vec!["T000002", "T000004", "T000006"]);
    assert!(tasks.get("T000003").is_none());
    assert_eq!(tasks.get("T000006").ok_or("missing T000006")?.row, 6);

    let done = TaskBuilder::new("T000004")
        .at("Sheet1", 4, 1)
        .status(TaskStatus::Completed)
        .result("ok")
        .build();
    assert!(tasks.replace(done));
    assert_eq!(tasks.get("T000004").ok_or("missing T000004")?.result.as_deref(), Some("ok"));
    assert!(!tasks.replace(TaskBuilder::new("T000005").build()));
    assert_eq!(tasks.len(), 3);
    Ok(())
}

#[test]
fn edited_ids_are_still_found() -> TestResult {
    let mut tasks = table_of(3);
    if let Some(task) = tasks.iter_mut().find(|t| t.task_id == "T000002") {
        task.task_id = "renamed".to_string();
    }

    assert_eq!(tasks.get("renamed").ok_or("renamed task lost")?.row, 2);
    assert!(tasks.get("T000002").is_none());
    Ok(())
}

#[test]
fn tables_serialize_as_a_plain_list() -> TestResult {
    let tasks = table_of(2);

    let json = serde_json::to_value(&tasks)?;
    let list = json.as_array().ok_or("expected a JSON array")?;
    assert_eq!(list.len(), 2);
    assert_eq!(list[0]["task_id"], "T000001");

    let back: TaskTable = serde_json::from_value(json)?;
    assert_eq!(back, tasks);
    assert_eq!(back.get("T000002").ok_or("missing T000002")?.row, 2);
    Ok(())
}
