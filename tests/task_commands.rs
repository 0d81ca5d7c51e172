mod support;

use predicates::str::contains;
use support::{ids, TestWorkspace};

#[test]
fn init_creates_state_and_config() {
    let ws = TestWorkspace::new();
    let data = ws.json("u1", &["init"]);
    assert_eq!(data["created"]["state_dir"], true);
    assert_eq!(data["created"]["config"], true);
    assert!(ws.file(".studysync").is_dir());

    let config = std::fs::read_to_string(ws.file(".studysync.toml")).unwrap();
    assert!(config.contains("id = \"u1\""));

    let again = ws.json("u1", &["init"]);
    assert_eq!(again["created"]["state_dir"], false);
    assert_eq!(again["created"]["config"], false);
}

#[test]
fn config_viewer_is_used_without_flag() {
    let ws = TestWorkspace::initialized();
    ws.cmd()
        .args(["course", "add", "Algebra"])
        .assert()
        .success()
        .stdout(contains("studysync course add: created"));
}

#[test]
fn task_lifecycle() {
    let ws = TestWorkspace::initialized();
    let course = ws.create_course("u1", "Algebra");
    ws.json("u2", &["course", "join", &course]);

    let task = ws.create_task("u1", &course, "Essay", &["--due", "2d", "--priority", "high"]);

    let assigned = ws.json("u1", &["task", "assign", &task, "--to", "u2"]);
    assert_eq!(assigned["assignee"], "u2");
    assert_eq!(assigned["updated_by"], "u1");

    let visible = ws.json("u2", &["task", "list"]);
    assert_eq!(ids(&visible), vec![task.clone()]);
    assert_eq!(visible["scope"], "member:u2");

    let done = ws.json("u2", &["task", "done", &task]);
    assert_eq!(done["status"], "completed");
    let reopened = ws.json("u2", &["task", "reopen", &task]);
    assert_eq!(reopened["status"], "pending");

    let cleared = ws.json("u1", &["task", "assign", &task, "--clear"]);
    assert!(cleared.get("assignee").is_none());
    let undated = ws.json("u1", &["task", "due", &task, "--clear"]);
    assert!(undated.get("due").is_none());
}

#[test]
fn reorder_sets_display_order() {
    let ws = TestWorkspace::initialized();
    let course = ws.create_course("u1", "Algebra");
    let t1 = ws.create_task("u1", &course, "one", &[]);
    let t2 = ws.create_task("u1", &course, "two", &[]);
    let t3 = ws.create_task("u1", &course, "three", &[]);

    let outcome = ws.json("u1", &["task", "reorder", &t3, &t1, &t2]);
    let orders: Vec<i64> = outcome["assignments"]
        .as_array()
        .unwrap()
        .iter()
        .map(|assignment| assignment["order"].as_i64().unwrap())
        .collect();
    assert!(orders.windows(2).all(|pair| pair[0] < pair[1]));

    let listed = ws.json("u1", &["task", "list", "--course", &course]);
    assert_eq!(ids(&listed), vec![t3.clone(), t1.clone(), t2.clone()]);

    ws.json("u1", &["task", "move", &t2, "--over", &t3]);
    let moved = ws.json("u1", &["task", "list", "--course", &course]);
    assert_eq!(ids(&moved), vec![t2, t3, t1]);
}

#[test]
fn user_profile_names_the_actor() {
    let ws = TestWorkspace::initialized();
    let profile = ws.json("u1", &["user", "set", "--name", "Ada"]);
    assert_eq!(profile["display_name"], "Ada");

    let updated = ws.json("u1", &["user", "set", "--email", "ada@example.com"]);
    assert_eq!(updated["display_name"], "Ada");
    assert_eq!(updated["email"], "ada@example.com");
}

#[test]
fn update_by_someone_else_is_announced() {
    let ws = TestWorkspace::initialized();
    let course = ws.create_course("u2", "Algebra");
    ws.json("u1", &["course", "join", &course]);
    ws.json("u2", &["user", "set", "--name", "Ada"]);
    let task = ws.create_task("u2", &course, "Essay", &["--assignee", "u1"]);
    let events = ws.file("events.jsonl");

    ws.cmd_as("u2")
        .args(["task", "due", &task, "2d", "--events"])
        .arg(&events)
        .assert()
        .success()
        .stdout(contains("[info] Ada updated \"Essay\" in Algebra"));

    let shown: serde_json::Value = std::fs::read_to_string(&events)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .find(|event: &serde_json::Value| event["event"] == "notification_shown")
        .expect("notification_shown event");
    assert_eq!(shown["tag"], format!("task-updated-{task}"));
    assert_eq!(shown["data"]["title"], "Task Updated");

    // The assignee finishing their own task is not announced.
    let done = ws.json("u1", &["task", "done", &task]);
    assert_eq!(done["status"], "completed");
    assert!(done.get("notification").is_none());
}

#[test]
fn delete_removes_and_warns() {
    let ws = TestWorkspace::initialized();
    let course = ws.create_course("u1", "Algebra");
    ws.json("u1", &["user", "set", "--name", "Ben"]);
    let task = ws.create_task("u1", &course, "Essay", &[]);

    let deleted = ws.json("u1", &["task", "delete", &task]);
    assert_eq!(deleted["id"], task.as_str());
    let notification = &deleted["notification"]["notification"];
    assert_eq!(notification["body"], "Ben deleted \"Essay\" from Algebra");
    assert_eq!(notification["level"], "warning");
    assert_eq!(deleted["notification"]["in_app"]["outcome"], "delivered");
    assert_eq!(deleted["notification"]["platform"]["outcome"], "skipped");

    let listed = ws.json("u1", &["task", "list", "--course", &course]);
    assert!(ids(&listed).is_empty());

    ws.cmd_as("u1")
        .args(["task", "delete", &task])
        .assert()
        .code(2);
}
