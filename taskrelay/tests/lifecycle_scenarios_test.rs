//! Integration tests for the task lifecycle.
//!
//! These tests drive a real [`Injector`] against a chat log on disk. A
//! simulated consumer, hooked in through the verification delay, can be told
//! to drop the last line of the log, which makes the next delivery fail
//! verification the way a re-flushing chat frontend would.

use std::cell::Cell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use tempfile::TempDir;
use taskrelay::catalog::Catalog;
use taskrelay::injector::{Injector, RetryPolicy};
use taskrelay::lifecycle::{LifecycleController, LifecycleError, RetryToken, Step};
use taskrelay::store::ProgressStore;
use taskrelay::types::{ProgressState, TaskId};

// =============================================================================
// Test Helpers
// =============================================================================

const CATALOG: &str = concat!(
    r#"{"a": {"title": "Alpha", "description": "First task."}}"#,
    "\n",
    r#"{"b": {"title": "Beta", "description": "Second task."}}"#,
    "\n",
    r#"{"c": {"title": "Gamma", "description": "Third task."}}"#,
    "\n",
);

/// A workspace with a catalog, a chat log, and a controllable consumer.
struct Harness {
    dir: TempDir,
    log: PathBuf,
    /// While set, the consumer drops the log's last line on every poll.
    interfere: Rc<Cell<bool>>,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("problems.jsonl"), CATALOG).unwrap();
        let log = dir.path().join("Alice - 2025-09-09@20h27m39s.jsonl");
        fs::write(&log, "{\"name\":\"Alice\",\"is_user\":false,\"mes\":\"Hello!\"}\n").unwrap();

        Self {
            dir,
            log,
            interfere: Rc::new(Cell::new(false)),
        }
    }

    fn progress_path(&self) -> PathBuf {
        self.dir.path().join("progress.json")
    }

    fn injector(&self) -> Injector {
        let interfere = Rc::clone(&self.interfere);
        let log = self.log.clone();
        Injector::new(RetryPolicy::fast_for_tests()).with_delay(move |_: Duration| {
            if interfere.get() {
                drop_last_line(&log);
            }
        })
    }

    fn open(&self) -> LifecycleController {
        self.open_at(self.progress_path())
    }

    fn open_at(&self, progress: PathBuf) -> LifecycleController {
        let catalog = Catalog::load(&self.dir.path().join("problems.jsonl")).unwrap();
        let store = ProgressStore::new(progress);
        LifecycleController::open(catalog, store, self.injector()).unwrap()
    }

    fn started(&self) -> LifecycleController {
        let mut controller = self.open();
        controller.start(&self.log).unwrap();
        controller
    }

    fn log_lines(&self) -> Vec<serde_json::Value> {
        fs::read_to_string(&self.log)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }
}

fn drop_last_line(path: &Path) {
    let contents = fs::read_to_string(path).unwrap();
    let mut lines: Vec<&str> = contents.lines().collect();
    lines.pop();
    let mut rewritten = lines.join("\n");
    if !rewritten.is_empty() {
        rewritten.push('\n');
    }
    fs::write(path, rewritten).unwrap();
}

fn ids(raw: &[&str]) -> Vec<TaskId> {
    raw.iter().map(|id| TaskId::from(*id)).collect()
}

fn assert_queues(state: &ProgressState, not_started: &[&str], current: Option<&str>, completed: &[&str]) {
    assert_eq!(state.tasks.not_started, ids(not_started), "not_started");
    assert_eq!(state.current().map(TaskId::as_str), current, "in_progress");
    assert_eq!(state.tasks.completed, ids(completed), "completed");
}

/// Every catalog id sits in exactly one queue.
fn assert_partition(controller: &LifecycleController) {
    let mut seen: HashMap<&TaskId, usize> = HashMap::new();
    for id in controller.state().all_ids() {
        *seen.entry(id).or_default() += 1;
    }
    for id in controller.catalog().ids() {
        assert_eq!(seen.get(id), Some(&1), "task {id} must be in exactly one queue");
    }
    assert_eq!(seen.len(), controller.catalog().len());
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn scenario_a_initialize_seeds_catalog_order() {
    let harness = Harness::new();

    let controller = harness.open();

    assert_queues(controller.state(), &["a", "b", "c"], None, &[]);
    assert_partition(&controller);
}

#[test]
fn scenario_b_first_advance_starts_first_task() {
    let harness = Harness::new();
    let mut controller = harness.started();

    let step = controller.advance().unwrap();

    assert_eq!(
        step,
        Step::Delivered {
            task: TaskId::from("a"),
            completed: None
        }
    );
    assert_queues(controller.state(), &["b", "c"], Some("a"), &[]);

    let lines = harness.log_lines();
    let record = lines.last().unwrap();
    assert_eq!(record["name"], "User");
    assert_eq!(record["is_user"], true);
    assert_eq!(record["is_system"], false);
    assert_eq!(record["extra"], serde_json::json!({}));
    assert!(record["mes"].as_str().unwrap().contains("<problem_name>Alpha</problem_name>"));
    assert!(record["send_date"].as_str().unwrap().ends_with('m'));
}

#[test]
fn scenario_c_second_advance_completes_first_task() {
    let harness = Harness::new();
    let mut controller = harness.started();
    controller.advance().unwrap();

    let step = controller.advance().unwrap();

    assert_eq!(
        step,
        Step::Delivered {
            task: TaskId::from("b"),
            completed: Some(TaskId::from("a"))
        }
    );
    assert_queues(controller.state(), &["c"], Some("b"), &["a"]);
    assert_partition(&controller);
}

#[test]
fn scenario_d_failed_advance_returns_token_and_changes_nothing() {
    let harness = Harness::new();
    let mut controller = harness.started();
    controller.advance().unwrap();
    controller.advance().unwrap();
    let before = controller.state().clone();
    let on_disk = fs::read(harness.progress_path()).unwrap();

    harness.interfere.set(true);
    let step = controller.advance().unwrap();

    assert_eq!(
        step,
        Step::Failed {
            retry: RetryToken::from(TaskId::from("c"))
        }
    );
    assert_eq!(controller.state(), &before);
    assert_eq!(fs::read(harness.progress_path()).unwrap(), on_disk);
    assert_partition(&controller);
}

#[test]
fn scenario_e_retry_after_failure_matches_direct_success() {
    let harness = Harness::new();
    let mut controller = harness.started();
    controller.advance().unwrap();
    controller.advance().unwrap();

    harness.interfere.set(true);
    let failed = controller.advance().unwrap();
    harness.interfere.set(false);

    let step = controller.retry(failed.retry_token()).unwrap();

    assert_eq!(
        step,
        Step::Delivered {
            task: TaskId::from("c"),
            completed: Some(TaskId::from("b"))
        }
    );
    assert!(step.retry_token().is_none());
    assert_queues(controller.state(), &[], Some("c"), &["a", "b"]);
}

#[test]
fn scenario_f_exhausted_queue_completes_last_task() {
    let harness = Harness::new();
    let mut controller = harness.started();
    for _ in 0..3 {
        controller.advance().unwrap();
    }
    let lines_before = harness.log_lines().len();

    let step = controller.advance().unwrap();

    assert_eq!(
        step,
        Step::AllComplete {
            completed: Some(TaskId::from("c"))
        }
    );
    assert!(step.retry_token().is_none());
    assert_queues(controller.state(), &[], None, &["a", "b", "c"]);
    // Completion delivers nothing new into the log.
    assert_eq!(harness.log_lines().len(), lines_before);
}

// =============================================================================
// Properties
// =============================================================================

#[test]
fn repeated_failures_then_success_equal_single_success() {
    let direct = Harness::new();
    let mut direct_controller = direct.started();
    direct_controller.advance().unwrap();

    let flaky = Harness::new();
    let mut flaky_controller = flaky.started();
    flaky.interfere.set(true);
    let mut step = flaky_controller.advance().unwrap();
    for _ in 0..3 {
        step = flaky_controller.retry(step.retry_token()).unwrap();
        assert!(matches!(step, Step::Failed { .. }));
    }
    flaky.interfere.set(false);
    flaky_controller.retry(step.retry_token()).unwrap();

    assert_eq!(flaky_controller.state().tasks, direct_controller.state().tasks);
    let reloaded = ProgressStore::new(flaky.progress_path()).load().unwrap().unwrap();
    assert_eq!(reloaded.tasks, direct_controller.state().tasks);
}

#[test]
fn queue_order_is_strict_fifo() {
    let harness = Harness::new();
    let mut controller = harness.started();

    let mut delivered = Vec::new();
    while let Step::Delivered { task, .. } = controller.advance().unwrap() {
        delivered.push(task);
        assert_partition(&controller);
    }

    assert_eq!(delivered, ids(&["a", "b", "c"]));
    assert_eq!(controller.state().tasks.completed, ids(&["a", "b", "c"]));
}

#[test]
fn stale_retry_token_does_not_touch_the_log() {
    let harness = Harness::new();
    let mut controller = harness.started();
    controller.advance().unwrap();
    let lines_before = harness.log_lines().len();

    let token = RetryToken::from(TaskId::from("a"));
    let step = controller.retry(Some(&token)).unwrap();

    assert_eq!(step, Step::Stale { retry: token });
    assert_eq!(harness.log_lines().len(), lines_before);
    assert_queues(controller.state(), &["b", "c"], Some("a"), &[]);
}

#[test]
fn progress_survives_restart() {
    let harness = Harness::new();
    {
        let mut controller = harness.started();
        controller.advance().unwrap();
        controller.advance().unwrap();
    }

    let reopened = harness.open();

    assert_queues(reopened.state(), &["c"], Some("b"), &["a"]);
    assert_eq!(
        reopened.state().active_log(),
        Some(fs::canonicalize(&harness.log).unwrap().as_path())
    );
}

#[test]
fn restart_into_new_log_redelivers_current_task() {
    let harness = Harness::new();
    let mut controller = harness.started();
    controller.advance().unwrap();

    let new_log = harness.dir.path().join("Alice - 2025-09-10@08h00m00s.jsonl");
    fs::write(&new_log, "").unwrap();
    let started = controller.start(&new_log).unwrap();

    let (id, delivery) = started.reinjected.unwrap();
    assert_eq!(id, TaskId::from("a"));
    assert!(delivery.is_verified());
    let contents = fs::read_to_string(&new_log).unwrap();
    assert!(contents.contains("<problem_name>Alpha</problem_name>"));
    // Re-delivery is not a transition.
    assert_queues(controller.state(), &["b", "c"], Some("a"), &[]);
}

#[test]
fn failed_commit_after_verified_delivery_changes_nothing() {
    let harness = Harness::new();
    let hop = harness.dir.path().join("state");
    fs::create_dir(&hop).unwrap();
    // Resolves to the harness progress file only while `state/` exists.
    let mut controller = harness.open_at(hop.join("..").join("progress.json"));
    controller.start(&harness.log).unwrap();
    controller.advance().unwrap();
    let before = controller.state().clone();
    let on_disk = fs::read(harness.progress_path()).unwrap();
    let lines_before = harness.log_lines().len();

    fs::remove_dir(&hop).unwrap();
    let err = controller.advance().unwrap_err();

    assert!(matches!(err, LifecycleError::Store(_)));
    // The record reached the log, but no transition was adopted.
    assert_eq!(harness.log_lines().len(), lines_before + 1);
    assert_eq!(controller.state(), &before);
    assert_eq!(fs::read(harness.progress_path()).unwrap(), on_disk);
    let reloaded = ProgressStore::new(harness.progress_path()).load().unwrap();
    assert_eq!(reloaded, Some(before));
}

#[test]
fn reset_then_restart_from_scratch() {
    let harness = Harness::new();
    let mut controller = harness.started();
    controller.advance().unwrap();

    let reset = controller.reset(true).unwrap();

    let backup = reset.backup.unwrap();
    let archived: ProgressState = serde_json::from_str(&fs::read_to_string(backup).unwrap()).unwrap();
    assert_queues(&archived, &["b", "c"], Some("a"), &[]);

    let reopened = harness.open();
    assert_queues(reopened.state(), &["a", "b", "c"], None, &[]);
    assert!(reopened.state().active_log().is_none());
}
