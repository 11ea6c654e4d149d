use std::time::Duration;

use rstest::{fixture, rstest};
use serde_json::json;
use tokio::time::{sleep, timeout};

use super::*;

#[fixture]
fn params() -> ResultDocument {
    let mut params = ResultDocument::new();
    params.insert(String::from("image_id"), json!("img-1"));
    params.insert(String::from("is_force"), json!("true"));
    params.insert(String::from("properties"), json!({ "os_type": "linux" }));
    params
}

fn document(key: &str, value: &str) -> ResultDocument {
    let mut doc = ResultDocument::new();
    doc.insert(key.to_owned(), json!(value));
    doc
}

#[rstest]
fn parameter_accessors_read_task_params(params: ResultDocument) {
    let (task, _receipt) = Task::new(params, Principal::new("user", "project"));
    assert_eq!(task.param_str("image_id"), Some("img-1"));
    assert_eq!(task.param_str("missing"), None);
    assert_eq!(task.nested_str(&["properties", "os_type"]), Some("linux"));
    assert_eq!(task.nested_str(&["properties", "os_version"]), None);
    assert!(task.param_bool("is_force", false));
    assert!(task.param_bool("absent", true));
    assert_eq!(task.principal().user_id, "user");
}

#[tokio::test]
async fn schedule_run_delivers_document() {
    let runner = TaskRunner::new(1, 4);
    let (task, receipt) = Task::new(ResultDocument::new(), Principal::default());

    runner
        .schedule_run(&task, Some(document("disk_format", "raw")))
        .expect("first completion");

    let outcome = receipt.wait().await.expect("completed");
    assert_eq!(outcome, Ok(document("disk_format", "raw")));
    assert!(task.is_completed());
}

#[tokio::test]
async fn fail_delivers_failure() {
    let runner = TaskRunner::new(1, 4);
    let (task, receipt) = Task::new(ResultDocument::new(), Principal::default());

    runner
        .fail(&task, DriverError::validation("boom"))
        .expect("completion");

    let outcome = receipt.wait().await.expect("completed");
    assert_eq!(outcome, Err(DriverError::validation("boom")));
}

#[tokio::test]
async fn local_run_returns_before_work_finishes() {
    let runner = TaskRunner::new(2, 4);
    let (task, mut receipt) = Task::new(ResultDocument::new(), Principal::default());
    let (gate_tx, gate_rx) = oneshot::channel::<()>();

    runner
        .local_run(task, async move {
            gate_rx.await.ok();
            Ok(document("image_id", "ext-1"))
        })
        .await
        .expect("queued");

    sleep(Duration::from_millis(20)).await;
    assert!(receipt.try_outcome().is_none(), "work must still be pending");

    gate_tx.send(()).ok();
    let outcome = timeout(Duration::from_secs(1), receipt.wait())
        .await
        .expect("completion in time")
        .expect("completed");
    assert_eq!(outcome, Ok(document("image_id", "ext-1")));
}

#[tokio::test]
async fn local_run_failure_reaches_receipt() {
    let runner = TaskRunner::new(1, 4);
    let (task, receipt) = Task::new(ResultDocument::new(), Principal::default());

    runner
        .local_run(task, async { Err(DriverError::not_found("disk", "vol-1")) })
        .await
        .expect("queued");

    let outcome = receipt.wait().await.expect("completed");
    assert_eq!(outcome, Err(DriverError::not_found("disk", "vol-1")));
}

#[tokio::test]
async fn double_completion_is_rejected_and_halts_runner() {
    let runner = TaskRunner::new(1, 4);
    let (task, _receipt) = Task::new(ResultDocument::new(), Principal::default());

    runner.schedule_run(&task, None).expect("first completion");
    let second = runner.schedule_run(&task, None);

    assert_eq!(
        second,
        Err(TaskError::AlreadyCompleted { task_id: task.id() })
    );
    assert!(runner.is_halted());

    let (next, _next_receipt) = Task::new(ResultDocument::new(), Principal::default());
    let submitted = runner.local_run(next, async { Ok(ResultDocument::new()) }).await;
    assert_eq!(submitted, Err(TaskError::RunnerHalted));
}

#[tokio::test]
async fn worker_detects_double_completion() {
    let runner = TaskRunner::new(1, 4);
    let (task, _receipt) = Task::new(ResultDocument::new(), Principal::default());
    task.complete(Ok(ResultDocument::new()))
        .expect("out-of-band completion");

    runner
        .local_run(task.clone(), async { Ok(ResultDocument::new()) })
        .await
        .expect("queued");

    timeout(Duration::from_secs(1), async {
        while !runner.is_halted() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("runner should halt");
}

#[tokio::test]
async fn dropped_task_reports_abandoned() {
    let (task, receipt) = Task::new(ResultDocument::new(), Principal::default());
    let task_id = task.id();
    drop(task);

    assert_eq!(
        receipt.wait().await,
        Err(TaskError::Abandoned { task_id })
    );
}

#[tokio::test]
async fn shutdown_drains_queued_work() {
    let runner = TaskRunner::new(1, 8);
    let mut receipts = Vec::new();
    for index in 0..4 {
        let (task, receipt) = Task::new(ResultDocument::new(), Principal::default());
        let value = format!("job-{index}");
        runner
            .local_run(task, async move { Ok(document("image_id", &value)) })
            .await
            .expect("queued");
        receipts.push(receipt);
    }

    runner.shutdown().await;

    for receipt in receipts {
        let outcome = receipt.wait().await.expect("completed");
        assert!(outcome.is_ok());
    }
    let (late, _late_receipt) = Task::new(ResultDocument::new(), Principal::default());
    assert_eq!(
        runner.local_run(late, async { Ok(ResultDocument::new()) }).await,
        Err(TaskError::RunnerHalted)
    );
}
