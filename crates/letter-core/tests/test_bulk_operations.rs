mod common;

use common::*;
use letter_core::{
    BulkTriggerInbox, FileStore, LetterError, LetterStore, LetterWorkflow, StubMailer,
    StubRenderer, TriggerOutcome,
};
use letter_types::{BulkOperation, BulkOperationType, BulkStatus, LetterStatus, TemplateId};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn test_partial_failure_is_isolated() {
    let fx = fixture(3).await;
    fx.renderer.set_failing_values([employee_name(2)]);

    let started = fx
        .workflow
        .run_bulk(bulk_request(BulkOperationType::Generate, 1..=3))
        .await
        .unwrap();
    assert_eq!(started.status, BulkStatus::Running);
    assert_eq!(started.total_items, 3);

    let finished = wait_for_bulk(&fx.workflow, &started.id).await;
    assert_eq!(finished.status, BulkStatus::Completed);
    assert_eq!(finished.completed_items, 2);
    assert_eq!(finished.failed_items, 1);
    assert!(finished.completed_at.is_some());

    let failed = finished.result_for(&employee_id(2)).unwrap();
    assert!(!failed.success);
    assert!(failed.error_message.as_ref().unwrap().contains("Render failed"));
    assert_eq!(failed.employee_name.as_deref(), Some("Employee 2"));

    let letters = fx.store.list_letters().await.unwrap();
    assert_eq!(letters.len(), 2);
    assert!(letters.iter().all(|l| l.employee_id != employee_id(2)));
}

#[tokio::test]
async fn test_one_failure_among_ten() {
    let fx = fixture(10).await;
    fx.renderer.set_failing_values([employee_name(7)]);

    let started = fx
        .workflow
        .run_bulk(bulk_request(BulkOperationType::Generate, 1..=10))
        .await
        .unwrap();
    let finished = wait_for_bulk(&fx.workflow, &started.id).await;

    assert_eq!(finished.completed_items, 9);
    assert_eq!(finished.failed_items, 1);
    assert_eq!(finished.failed_employee_ids(), vec![employee_id(7)]);
    assert_eq!(finished.results.len(), 10);
}

#[tokio::test]
async fn test_retry_only_reruns_failed_items() {
    let fx = fixture(3).await;
    fx.renderer.set_failing_values([employee_name(2)]);

    let started = fx
        .workflow
        .run_bulk(bulk_request(BulkOperationType::Generate, 1..=3))
        .await
        .unwrap();
    wait_for_bulk(&fx.workflow, &started.id).await;
    assert_eq!(fx.renderer.calls(), 3);

    // still failing: the item stays failed and counts an extra attempt
    let result = fx.workflow.retry_bulk(&started.id, None).await.unwrap();
    assert_eq!(result.retried, vec![employee_id(2)]);
    assert_eq!(result.still_failed, vec![employee_id(2)]);
    assert!(result.succeeded.is_empty());
    assert_eq!(fx.renderer.calls(), 4);

    fx.renderer.clear_failures();
    let requested = vec![employee_id(1), employee_id(2)];
    let result = fx.workflow.retry_bulk(&started.id, Some(&requested)).await.unwrap();
    assert_eq!(result.succeeded, vec![employee_id(2)]);
    assert_eq!(result.skipped, vec![employee_id(1)]);
    assert_eq!(fx.renderer.calls(), 5);

    let operation = fx.workflow.bulk_status(&started.id).await.unwrap();
    assert_eq!(operation.completed_items, 3);
    assert_eq!(operation.failed_items, 0);
    assert_eq!(operation.result_for(&employee_id(2)).unwrap().attempts, 3);
    assert!(operation.result_for(&employee_id(2)).unwrap().letter_id.is_some());

    // nothing left to retry, nothing executes
    let result = fx.workflow.retry_bulk(&started.id, None).await.unwrap();
    assert!(result.retried.is_empty());
    assert_eq!(fx.renderer.calls(), 5);
    assert_eq!(fx.store.list_letters().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_cancel_skips_unstarted_items() {
    let mut settings = settings();
    settings.bulk_parallelism = 1;
    let renderer = StubRenderer::new().with_delay(Duration::from_millis(100));
    let fx = fixture_with(10, settings, renderer).await;

    let started = fx
        .workflow
        .run_bulk(bulk_request(BulkOperationType::Generate, 1..=10))
        .await
        .unwrap();
    assert!(fx.workflow.cancel_bulk(&started.id).await.unwrap());

    let finished = wait_for_bulk(&fx.workflow, &started.id).await;
    assert_eq!(finished.status, BulkStatus::Cancelled);
    assert!(finished.processed_items() < 10);
    assert!(finished.completed_at.is_some());

    // already finished
    assert!(!fx.workflow.cancel_bulk(&started.id).await.unwrap());
}

#[tokio::test]
async fn test_retry_refused_while_running() {
    let mut settings = settings();
    settings.bulk_parallelism = 1;
    let renderer = StubRenderer::new().with_delay(Duration::from_millis(50));
    let fx = fixture_with(4, settings, renderer).await;

    let started = fx
        .workflow
        .run_bulk(bulk_request(BulkOperationType::Generate, 1..=4))
        .await
        .unwrap();

    let err = fx.workflow.retry_bulk(&started.id, None).await.unwrap_err();
    assert!(matches!(err, LetterError::Validation(_)));
    assert_eq!(fx.workflow.health_check().await.unwrap().running_operations, 1);

    wait_for_bulk(&fx.workflow, &started.id).await;
}

#[tokio::test]
async fn test_letter_numbers_unique_under_concurrency() {
    let mut settings = settings();
    settings.bulk_parallelism = 8;
    let fx = fixture_with(20, settings, StubRenderer::new()).await;

    let started = fx
        .workflow
        .run_bulk(bulk_request(BulkOperationType::Generate, 1..=20))
        .await
        .unwrap();
    let finished = wait_for_bulk(&fx.workflow, &started.id).await;
    assert_eq!(finished.completed_items, 20);

    let letters = fx.store.list_letters().await.unwrap();
    let numbers: HashSet<String> = letters.iter().map(|l| l.letter_number.clone()).collect();
    assert_eq!(letters.len(), 20);
    assert_eq!(numbers.len(), 20);
}

#[tokio::test]
async fn test_preview_bulk_persists_nothing() {
    let fx = fixture(3).await;

    let started = fx
        .workflow
        .run_bulk(bulk_request(BulkOperationType::Preview, 1..=3))
        .await
        .unwrap();
    let finished = wait_for_bulk(&fx.workflow, &started.id).await;

    assert_eq!(finished.completed_items, 3);
    assert!(finished.results.iter().all(|r| r.letter_id.is_none()));
    assert!(fx.store.list_letters().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_send_bulk_resends_instead_of_regenerating() {
    let fx = fixture(3).await;
    fx.mailer.set_failing_recipients([employee_email(3)]);

    let started = fx
        .workflow
        .run_bulk(bulk_request(BulkOperationType::SendEmail, 1..=3))
        .await
        .unwrap();
    let finished = wait_for_bulk(&fx.workflow, &started.id).await;
    assert_eq!(finished.completed_items, 2);
    assert_eq!(finished.failed_employee_ids(), vec![employee_id(3)]);

    let failed_letter = finished.result_for(&employee_id(3)).unwrap().letter_id.clone().unwrap();
    assert_eq!(
        fx.workflow.get_letter(&failed_letter).await.unwrap().status,
        LetterStatus::Failed
    );

    fx.mailer.set_failing_recipients(Vec::<String>::new());
    let result = fx.workflow.retry_bulk(&started.id, None).await.unwrap();
    assert_eq!(result.succeeded, vec![employee_id(3)]);

    let letter = fx.workflow.get_letter(&failed_letter).await.unwrap();
    assert_eq!(letter.status, LetterStatus::Sent);
    assert_eq!(letter.retry_count, 1);
    assert_eq!(fx.store.list_letters().await.unwrap().len(), 3);
    assert_eq!(fx.mailer.sent_count().await, 3);
}

#[tokio::test]
async fn test_bulk_request_validation() {
    let fx = fixture(1).await;

    let err = fx
        .workflow
        .run_bulk(bulk_request(BulkOperationType::Generate, Vec::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, LetterError::Validation(_)));

    let mut request = bulk_request(BulkOperationType::Generate, [1]);
    request.template_id = TemplateId::new("tpl-missing");
    let err = fx.workflow.run_bulk(request).await.unwrap_err();
    assert!(matches!(err, LetterError::NotFound(_)));

    let mut retired = offer_template();
    retired.id = TemplateId::new("tpl-retired");
    retired.is_active = false;
    fx.store.save_template(&retired).await.unwrap();
    let mut request = bulk_request(BulkOperationType::Generate, [1]);
    request.template_id = retired.id.clone();
    let err = fx.workflow.run_bulk(request).await.unwrap_err();
    assert!(matches!(err, LetterError::NotFound(ref msg) if msg.contains("inactive")));
    assert!(fx.workflow.list_bulk_operations().await.unwrap().is_empty());

    // duplicate employees are processed once
    let started = fx
        .workflow
        .run_bulk(bulk_request(BulkOperationType::Generate, [1, 1, 1]))
        .await
        .unwrap();
    assert_eq!(started.total_items, 1);
    wait_for_bulk(&fx.workflow, &started.id).await;
    assert!(fx.workflow.list_bulk_operations().await.unwrap().len() == 1);
}

#[tokio::test]
async fn test_reconcile_interrupted_operations() {
    let fx = fixture(2).await;
    let stale = BulkOperation::new(bulk_request(BulkOperationType::Generate, 1..=2));
    fx.store.save_bulk_operation(&stale).await.unwrap();

    let reconciled = fx.workflow.bulk().reconcile_interrupted().await.unwrap();
    assert_eq!(reconciled, 1);

    let operation = fx.workflow.bulk_status(&stale.id).await.unwrap();
    assert_eq!(operation.status, BulkStatus::Cancelled);
    assert_eq!(fx.workflow.bulk().reconcile_interrupted().await.unwrap(), 0);
}

#[tokio::test]
async fn test_trigger_inbox_with_file_store() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileStore::new(dir.path()).unwrap());
    store.save_template(&offer_template()).await.unwrap();
    store.save_signature(&signature()).await.unwrap();
    std::fs::write(dir.path().join(SIGNATURE_IMAGE), b"PNG-SIGNATURE").unwrap();
    for i in 1..=2 {
        store.save_employee(&employee(i)).await.unwrap();
    }

    let workflow = LetterWorkflow::new(
        store.clone(),
        Arc::new(StubRenderer::new()),
        Arc::new(StubMailer::new()),
        settings(),
    )
    .unwrap();
    let inbox = BulkTriggerInbox::new(workflow.bulk().clone(), dir.path())
        .unwrap()
        .with_settle_delay(Duration::from_millis(10));

    let request = bulk_request(BulkOperationType::Generate, 1..=2);
    std::fs::write(
        inbox.triggers_dir().join("offers.json"),
        serde_json::to_string(&request).unwrap(),
    )
    .unwrap();
    std::fs::write(inbox.triggers_dir().join("broken.json"), "{ not json").unwrap();
    std::fs::write(inbox.triggers_dir().join("notes.txt"), "ignored").unwrap();

    assert_eq!(inbox.process_existing().await.unwrap(), 1);
    assert!(inbox.triggers_dir().join("processed/offers.json").exists());
    assert!(inbox.triggers_dir().join("failed/broken.json").exists());
    assert!(inbox.triggers_dir().join("notes.txt").exists());

    let operations = workflow.list_bulk_operations().await.unwrap();
    assert_eq!(operations.len(), 1);
    let finished = wait_for_bulk(&workflow, &operations[0].id).await;
    assert_eq!(finished.completed_items, 2);

    // a moved file is not picked up again
    let outcome = inbox
        .process_file(&inbox.triggers_dir().join("offers.json"))
        .await
        .unwrap();
    assert!(matches!(outcome, TriggerOutcome::Ignored));

    // records survive a restart of the store
    let reopened = FileStore::new(dir.path()).unwrap();
    assert_eq!(reopened.list_letters().await.unwrap().len(), 2);
    assert!(reopened.get_bulk_operation(&finished.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_trigger_read_again_while_being_written() {
    let dir = TempDir::new().unwrap();
    let fx = fixture(2).await;
    let inbox = BulkTriggerInbox::new(fx.workflow.bulk().clone(), dir.path())
        .unwrap()
        .with_settle_delay(Duration::from_millis(300));

    let json = serde_json::to_string(&bulk_request(BulkOperationType::Generate, 1..=2)).unwrap();
    let head = &json[..json.len() / 2];
    let path = inbox.triggers_dir().join("late.json");
    std::fs::write(&path, head).unwrap();

    let writer_path = path.clone();
    let complete = json.clone();
    let writer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        std::fs::write(&writer_path, complete).unwrap();
    });

    let outcome = inbox.process_file(&path).await.unwrap();
    writer.await.unwrap();

    let TriggerOutcome::Submitted(operation_id) = outcome else {
        panic!("expected the completed trigger to be submitted, got {:?}", outcome);
    };
    assert!(inbox.triggers_dir().join("processed/late.json").exists());
    let finished = wait_for_bulk(&fx.workflow, &operation_id).await;
    assert_eq!(finished.completed_items, 2);
}
