//! Shared fixtures for letter-core integration tests

#![allow(dead_code)]

use chrono::Utc;
use letter_core::{
    LetterStore, LetterWorkflow, MemoryStore, StubMailer, StubRenderer, WorkflowSettings,
};
use letter_types::{
    BulkOperation, BulkOperationId, BulkOperationType, BulkRequest, DataSource, DigitalSignature,
    Employee, EmployeeId, FieldDataType, GenerateRequest, LetterStatus, LetterTemplate,
    SignatureId, StatusHistoryEntry, TemplateField, TemplateId,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub const TEMPLATE_ID: &str = "tpl-offer";
pub const SIGNATURE_IMAGE: &str = "signatures/hr-director.png";

pub struct Fixture {
    pub workflow: LetterWorkflow,
    pub store: Arc<MemoryStore>,
    pub renderer: Arc<StubRenderer>,
    pub mailer: Arc<StubMailer>,
}

pub fn settings() -> WorkflowSettings {
    WorkflowSettings {
        max_retries: 3,
        bulk_parallelism: 4,
        render_timeout: Duration::from_secs(5),
        mail_timeout: Duration::from_secs(5),
    }
}

pub async fn fixture(employees: usize) -> Fixture {
    fixture_with(employees, settings(), StubRenderer::new()).await
}

pub async fn fixture_with(employees: usize, settings: WorkflowSettings, renderer: StubRenderer) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let renderer = Arc::new(renderer);
    let mailer = Arc::new(StubMailer::new());

    store.save_template(&offer_template()).await.unwrap();
    store.save_signature(&signature()).await.unwrap();
    store.put_file(SIGNATURE_IMAGE, b"PNG-SIGNATURE".to_vec()).await;

    for i in 1..=employees {
        store.save_employee(&employee(i)).await.unwrap();
    }

    let workflow = LetterWorkflow::new(store.clone(), renderer.clone(), mailer.clone(), settings).unwrap();

    Fixture {
        workflow,
        store,
        renderer,
        mailer,
    }
}

pub fn signature() -> DigitalSignature {
    DigitalSignature {
        id: SignatureId::new("sig-hr"),
        authority_name: "Meera Iyer".to_string(),
        designation: Some("HR Director".to_string()),
        image_reference: SIGNATURE_IMAGE.to_string(),
        is_active: true,
        sort_order: 0,
        created_at: Utc::now(),
    }
}

pub fn offer_template() -> LetterTemplate {
    LetterTemplate {
        id: TemplateId::new(TEMPLATE_ID),
        name: "Offer Letter".to_string(),
        letter_type: "Offer".to_string(),
        subject: "Offer for {{Name}}".to_string(),
        content: "Dear {{Name}}, we are pleased to offer you {{Amount}}.".to_string(),
        fields: vec![
            field("Name", FieldDataType::Text, true, None, 1),
            field("Amount", FieldDataType::Number, true, None, 2),
            field("JoiningDate", FieldDataType::Date, false, Some("2026-11-01"), 3),
        ],
        is_active: true,
        data_source: DataSource::Database,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn field(name: &str, data_type: FieldDataType, required: bool, default: Option<&str>, order: i32) -> TemplateField {
    TemplateField {
        name: name.to_string(),
        data_type,
        required,
        default_value: default.map(str::to_string),
        sort_order: order,
    }
}

pub fn employee_id(i: usize) -> EmployeeId {
    EmployeeId::new(format!("E{}", i))
}

pub fn employee_name(i: usize) -> String {
    format!("Employee {}", i)
}

pub fn employee_email(i: usize) -> String {
    format!("employee{}@example.com", i)
}

pub fn employee(i: usize) -> Employee {
    Employee {
        id: employee_id(i),
        employee_code: format!("EMP{:03}", i),
        name: employee_name(i),
        email: employee_email(i),
        department: Some("Engineering".to_string()),
        designation: Some("Engineer".to_string()),
        is_active: true,
        attributes: BTreeMap::new(),
    }
}

pub fn generate_request(i: usize, amount: Option<serde_json::Value>) -> GenerateRequest {
    let mut field_values = BTreeMap::new();
    if let Some(amount) = amount {
        field_values.insert("Amount".to_string(), amount);
    }
    GenerateRequest {
        template_id: TemplateId::new(TEMPLATE_ID),
        employee_id: employee_id(i),
        signature_id: None,
        field_values,
        actor: Some("hr-admin".to_string()),
    }
}

pub fn bulk_request(operation_type: BulkOperationType, employees: impl IntoIterator<Item = usize>) -> BulkRequest {
    let mut common_field_values = BTreeMap::new();
    common_field_values.insert("Amount".to_string(), serde_json::json!(500));
    BulkRequest {
        operation_type,
        template_id: TemplateId::new(TEMPLATE_ID),
        employee_ids: employees.into_iter().map(employee_id).collect(),
        common_field_values,
        signature_id: None,
        actor: Some("hr-admin".to_string()),
    }
}

/// Poll until the operation has left `Running`
pub async fn wait_for_bulk(workflow: &LetterWorkflow, id: &BulkOperationId) -> BulkOperation {
    for _ in 0..500 {
        let operation = workflow.bulk_status(id).await.unwrap();
        if !operation.is_running() {
            return operation;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("bulk operation {} did not finish in time", id);
}

/// History is a valid walk of the status graph starting at `Generated`
pub fn assert_valid_walk(history: &[StatusHistoryEntry]) {
    assert!(!history.is_empty(), "history must not be empty");
    assert_eq!(history[0].from_status, None);
    assert_eq!(history[0].to_status, LetterStatus::Generated);

    for pair in history.windows(2) {
        let from = pair[1].from_status.expect("later entries carry a from-status");
        assert_eq!(from, pair[0].to_status, "history must be contiguous");
        assert!(
            from.can_transition_to(pair[1].to_status),
            "{} -> {} is not a valid edge",
            from,
            pair[1].to_status
        );
    }
}
