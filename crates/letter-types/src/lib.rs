//! Shared types for the letter workflow engine
//!
//! Everything that crosses a crate or process boundary lives here: the
//! persisted records, the letter status graph and the request/response
//! shapes of the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Fresh random id (UUID v4)
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Strongly typed template id
    TemplateId
);
string_id!(
    /// Strongly typed employee id (internal record id, not the HR code)
    EmployeeId
);
string_id!(
    /// Strongly typed digital signature id
    SignatureId
);
string_id!(
    /// Strongly typed generated letter id
    LetterId
);
string_id!(
    /// Strongly typed bulk operation id
    BulkOperationId
);

// ---------------------------------------------------------------------------
// Letter status graph
// ---------------------------------------------------------------------------

/// Lifecycle state of a generated letter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LetterStatus {
    Generated,
    Sent,
    Delivered,
    Failed,
}

impl LetterStatus {
    pub const ALL: [LetterStatus; 4] = [
        LetterStatus::Generated,
        LetterStatus::Sent,
        LetterStatus::Delivered,
        LetterStatus::Failed,
    ];

    /// Whether `self -> to` is an edge of the status graph
    pub fn can_transition_to(self, to: LetterStatus) -> bool {
        use LetterStatus::*;
        matches!(
            (self, to),
            (Generated, Sent)
                | (Generated, Failed)
                | (Sent, Delivered)
                | (Sent, Failed)
                | (Failed, Sent)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == LetterStatus::Delivered
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generated => "Generated",
            Self::Sent => "Sent",
            Self::Delivered => "Delivered",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for LetterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown letter status: {0}")]
pub struct ParseStatusError(pub String);

impl FromStr for LetterStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LetterStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Templates, employees, signatures
// ---------------------------------------------------------------------------

/// Declared data type of a template field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FieldDataType {
    #[default]
    Text,
    Number,
    Date,
    Email,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateField {
    pub name: String,
    #[serde(default)]
    pub data_type: FieldDataType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default_value: Option<String>,
    #[serde(default)]
    pub sort_order: i32,
}

/// Where the template's field data normally comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DataSource {
    Upload,
    #[default]
    Database,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LetterTemplate {
    pub id: TemplateId,
    pub name: String,
    pub letter_type: String,
    /// Email subject; may contain `{{field}}` placeholders
    #[serde(default)]
    pub subject: String,
    /// Template body handed to the document renderer
    pub content: String,
    #[serde(default)]
    pub fields: Vec<TemplateField>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub data_source: DataSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LetterTemplate {
    pub fn field(&self, name: &str) -> Option<&TemplateField> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Employee {
    pub id: EmployeeId,
    pub employee_code: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub designation: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Additional HR attributes keyed by attribute name
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Employee {
    /// Look up an attribute by name, case-insensitively.
    ///
    /// Built-in columns win over the free-form attribute map.
    pub fn attribute(&self, name: &str) -> Option<String> {
        let key = name.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        let builtin = match key.as_str() {
            "employee_code" | "employeecode" | "code" => Some(self.employee_code.clone()),
            "name" | "employee_name" | "employeename" => Some(self.name.clone()),
            "email" | "employee_email" => Some(self.email.clone()),
            "department" => self.department.clone(),
            "designation" => self.designation.clone(),
            _ => None,
        };

        builtin.or_else(|| {
            self.attributes
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name.trim()))
                .map(|(_, v)| v.clone())
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigitalSignature {
    pub id: SignatureId,
    pub authority_name: String,
    #[serde(default)]
    pub designation: Option<String>,
    /// Path of the signature image, relative to the data root or absolute
    pub image_reference: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Generated letters and history
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundField {
    pub name: String,
    pub value: String,
}

/// Final ordered field map used to render one letter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoundFields(Vec<BoundField>);

impl BoundFields {
    pub fn new(fields: Vec<BoundField>) -> Self {
        Self(fields)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
            .map(|f| f.value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &BoundField> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// JSON object as sent to the renderer
    pub fn to_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .0
            .iter()
            .map(|f| (f.name.clone(), serde_json::Value::String(f.value.clone())))
            .collect();
        serde_json::Value::Object(map)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedLetter {
    pub id: LetterId,
    pub letter_number: String,
    pub letter_type: String,
    pub template_id: TemplateId,
    pub employee_id: EmployeeId,
    pub signature_id: SignatureId,
    /// Snapshot of the values the letter was rendered with
    pub fields: BoundFields,
    pub rendered_file: String,
    pub status: LetterStatus,
    pub generated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub email_message_id: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    /// Optimistic concurrency counter, bumped by every committed change
    pub version: u64,
}

/// One row of the append-only status history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub id: String,
    pub letter_id: LetterId,
    pub from_status: Option<LetterStatus>,
    pub to_status: LetterStatus,
    pub changed_at: DateTime<Utc>,
    pub actor: String,
    pub notes: Option<String>,
}

impl StatusHistoryEntry {
    pub fn new(
        letter_id: LetterId,
        from_status: Option<LetterStatus>,
        to_status: LetterStatus,
        actor: impl Into<String>,
        notes: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            letter_id,
            from_status,
            to_status,
            changed_at: Utc::now(),
            actor: actor.into(),
            notes,
        }
    }
}

// ---------------------------------------------------------------------------
// Bulk operations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BulkOperationType {
    Generate,
    Preview,
    SendEmail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BulkStatus {
    Running,
    Completed,
    Cancelled,
}

/// Outcome of one employee within a bulk operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkItemResult {
    pub employee_id: EmployeeId,
    pub employee_name: Option<String>,
    pub success: bool,
    pub letter_id: Option<LetterId>,
    pub error_message: Option<String>,
    pub attempts: u32,
    pub processed_at: DateTime<Utc>,
}

impl BulkItemResult {
    pub fn succeeded(
        employee_id: EmployeeId,
        employee_name: Option<String>,
        letter_id: Option<LetterId>,
    ) -> Self {
        Self {
            employee_id,
            employee_name,
            success: true,
            letter_id,
            error_message: None,
            attempts: 1,
            processed_at: Utc::now(),
        }
    }

    pub fn failed(
        employee_id: EmployeeId,
        employee_name: Option<String>,
        letter_id: Option<LetterId>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            employee_id,
            employee_name,
            success: false,
            letter_id,
            error_message: Some(error_message.into()),
            attempts: 1,
            processed_at: Utc::now(),
        }
    }
}

/// What a bulk operation was asked to do, kept for retries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkRequest {
    pub operation_type: BulkOperationType,
    pub template_id: TemplateId,
    pub employee_ids: Vec<EmployeeId>,
    #[serde(default)]
    pub common_field_values: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub signature_id: Option<SignatureId>,
    #[serde(default)]
    pub actor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkOperation {
    pub id: BulkOperationId,
    pub operation_type: BulkOperationType,
    pub template_id: TemplateId,
    pub total_items: u32,
    pub completed_items: u32,
    pub failed_items: u32,
    pub status: BulkStatus,
    pub results: Vec<BulkItemResult>,
    pub request: BulkRequest,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BulkOperation {
    pub fn new(request: BulkRequest) -> Self {
        Self {
            id: BulkOperationId::generate(),
            operation_type: request.operation_type,
            template_id: request.template_id.clone(),
            total_items: request.employee_ids.len() as u32,
            completed_items: 0,
            failed_items: 0,
            status: BulkStatus::Running,
            results: Vec::new(),
            request,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == BulkStatus::Running
    }

    pub fn processed_items(&self) -> u32 {
        self.completed_items + self.failed_items
    }

    /// Record the first outcome for an item. Ignored once every item is
    /// accounted for, so the counters can never exceed the total.
    pub fn record(&mut self, result: BulkItemResult) {
        if self.processed_items() >= self.total_items {
            return;
        }
        if self.result_for(&result.employee_id).is_some() {
            return;
        }
        if result.success {
            self.completed_items += 1;
        } else {
            self.failed_items += 1;
        }
        self.results.push(result);
    }

    /// Replace a failed item's result with the outcome of a retry
    pub fn record_retry(&mut self, result: BulkItemResult) -> bool {
        let Some(existing) = self
            .results
            .iter_mut()
            .find(|r| r.employee_id == result.employee_id)
        else {
            return false;
        };
        if existing.success {
            return false;
        }

        let attempts = existing.attempts + 1;
        if result.success {
            self.failed_items -= 1;
            self.completed_items += 1;
        }
        *existing = BulkItemResult { attempts, ..result };
        true
    }

    pub fn result_for(&self, employee_id: &EmployeeId) -> Option<&BulkItemResult> {
        self.results.iter().find(|r| &r.employee_id == employee_id)
    }

    pub fn failed_employee_ids(&self) -> Vec<EmployeeId> {
        self.results
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.employee_id.clone())
            .collect()
    }

    /// Close the operation; `cancelled` only sticks if items were skipped
    pub fn finish(&mut self, cancelled: bool) {
        self.status = if cancelled && self.processed_items() < self.total_items {
            BulkStatus::Cancelled
        } else {
            BulkStatus::Completed
        };
        self.completed_at = Some(Utc::now());
    }
}

/// Outcome of a retry request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryResult {
    pub retried: Vec<EmployeeId>,
    pub succeeded: Vec<EmployeeId>,
    pub still_failed: Vec<EmployeeId>,
    /// Requested items that were not in a failed state
    pub skipped: Vec<EmployeeId>,
}

// ---------------------------------------------------------------------------
// API request shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub template_id: TemplateId,
    pub employee_id: EmployeeId,
    #[serde(default)]
    pub signature_id: Option<SignatureId>,
    #[serde(default)]
    pub field_values: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub actor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdateRequest {
    pub new_status: LetterStatus,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub actor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStatusUpdateRequest {
    pub letter_ids: Vec<LetterId>,
    pub new_status: LetterStatus,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub actor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStatusItem {
    pub letter_id: LetterId,
    pub success: bool,
    pub status: Option<LetterStatus>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStatusResult {
    pub all_succeeded: bool,
    pub results: Vec<BatchStatusItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkRetryRequest {
    #[serde(default)]
    pub item_ids: Option<Vec<EmployeeId>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryEventKind {
    Delivered,
    Bounced,
    Failed,
}

/// Delivery report posted back by the mail provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryEvent {
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub letter_id: Option<LetterId>,
    pub kind: DeliveryEventKind,
    #[serde(default)]
    pub reason: Option<String>,
}
