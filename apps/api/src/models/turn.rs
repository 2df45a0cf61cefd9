//! Wire shapes for the wizard turn (§6): the single `process_cv_orchestrated`
//! request/response pair, the UI action contract, and `update_cv_field`'s
//! tagged `Update` variant (§9 Design Notes).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{CvData, Metadata, Stage};

#[derive(Debug, Clone, Deserialize)]
pub struct UserAction {
    pub id: String,
    #[serde(default)]
    pub payload: Option<Value>,
}

/// Request body for `process_cv_orchestrated` (§6).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProcessTurnParams {
    #[serde(default)]
    pub docx_base64: Option<String>,
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub user_action: Option<UserAction>,
    #[serde(default)]
    pub job_posting_url: Option<String>,
    #[serde(default)]
    pub job_posting_text: Option<String>,
    #[serde(default)]
    pub client_context: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UiActionButton {
    pub id: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UiField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// `ui_action` response shape (§6): the wizard's single render contract.
#[derive(Debug, Clone, Serialize)]
pub struct UiAction {
    pub title: String,
    pub actions: Vec<UiActionButton>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<UiField>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub execution_mode: String,
    pub model_calls: u32,
    pub max_model_calls: u32,
    pub stage_debug: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnResponse {
    pub success: bool,
    pub session_id: Uuid,
    pub stage: Stage,
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ui_action: Option<UiAction>,
    pub cv_data: CvData,
    pub metadata: Metadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_base64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub run_summary: RunSummary,
}

/// `update_cv_field` accepts several overlapping request shapes (§9 Design
/// Notes). Applied in a fixed order: Confirm, Batch, Field, Patch.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpdateFieldParams {
    #[serde(default)]
    pub field_path: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub edits: Vec<FieldEdit>,
    #[serde(default)]
    pub cv_patch: Option<serde_json::Map<String, Value>>,
    #[serde(default)]
    pub confirm: Option<ConfirmFlagsInput>,
    #[serde(default)]
    pub client_context: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldEdit {
    pub field_path: String,
    pub value: Value,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConfirmFlagsInput {
    #[serde(default)]
    pub contact_confirmed: Option<bool>,
    #[serde(default)]
    pub education_confirmed: Option<bool>,
}
