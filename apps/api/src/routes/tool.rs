//! Tool Dispatcher (C6): the single `POST /tool` entry point routing
//! `{tool_name, session_id?, params}` onto the twelve operations named in
//! §4.6. Grounded on `original_source/src/orchestrator/tools/tool_schemas.py`'s
//! declared-parameter-shape-then-route pattern, adapted to Axum's
//! `Result<impl IntoResponse, AppError>` handler convention the teacher's
//! `context::handlers`/`generation::handlers` modules already use.
//!
//! Most tools return JSON; three (`generate_cv_from_session`,
//! `generate_cover_letter_from_session`, `get_pdf_by_ref`) return raw
//! `application/pdf` bytes with a `Content-Disposition` header instead.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::blob::{BlobStore, CONTAINER_PDFS};
use crate::context_pack::{build_context_pack, Phase};
use crate::errors::AppError;
use crate::guards::{build_grounding_corpus, bullet_length_violations, compute_readiness, no_invention_violations};
use crate::models::{CvData, ProcessTurnParams, Session, UpdateFieldParams};
use crate::pdf::{download_name, DocumentKind, PdfRenderer};
use crate::state::AppState;
use crate::store::{SessionStore, StoreError};
use crate::wizard::{coarse_stage, pdf_cover};

#[derive(Debug, Deserialize)]
pub struct ToolRequest {
    pub tool_name: String,
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(default)]
    pub params: Value,
}

fn to_app_error(e: StoreError) -> AppError {
    match e {
        StoreError::NotFound => AppError::NotFound("session not found".to_string()),
        StoreError::Conflict { expected, found } => {
            AppError::Conflict(format!("expected version {expected}, found {found}"))
        }
        StoreError::Database(e) => AppError::Database(e),
        StoreError::Other(e) => AppError::Internal(e),
    }
}

/// A tool either answers with JSON or hands back a rendered document.
enum ToolReply {
    Json(Value),
    Pdf { bytes: Vec<u8>, filename: String },
}

impl IntoResponse for ToolReply {
    fn into_response(self) -> Response {
        match self {
            ToolReply::Json(value) => Json(value).into_response(),
            ToolReply::Pdf { bytes, filename } => {
                let disposition = format!("attachment; filename=\"{filename}\"");
                (
                    StatusCode::OK,
                    [(header::CONTENT_TYPE, "application/pdf".to_string()), (header::CONTENT_DISPOSITION, disposition)],
                    bytes,
                )
                    .into_response()
            }
        }
    }
}

fn require_session_id(req: &ToolRequest) -> Result<Uuid, AppError> {
    req.session_id
        .or_else(|| req.params.get("session_id").and_then(Value::as_str).and_then(|s| s.parse().ok()))
        .ok_or_else(|| AppError::Validation("session_id is required for this tool".to_string()))
}

fn params_as<T: for<'de> Deserialize<'de> + Default>(params: &Value) -> Result<T, AppError> {
    if params.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(params.clone()).map_err(|e| AppError::Validation(format!("invalid params: {e}")))
}

async fn load_session(store: &dyn SessionStore, id: Uuid) -> Result<Session, AppError> {
    store
        .get(id)
        .await
        .map_err(to_app_error)?
        .ok_or_else(|| AppError::NotFound(format!("session {id} not found")))
}

pub async fn tool_handler(State(state): State<AppState>, Json(req): Json<ToolRequest>) -> Result<ToolReply, AppError> {
    let orch = &state.orchestrator;

    match req.tool_name.as_str() {
        "extract_and_store_cv" => {
            #[derive(Debug, Default, Deserialize)]
            struct Params {
                docx_base64: String,
            }
            let params: Params = params_as(&req.params)?;
            let session = orch.extract_and_store_cv(&params.docx_base64).await?;
            Ok(ToolReply::Json(session_to_json(&session)))
        }

        "process_cv_orchestrated" => {
            let mut params: ProcessTurnParams = params_as(&req.params)?;
            if params.session_id.is_none() {
                params.session_id = req.session_id;
            }
            let response = orch.process_turn(params).await?;
            Ok(ToolReply::Json(serde_json::to_value(response).map_err(|e| AppError::Internal(e.into()))?))
        }

        "get_cv_session" => {
            let id = require_session_id(&req)?;
            let session = load_session(orch.store.as_ref(), id).await?;
            Ok(ToolReply::Json(session_to_json(&session)))
        }

        "update_cv_field" => {
            let id = require_session_id(&req)?;
            let params: UpdateFieldParams = params_as(&req.params)?;
            let session = apply_update_cv_field(orch.store.as_ref(), id, params).await?;
            Ok(ToolReply::Json(session_to_json(&session)))
        }

        "validate_cv" => {
            let id = require_session_id(&req)?;
            let session = load_session(orch.store.as_ref(), id).await?;
            let readiness = compute_readiness(&session.cv_data, &session.metadata);
            let bullet_violations = bullet_length_violations(&session.cv_data.work_experience, session.metadata.target_language.as_deref());
            let corpus = build_grounding_corpus(
                &session.cv_data.work_experience,
                session.metadata.work_tailoring_notes.as_deref(),
                session.metadata.work_tailoring_feedback.as_deref(),
            );
            let invention_violations = no_invention_violations(&session.cv_data.work_experience, &corpus);
            Ok(ToolReply::Json(json!({
                "session_id": session.id,
                "readiness": readiness,
                "bullet_violations": bullet_violations,
                "invention_violations": invention_violations,
            })))
        }

        "cv_session_search" => {
            #[derive(Debug, Default, Deserialize)]
            struct Params {
                query: String,
                limit: Option<usize>,
            }
            let params: Params = params_as(&req.params)?;
            let hits = orch.store.search(&params.query, params.limit.unwrap_or(20)).await.map_err(to_app_error)?;
            Ok(ToolReply::Json(json!({ "hits": hits })))
        }

        "generate_context_pack_v2" => {
            let id = require_session_id(&req)?;
            #[derive(Debug, Default, Deserialize)]
            struct Params {
                phase: String,
                job_posting_text: Option<String>,
                max_pack_chars: Option<usize>,
            }
            let params: Params = params_as(&req.params)?;
            let phase = match params.phase.as_str() {
                "preparation" => Phase::Preparation,
                "confirmation" => Phase::Confirmation,
                "execution" => Phase::Execution,
                other => return Err(AppError::Validation(format!("unknown phase '{other}'"))),
            };

            let mut session = load_session(orch.store.as_ref(), id).await?;
            let job_text = params.job_posting_text.as_deref().or(session.metadata.job_posting_text.as_deref()).map(str::to_string);
            let pack = build_context_pack(
                phase,
                &session.cv_data,
                &mut session.metadata,
                job_text.as_deref(),
                params.max_pack_chars,
                state.config.delta_mode,
            );
            let updated = orch
                .store
                .update(session.id, session.version, session.cv_data, session.metadata)
                .await
                .map_err(to_app_error)?;
            let mut body = serde_json::to_value(&pack).map_err(|e| AppError::Internal(e.into()))?;
            body["session_id"] = json!(updated.id);
            body["version"] = json!(updated.version);
            Ok(ToolReply::Json(body))
        }

        "preview_html" => {
            let id = require_session_id(&req)?;
            let session = load_session(orch.store.as_ref(), id).await?;
            Ok(ToolReply::Json(json!({ "html": render_preview_html(&session.cv_data) })))
        }

        "generate_cv_from_session" => {
            let id = require_session_id(&req)?;
            #[derive(Debug, Default, Deserialize)]
            struct Params {
                force_regen: Option<bool>,
            }
            let params: Params = params_as(&req.params)?;
            let mut session = load_session(orch.store.as_ref(), id).await?;
            let always_regenerate = state.config.pdf_always_regenerate || params.force_regen.unwrap_or(false);

            let bytes = pdf_cover::request_generate_pdf(
                orch.pdf.as_ref(),
                orch.blobs.as_ref(),
                &session.cv_data,
                &mut session.metadata,
                always_regenerate,
                state.config.enable_cover_letter,
                state.config.enable_ai,
            )
            .await
            .map_err(AppError::UnprocessableEntity)?;

            let filename = session
                .metadata
                .pdf_refs
                .get("cv")
                .map(|r| r.download_name.clone())
                .unwrap_or_else(|| "cv.pdf".to_string());

            orch.store
                .update(session.id, session.version, session.cv_data, session.metadata)
                .await
                .map_err(to_app_error)?;

            Ok(ToolReply::Pdf { bytes, filename })
        }

        "generate_cover_letter_from_session" => {
            let id = require_session_id(&req)?;
            let mut session = load_session(orch.store.as_ref(), id).await?;
            let trace_id = Uuid::new_v4().to_string();

            if session.metadata.cover_letter_block.is_none() {
                pdf_cover::generate_cover_letter(
                    orch.llm.as_ref(),
                    &session.id.to_string(),
                    &trace_id,
                    &session.cv_data,
                    &mut session.metadata,
                    state.config.enable_cover_letter,
                )
                .await
                .map_err(AppError::Llm)?;
            }

            let paragraphs: Vec<String> = session
                .metadata
                .cover_letter_block
                .as_ref()
                .and_then(|b| b.get("paragraphs").cloned())
                .and_then(|p| serde_json::from_value(p).ok())
                .unwrap_or_default();
            let target_language = session.metadata.target_language.clone().unwrap_or_else(|| "en".to_string());

            let bytes = orch
                .pdf
                .render_cover_letter(&session.cv_data.full_name, &paragraphs, &target_language)
                .await
                .map_err(AppError::Internal)?;

            let sig = crate::pdf::sha256_hex(&bytes);
            let name = download_name(&session.cv_data.full_name, &target_language, DocumentKind::CoverLetter, &sig[..8]);
            let pointer = orch
                .blobs
                .put_named(CONTAINER_PDFS, &name, &bytes)
                .await
                .map_err(AppError::Internal)?;

            session.metadata.pdf_refs.insert(
                "cover_letter".to_string(),
                crate::models::PdfRef {
                    kind: "cover_letter".to_string(),
                    container: pointer.container,
                    blob_name: pointer.blob_name,
                    download_name: name.clone(),
                    created_at: chrono::Utc::now(),
                    sha256: pointer.sha256,
                },
            );

            orch.store
                .update(session.id, session.version, session.cv_data, session.metadata)
                .await
                .map_err(to_app_error)?;

            Ok(ToolReply::Pdf { bytes, filename: name })
        }

        "get_pdf_by_ref" => {
            let id = require_session_id(&req)?;
            #[derive(Debug, Default, Deserialize)]
            struct Params {
                pdf_ref: String,
            }
            let params: Params = params_as(&req.params)?;
            let session = load_session(orch.store.as_ref(), id).await?;
            let pdf_ref = session
                .metadata
                .pdf_refs
                .get(&params.pdf_ref)
                .ok_or_else(|| AppError::NotFound(format!("no pdf ref '{}' on this session", params.pdf_ref)))?
                .clone();
            let bytes = orch
                .blobs
                .get(&pdf_ref.container, &pdf_ref.blob_name)
                .await
                .map_err(AppError::Internal)?
                .ok_or_else(|| AppError::NotFound("pdf blob no longer exists".to_string()))?;
            Ok(ToolReply::Pdf { bytes: bytes.to_vec(), filename: pdf_ref.download_name })
        }

        "export_session_debug" => {
            if !state.config.enable_debug_export {
                return Err(AppError::Forbidden("debug export is disabled".to_string()));
            }
            let id = require_session_id(&req)?;
            let session = load_session(orch.store.as_ref(), id).await?;
            Ok(ToolReply::Json(json!({
                "session": session_to_json(&session),
                "event_log": session.metadata.event_log,
                "stage_history": session.metadata.stage_history,
            })))
        }

        "cleanup_expired_sessions" => {
            let deleted = orch.store.cleanup_expired().await.map_err(to_app_error)?;
            Ok(ToolReply::Json(json!({ "deleted": deleted })))
        }

        other => Err(AppError::NotFound(format!("unknown tool: {other}"))),
    }
}

fn session_to_json(session: &Session) -> Value {
    json!({
        "id": session.id,
        "version": session.version,
        "created_at": session.created_at,
        "updated_at": session.updated_at,
        "expires_at": session.expires_at,
        "stage": coarse_stage(session.metadata.wizard_stage),
        "cv_data": session.cv_data,
        "metadata": session.metadata,
    })
}

/// Applies `update_cv_field`'s tagged `Update` variants in the fixed order
/// the Design Notes require: Confirm, Batch, Field, Patch. Every variant
/// replaces whatever it touches wholesale, never deep-merges (§9).
async fn apply_update_cv_field(store: &dyn SessionStore, id: Uuid, params: UpdateFieldParams) -> Result<Session, AppError> {
    let session = load_session(store, id).await?;
    let Session { version, cv_data, mut metadata, .. } = session;

    if let Some(confirm) = &params.confirm {
        if let Some(contact_confirmed) = confirm.contact_confirmed {
            metadata.confirmed_flags.contact_confirmed = contact_confirmed;
        }
        if let Some(education_confirmed) = confirm.education_confirmed {
            metadata.confirmed_flags.education_confirmed = education_confirmed;
        }
        if (metadata.confirmed_flags.contact_confirmed || metadata.confirmed_flags.education_confirmed)
            && metadata.confirmed_flags.confirmed_at.is_none()
        {
            metadata.confirmed_flags.confirmed_at = Some(chrono::Utc::now());
        }
    }

    let mut cv_value = serde_json::to_value(&cv_data).map_err(|e| AppError::Internal(e.into()))?;

    for edit in &params.edits {
        crate::fieldpath::apply_field_path(&mut cv_value, &edit.field_path, edit.value.clone())
            .map_err(AppError::Validation)?;
    }

    if let Some(path) = &params.field_path {
        crate::fieldpath::apply_field_path(&mut cv_value, path, params.value.clone().unwrap_or(Value::Null))
            .map_err(AppError::Validation)?;
    }

    if let Some(patch) = &params.cv_patch {
        for (field, value) in patch {
            crate::fieldpath::apply_field_path(&mut cv_value, field, value.clone()).map_err(AppError::Validation)?;
        }
    }

    let cv_data: CvData = serde_json::from_value(cv_value).map_err(|e| AppError::Validation(format!("cv_data no longer valid after edit: {e}")))?;

    store.update(id, version, cv_data, metadata).await.map_err(to_app_error)
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Minimal, non-templated HTML preview (§1 Non-goals excludes real
/// template/CSS layout; this exists only so a caller can eyeball a session
/// without downloading a PDF). Every field is user-supplied, so everything
/// written into the markup goes through `escape_html` first.
fn render_preview_html(cv: &CvData) -> String {
    let mut roles = String::new();
    for role in &cv.work_experience {
        roles.push_str(&format!(
            "<li>{} — {} ({})</li>",
            escape_html(&role.title),
            escape_html(&role.employer),
            escape_html(&role.date_range)
        ));
    }
    format!(
        "<html><body><h1>{}</h1><p>{} | {}</p><p>{}</p><ul>{}</ul></body></html>",
        escape_html(&cv.full_name),
        escape_html(&cv.email),
        escape_html(&cv.phone),
        escape_html(&cv.profile),
        roles
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldEdit;
    use crate::store::fake::InMemorySessionStore;

    #[test]
    fn preview_html_escapes_user_content() {
        let mut cv = CvData::default();
        cv.full_name = "<script>alert(1)</script>".to_string();
        cv.email = "a@b.com".to_string();
        let html = render_preview_html(&cv);
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    fn edit_params(value: &str) -> UpdateFieldParams {
        UpdateFieldParams {
            field_path: None,
            value: None,
            edits: vec![FieldEdit { field_path: "full_name".to_string(), value: json!(value) }],
            cv_patch: None,
            confirm: None,
            client_context: None,
        }
    }

    /// (S5) Two concurrent `update_cv_field` calls against the same base
    /// version: one wins with `version = v+1`, the other gets `Conflict`
    /// rather than silently clobbering or merging. The loser reloads and
    /// re-applies, and the final value is whichever write lands last.
    #[tokio::test]
    async fn concurrent_field_updates_conflict_then_reapply_after_reload() {
        let store = InMemorySessionStore::default();
        let session = store.create(CvData::default(), crate::models::Metadata::default()).await.unwrap();
        let id = session.id;

        let a = apply_update_cv_field(&store, id, edit_params("A")).await.unwrap();
        assert_eq!(a.version, session.version + 1);
        assert_eq!(a.cv_data.full_name, "A");

        let b_result = apply_update_cv_field(&store, id, edit_params("B")).await;
        assert!(matches!(b_result, Err(AppError::Conflict(_))), "stale writer must be refused, not merged");

        let b = apply_update_cv_field(&store, id, edit_params("B")).await.unwrap();
        assert_eq!(b.version, a.version + 1);
        assert_eq!(b.cv_data.full_name, "B", "re-applying after reload lands the value last written");
    }
}
