//! Job posting intake (§4.4, §4.5). Grounded on `session_tools.py`'s job
//! text/URL handling: the job-posting gate screens pasted/fetched text
//! before it ever reaches the LLM, a fetched URL is bounded by an 8s
//! timeout, and invalid text is truncated into a draft the user can see and
//! fix rather than silently dropped.

use std::time::Duration;

use crate::guards::{job_posting_gate, JobInputStatus};
use crate::llm::{LlmGateway, SchemaCallParams, TraceCtx};
use crate::models::{JobReference, Metadata, WizardStage};

const URL_FETCH_TIMEOUT: Duration = Duration::from_secs(8);
const INVALID_DRAFT_MAX_CHARS: usize = 2000;

pub fn start_paste(meta: &mut Metadata) {
    meta.wizard_stage = WizardStage::JobPostingPaste;
}

pub fn cancel(meta: &mut Metadata) {
    meta.wizard_stage = WizardStage::JobPosting;
}

pub fn skip(meta: &mut Metadata) {
    meta.job_posting_text = None;
    meta.job_posting_url = None;
    meta.wizard_stage = WizardStage::WorkExperience;
}

/// Applies the job-posting gate to `text`, per §4.4. On failure, truncates
/// into `job_posting_invalid_draft` rather than rejecting outright so the
/// user can revise it without retyping from scratch.
pub fn apply_gate(meta: &mut Metadata, text: &str) -> bool {
    let gate = job_posting_gate(text);
    match gate.status {
        JobInputStatus::Valid => {
            meta.job_posting_text = Some(text.to_string());
            meta.job_input_status = Some("valid".to_string());
            meta.job_input_invalid_reason = None;
            meta.job_posting_invalid_draft = None;
            true
        }
        JobInputStatus::Invalid => {
            meta.job_input_status = Some("invalid".to_string());
            meta.job_input_invalid_reason = gate.reason;
            let truncated: String = text.chars().take(INVALID_DRAFT_MAX_CHARS).collect();
            meta.job_posting_invalid_draft = Some(truncated);
            false
        }
    }
}

/// Fetches `url` with an 8s timeout and applies the gate to the resulting
/// body. Network/timeout failures set `job_fetch_status` rather than
/// failing the turn outright — the wizard degrades to manual paste.
pub async fn fetch_and_gate(client: &reqwest::Client, meta: &mut Metadata, url: &str) {
    meta.job_posting_url = Some(url.to_string());
    let fetch = tokio::time::timeout(URL_FETCH_TIMEOUT, client.get(url).send()).await;
    match fetch {
        Ok(Ok(resp)) => match resp.text().await {
            Ok(body) => {
                meta.job_fetch_status = Some("ok".to_string());
                apply_gate(meta, &body);
            }
            Err(_) => meta.job_fetch_status = Some("read_error".to_string()),
        },
        Ok(Err(_)) => meta.job_fetch_status = Some("fetch_error".to_string()),
        Err(_) => meta.job_fetch_status = Some("timeout".to_string()),
    }
}

/// Extracts a structured `JobReference` from gated job text via the LLM
/// gateway, then advances to work experience.
pub async fn analyze(
    llm: &dyn LlmGateway,
    session_id: &str,
    trace_id: &str,
    meta: &mut Metadata,
) -> Result<(), String> {
    let text = meta.job_posting_text.clone().ok_or_else(|| "no job posting text on file".to_string())?;

    let params = SchemaCallParams {
        stage: "job_reference".to_string(),
        system_prompt: crate::llm::prompts::JOB_REFERENCE_SCHEMA_SYSTEM.to_string(),
        user_text: text,
        trace: TraceCtx {
            session_id: session_id.to_string(),
            trace_id: trace_id.to_string(),
        },
        max_output_tokens: 1024,
        is_bulk_translation: false,
        max_attempts: None,
    };

    let value = llm.call_schema_json(params).await.map_err(|e| e.to_string())?;
    let job_ref: JobReference = serde_json::from_value(value).map_err(|e| e.to_string())?;
    meta.job_reference = Some(job_ref);
    meta.wizard_stage = WizardStage::WorkExperience;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_text_is_truncated_into_draft_not_dropped() {
        let mut meta = Metadata::default();
        let ok = apply_gate(&mut meta, "short");
        assert!(!ok);
        assert_eq!(meta.job_posting_invalid_draft.as_deref(), Some("short"));
        assert_eq!(meta.job_input_invalid_reason.as_deref(), Some("too_short"));
    }

    #[test]
    fn valid_text_populates_job_posting_text() {
        let mut meta = Metadata::default();
        let posting = "Senior Backend Engineer at Example Corp. We are looking for an experienced engineer to join our platform team working on distributed systems and cloud infrastructure with five years of Rust experience required.";
        let ok = apply_gate(&mut meta, posting);
        assert!(ok);
        assert_eq!(meta.job_posting_text.as_deref(), Some(posting));
    }
}
