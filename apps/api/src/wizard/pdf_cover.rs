//! PDF + cover-letter family (§4.5.2). Grounded on
//! `action_dispatch_cover_pdf.py`: `REQUEST_GENERATE_PDF` is idempotent —
//! an unchanged CV/language pair reuses the cached `pdf_refs["cv"]` blob
//! rather than re-rendering (§8 property 7) — and cover-letter generation
//! is gated to English/German targets with the feature flag on.

use sha2::{Digest, Sha256};

use crate::blob::{BlobStore, CONTAINER_PDFS};
use crate::guards::compute_readiness;
use crate::llm::{LlmGateway, SchemaCallParams, TraceCtx};
use crate::models::{CvData, Metadata, PdfRef, WizardStage};
use crate::pdf::{download_name, DocumentKind, PdfRenderer};

fn cv_input_sig(cv: &CvData, target_language: &str) -> String {
    let mut hasher = Sha256::new();
    if let Ok(bytes) = serde_json::to_vec(cv) {
        hasher.update(&bytes);
    }
    hasher.update(target_language.as_bytes());
    hex::encode(hasher.finalize())
}

const COVER_LETTER_LANGUAGES: &[&str] = &["en", "de"];

/// Generates (or reuses) the CV PDF. Returns the blob pointer's bytes when
/// freshly rendered so the caller can echo them back to the client inline;
/// when the cache is reused the caller re-reads the blob instead. On
/// success the stage advances to `cover_letter_review` when cover letters
/// are available for this session (§4.5.2: feature enabled, LLM available,
/// target language in `{en, de}`), else to `review_final` — never to
/// `Done` directly, which is reserved for the terminal state reached only
/// once the user finishes (or skips) the cover-letter step.
pub async fn request_generate_pdf(
    pdf_renderer: &dyn PdfRenderer,
    blobs: &dyn BlobStore,
    cv: &CvData,
    meta: &mut Metadata,
    always_regenerate: bool,
    enable_cover_letter: bool,
    llm_available: bool,
) -> Result<Vec<u8>, String> {
    let readiness = compute_readiness(cv, meta);
    if !readiness.can_generate {
        return Err(format!("not ready to generate: {}", readiness.reasons.join(", ")));
    }

    let target_language = meta.target_language.clone().unwrap_or_else(|| "en".to_string());
    let sig = cv_input_sig(cv, &target_language);
    let next_stage = if cover_letter_eligible(&target_language, enable_cover_letter) && llm_available {
        WizardStage::CoverLetterReview
    } else {
        WizardStage::ReviewFinal
    };

    if !always_regenerate {
        if let (Some(existing_sig), Some(existing_ref)) = (&meta.pdf_input_sig, meta.pdf_refs.get("cv")) {
            if existing_sig == &sig {
                if let Ok(Some(bytes)) = blobs.get(&existing_ref.container, &existing_ref.blob_name).await {
                    meta.pdf_generated = true;
                    meta.pdf_failed = false;
                    meta.wizard_stage = next_stage;
                    return Ok(bytes.to_vec());
                }
            }
        }
    }

    let bytes = match pdf_renderer.render_cv(cv, &target_language).await {
        Ok(bytes) => bytes,
        Err(e) => {
            meta.pdf_failed = true;
            return Err(e.to_string());
        }
    };

    let name = download_name(&cv.full_name, &target_language, DocumentKind::Cv, &sig[..8]);
    let pointer = blobs
        .put_named(CONTAINER_PDFS, &name, &bytes)
        .await
        .map_err(|e| e.to_string())?;

    meta.pdf_refs.insert(
        "cv".to_string(),
        PdfRef {
            kind: "cv".to_string(),
            container: pointer.container,
            blob_name: pointer.blob_name,
            download_name: name,
            created_at: chrono::Utc::now(),
            sha256: pointer.sha256,
        },
    );
    meta.pdf_input_sig = Some(sig);
    meta.pdf_generated = true;
    meta.pdf_failed = false;
    meta.wizard_stage = next_stage;
    Ok(bytes)
}

#[derive(Debug, Clone, serde::Deserialize)]
struct CoverLetterResponse {
    paragraphs: Vec<String>,
}

pub fn cover_letter_eligible(target_language: &str, enable_cover_letter: bool) -> bool {
    enable_cover_letter && COVER_LETTER_LANGUAGES.contains(&target_language)
}

/// `COVER_LETTER_PREVIEW` / `COVER_LETTER_GENERATE`: drafts (or redrafts) a
/// cover letter body, storing it in `cover_letter_block` and moving to the
/// review substage.
pub async fn generate_cover_letter(
    llm: &dyn LlmGateway,
    session_id: &str,
    trace_id: &str,
    cv: &CvData,
    meta: &mut Metadata,
    enable_cover_letter: bool,
) -> Result<(), String> {
    let target_language = meta.target_language.clone().unwrap_or_else(|| "en".to_string());
    if !cover_letter_eligible(&target_language, enable_cover_letter) {
        return Err("cover letters are only available in English or German".to_string());
    }

    let job_text = meta
        .job_reference
        .as_ref()
        .map(|j| format!("{} at {}", j.title, j.company))
        .unwrap_or_default();
    let user_text = format!(
        "CANDIDATE_PROFILE:\n{}\n\nJOB_REFERENCE:\n{job_text}\n\nLANGUAGE: {target_language}",
        cv.profile
    );

    let params = SchemaCallParams {
        stage: "cover_letter".to_string(),
        system_prompt: crate::llm::prompts::COVER_LETTER_SYSTEM.to_string(),
        user_text,
        trace: TraceCtx {
            session_id: session_id.to_string(),
            trace_id: trace_id.to_string(),
        },
        max_output_tokens: 1024,
        is_bulk_translation: false,
        max_attempts: None,
    };

    let value = llm.call_schema_json(params).await.map_err(|e| e.to_string())?;
    let parsed: CoverLetterResponse = serde_json::from_value(value).map_err(|e| e.to_string())?;
    meta.cover_letter_block = Some(serde_json::to_value(&parsed).map_err(|e| e.to_string())?);
    meta.wizard_stage = WizardStage::CoverLetterReview;
    Ok(())
}

pub fn cover_letter_back(meta: &mut Metadata) {
    meta.wizard_stage = WizardStage::ReviewFinal;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::fake::InMemoryBlobStore;
    use crate::pdf::DefaultPdfRenderer;
    use crate::models::{ConfirmedFlags, EducationEntry, Role};

    fn ready_cv() -> CvData {
        CvData {
            full_name: "Jane Doe".to_string(),
            email: "jane@example.com".to_string(),
            phone: "+1 555 0100".to_string(),
            education: vec![EducationEntry::default()],
            work_experience: vec![Role { title: "Engineer".to_string(), ..Default::default() }],
            ..Default::default()
        }
    }

    fn ready_meta() -> Metadata {
        let mut meta = Metadata::default();
        meta.target_language = Some("en".to_string());
        meta.confirmed_flags = ConfirmedFlags { contact_confirmed: true, education_confirmed: true, confirmed_at: None };
        meta
    }

    #[tokio::test]
    async fn generate_is_refused_when_not_ready() {
        let renderer = DefaultPdfRenderer;
        let blobs = InMemoryBlobStore::default();
        let cv = CvData::default();
        let mut meta = Metadata::default();
        let result = request_generate_pdf(&renderer, &blobs, &cv, &mut meta, false, true, true).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn repeat_generate_reuses_cached_artifact_byte_identical() {
        let renderer = DefaultPdfRenderer;
        let blobs = InMemoryBlobStore::default();
        let cv = ready_cv();
        let mut meta = ready_meta();

        let first = request_generate_pdf(&renderer, &blobs, &cv, &mut meta, false, true, true).await.unwrap();
        let second = request_generate_pdf(&renderer, &blobs, &cv, &mut meta, false, true, true).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(meta.pdf_refs.len(), 1);
    }

    #[tokio::test]
    async fn generate_routes_to_cover_letter_review_when_eligible() {
        let renderer = DefaultPdfRenderer;
        let blobs = InMemoryBlobStore::default();
        let cv = ready_cv();
        let mut meta = ready_meta();

        request_generate_pdf(&renderer, &blobs, &cv, &mut meta, false, true, true).await.unwrap();

        assert_eq!(meta.wizard_stage, WizardStage::CoverLetterReview);
    }

    #[tokio::test]
    async fn generate_routes_to_review_final_when_cover_letter_disabled() {
        let renderer = DefaultPdfRenderer;
        let blobs = InMemoryBlobStore::default();
        let cv = ready_cv();
        let mut meta = ready_meta();

        request_generate_pdf(&renderer, &blobs, &cv, &mut meta, false, false, true).await.unwrap();

        assert_eq!(meta.wizard_stage, WizardStage::ReviewFinal);
    }

    #[tokio::test]
    async fn generate_routes_to_review_final_when_llm_unavailable() {
        let renderer = DefaultPdfRenderer;
        let blobs = InMemoryBlobStore::default();
        let cv = ready_cv();
        let mut meta = ready_meta();

        request_generate_pdf(&renderer, &blobs, &cv, &mut meta, false, true, false).await.unwrap();

        assert_eq!(meta.wizard_stage, WizardStage::ReviewFinal);
    }

    #[tokio::test]
    async fn generate_routes_to_review_final_for_ineligible_language() {
        let renderer = DefaultPdfRenderer;
        let blobs = InMemoryBlobStore::default();
        let cv = ready_cv();
        let mut meta = ready_meta();
        meta.target_language = Some("pl".to_string());

        request_generate_pdf(&renderer, &blobs, &cv, &mut meta, false, true, true).await.unwrap();

        assert_eq!(meta.wizard_stage, WizardStage::ReviewFinal);
    }

    #[test]
    fn cover_letter_eligible_only_for_en_de() {
        assert!(cover_letter_eligible("en", true));
        assert!(cover_letter_eligible("de", true));
        assert!(!cover_letter_eligible("pl", true));
        assert!(!cover_letter_eligible("en", false));
    }
}
