//! Wizard Orchestrator (C5) — the session-scoped stage machine that drives
//! every wizard turn: load session, dispatch the UI action (or free text),
//! resolve the coarse FSM, persist, respond. Grounded on `entrypoints.py`'s
//! `handle_cv_tool_call` dispatcher loop.

pub mod contact;
pub mod education;
pub mod job_posting;
pub mod navigation;
pub mod pdf_cover;
pub mod profile_import;
pub mod skills;
pub mod ui;
pub mod work;

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::Value;
use uuid::Uuid;

use crate::blob::BlobStore;
use crate::config::Config;
use crate::docx::{DocumentExtractor, PrefillSummary};
use crate::errors::AppError;
use crate::fsm;
use crate::guards::compute_readiness;
use crate::llm::LlmGateway;
use crate::models::{CvData, Metadata, ProcessTurnParams, RunSummary, Session, Stage, TurnResponse, WizardStage};
use crate::pdf::PdfRenderer;
use crate::stable_profile::StableProfileStore;
use crate::store::{SessionStore, StoreError};

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

/// Maps a fine-grained [`WizardStage`] onto the coarse macro [`Stage`] the
/// FSM resolver and the external response contract operate on (§4.2).
pub fn coarse_stage(ws: WizardStage) -> Stage {
    use WizardStage::*;
    match ws {
        LanguageSelection | ImportGatePending => Stage::Ingest,
        Contact | ContactEdit | Education | EducationEdit | JobPosting | JobPostingPaste | WorkExperience
        | WorkNotesEdit | ItAiSkills | SkillsNotesEdit => Stage::Prepare,
        WorkTailorReview | WorkTailorFeedback | SkillsTailorReview => Stage::Review,
        ReviewFinal | CoverLetterReview => Stage::Confirm,
        Done => Stage::Done,
    }
}

fn parse_wizard_stage(raw: &str) -> Option<WizardStage> {
    serde_json::from_value(Value::String(raw.to_string())).ok()
}

fn assistant_text(stage: WizardStage, error: Option<&String>) -> String {
    if let Some(err) = error {
        return format!("I couldn't do that: {err}");
    }
    match stage {
        WizardStage::LanguageSelection => "Which language would you like your CV in?".to_string(),
        WizardStage::ImportGatePending => "I found some details in your uploaded document. Use them?".to_string(),
        WizardStage::Contact => "Let's confirm your contact details.".to_string(),
        WizardStage::ContactEdit => "Go ahead and edit your contact details.".to_string(),
        WizardStage::Education => "Let's confirm your education.".to_string(),
        WizardStage::EducationEdit => "Go ahead and edit your education.".to_string(),
        WizardStage::JobPosting => "Do you have a job posting you'd like to tailor this CV for?".to_string(),
        WizardStage::JobPostingPaste => "Paste the job posting text below.".to_string(),
        WizardStage::WorkExperience => "Let's tailor your work experience.".to_string(),
        WizardStage::WorkNotesEdit => "Add any notes for the tailoring pass.".to_string(),
        WizardStage::WorkTailorReview => "Here's the tailored work experience. Does it look right?".to_string(),
        WizardStage::WorkTailorFeedback => "What should change about the tailored bullets?".to_string(),
        WizardStage::ItAiSkills => "Let's tailor your skills.".to_string(),
        WizardStage::SkillsNotesEdit => "Add any notes for the skills tailoring pass.".to_string(),
        WizardStage::SkillsTailorReview => "Here are the tailored skills. Does it look right?".to_string(),
        WizardStage::ReviewFinal => "Everything looks ready. Generate your CV whenever you're set.".to_string(),
        WizardStage::CoverLetterReview => "Here's your cover letter draft.".to_string(),
        WizardStage::Done => "Your CV is ready to download.".to_string(),
    }
}

pub struct Orchestrator {
    pub store: Arc<dyn SessionStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub llm: Arc<dyn LlmGateway>,
    pub pdf: Arc<dyn PdfRenderer>,
    pub docx: Arc<dyn DocumentExtractor>,
    pub stable_profiles: Arc<dyn StableProfileStore>,
    pub http: reqwest::Client,
    pub config: Config,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn SessionStore>,
        blobs: Arc<dyn BlobStore>,
        llm: Arc<dyn LlmGateway>,
        pdf: Arc<dyn PdfRenderer>,
        docx: Arc<dyn DocumentExtractor>,
        stable_profiles: Arc<dyn StableProfileStore>,
        config: Config,
    ) -> Self {
        Self {
            store,
            blobs,
            llm,
            pdf,
            docx,
            stable_profiles,
            http: reqwest::Client::new(),
            config,
        }
    }

    /// `tool_extract_and_store_cv`: decodes the DOCX, best-effort-extracts a
    /// photo, builds the all-empty canonical `cv_data` skeleton with
    /// `docx_prefill_unconfirmed`/`prefill_summary` staged in metadata, and
    /// creates a fresh session (§3, session_tools.py).
    pub async fn extract_and_store_cv(&self, docx_base64: &str) -> Result<Session, AppError> {
        let bytes = STANDARD
            .decode(docx_base64)
            .map_err(|e| AppError::Validation(format!("invalid base64 document: {e}")))?;

        let prefill = self
            .docx
            .prefill_from_docx(&bytes)
            .map_err(|e| AppError::Internal(e))?;
        let photo = self.docx.extract_first_photo(&bytes).unwrap_or(None);

        let mut cv = CvData::default();
        let mut meta = Metadata::default();
        meta.wizard_stage = WizardStage::LanguageSelection;

        let summary = PrefillSummary::from_prefill(&prefill);
        meta.prefill_summary = Some(serde_json::to_value(&summary).map_err(|e| AppError::Internal(e.into()))?);
        meta.docx_prefill_unconfirmed =
            Some(serde_json::to_value(&prefill).map_err(|e| AppError::Internal(e.into()))?);

        if let Some(photo_bytes) = photo {
            if let Ok(pointer) = self.blobs.put_content_addressed(crate::blob::CONTAINER_PHOTOS, &photo_bytes).await {
                cv.photo_url = format!("{}/{}", pointer.container, pointer.blob_name);
            }
        }

        self.store.create(cv, meta).await.map_err(to_app_error)
    }

    /// Single per-turn entry point (§6 `process_cv_orchestrated`).
    pub async fn process_turn(&self, params: ProcessTurnParams) -> Result<TurnResponse, AppError> {
        if let Some(docx_base64) = &params.docx_base64 {
            let session = self.extract_and_store_cv(docx_base64).await?;
            let trace_id = Uuid::new_v4().to_string();
            return self.build_response(session, None, &trace_id, None).await;
        }

        let id = params
            .session_id
            .ok_or_else(|| AppError::Validation("session_id is required".to_string()))?;
        let mut session = self
            .store
            .get(id)
            .await
            .map_err(to_app_error)?
            .ok_or_else(|| AppError::NotFound(format!("session {id} not found")))?;

        let trace_id = Uuid::new_v4().to_string();
        let before_stage = session.metadata.wizard_stage;
        let action_id = params.user_action.as_ref().map(|a| a.id.clone());

        let dispatch_result = self
            .dispatch(session.id, &mut session.cv_data, &mut session.metadata, &params, &trace_id)
            .await;

        if params.user_action.is_none() {
            self.apply_free_text_resolution(&mut session.metadata, &params.message);
        }

        if session.metadata.wizard_stage != before_stage {
            session.metadata.push_stage_history(before_stage);
        }
        session.metadata.append_event(
            "turn",
            serde_json::json!({ "action": action_id, "ok": dispatch_result.is_ok() }),
        );

        let updated = self
            .store
            .update(session.id, session.version, session.cv_data.clone(), session.metadata.clone())
            .await
            .map_err(to_app_error)?;

        self.build_response(updated, dispatch_result.err(), &trace_id, action_id.as_deref()).await
    }

    /// Dispatches a single UI action to its owning family handler, in the
    /// order the families are declared (§9). Unknown/no action is a no-op.
    async fn dispatch(
        &self,
        session_id: Uuid,
        cv: &mut CvData,
        meta: &mut Metadata,
        params: &ProcessTurnParams,
        trace_id: &str,
    ) -> Result<(), String> {
        let Some(action) = &params.user_action else {
            return Ok(());
        };
        if !ui::is_known_action(&action.id) {
            return Err(format!("unknown action id: {}", action.id));
        }
        let payload = action.payload.as_ref();
        let session_id_str = session_id.to_string();

        match action.id.as_str() {
            "LANGUAGE_SELECT_EN" => {
                contact::select_language(cv, meta, "en");
                Ok(())
            }
            "LANGUAGE_SELECT_DE" => {
                contact::select_language(cv, meta, "de");
                Ok(())
            }
            "LANGUAGE_SELECT_PL" => {
                contact::select_language(cv, meta, "pl");
                Ok(())
            }
            "CONFIRM_IMPORT_PREFILL_YES" => {
                profile_import::confirm_prefill_yes(cv, meta);
                self.maybe_run_bulk_translation(cv, meta, &session_id_str, trace_id).await;
                self.maybe_apply_fast_path_profile(cv, meta, params.client_context.as_ref()).await;
                Ok(())
            }
            "CONFIRM_IMPORT_PREFILL_NO" => {
                profile_import::confirm_prefill_no(meta);
                Ok(())
            }
            "CONTACT_EDIT" => {
                contact::edit(meta);
                Ok(())
            }
            "CONTACT_SAVE" => {
                contact::save(cv, meta, payload);
                Ok(())
            }
            "CONTACT_CANCEL" => {
                contact::cancel(meta);
                Ok(())
            }
            "CONTACT_CONFIRM" => contact::confirm(cv, meta).map_err(str::to_string),
            "EDUCATION_EDIT_JSON" => {
                education::edit(meta);
                Ok(())
            }
            "EDUCATION_SAVE" => {
                education::save(cv, meta, payload);
                Ok(())
            }
            "EDUCATION_CANCEL" => {
                education::cancel(meta);
                Ok(())
            }
            "EDUCATION_CONFIRM" => {
                education::confirm(cv, meta).map_err(str::to_string)?;
                self.maybe_save_stable_profile(cv, meta, params.client_context.as_ref()).await;
                Ok(())
            }
            "JOB_OFFER_PASTE" => {
                job_posting::start_paste(meta);
                Ok(())
            }
            "JOB_OFFER_CANCEL" => {
                job_posting::cancel(meta);
                Ok(())
            }
            "JOB_OFFER_SKIP" => {
                job_posting::skip(meta);
                Ok(())
            }
            "JOB_OFFER_ANALYZE" => {
                let pasted = payload.and_then(|p| p.get("job_posting_text")).and_then(Value::as_str);
                if let Some(text) = pasted.or(params.job_posting_text.as_deref()) {
                    job_posting::apply_gate(meta, text);
                } else if let Some(url) = params.job_posting_url.as_deref() {
                    job_posting::fetch_and_gate(&self.http, meta, url).await;
                }
                if meta.job_input_status.as_deref() == Some("valid") {
                    job_posting::analyze(self.llm.as_ref(), &session_id_str, trace_id, meta).await
                } else {
                    Err(meta
                        .job_input_invalid_reason
                        .clone()
                        .unwrap_or_else(|| "invalid job posting".to_string()))
                }
            }
            "WORK_ADD_TAILORING_NOTES" => {
                work::add_notes(meta);
                Ok(())
            }
            "WORK_NOTES_SAVE" => {
                let notes = payload.and_then(|p| p.get("notes")).and_then(Value::as_str).unwrap_or_default();
                work::save_notes(meta, notes);
                Ok(())
            }
            "WORK_NOTES_CANCEL" => {
                work::cancel_notes(meta);
                Ok(())
            }
            "WORK_TAILOR_RUN" => work::tailor_run(self.llm.as_ref(), &session_id_str, trace_id, cv, meta).await,
            "WORK_TAILOR_ACCEPT" => work::tailor_accept(self.llm.as_ref(), &session_id_str, trace_id, cv, meta).await,
            "WORK_TAILOR_FEEDBACK" => {
                let feedback = payload.and_then(|p| p.get("feedback")).and_then(Value::as_str).unwrap_or_default();
                work::tailor_feedback(meta, feedback);
                Ok(())
            }
            "WORK_LOCATIONS_EDIT" => {
                meta.wizard_stage = WizardStage::WorkTailorReview;
                Ok(())
            }
            "WORK_LOCATIONS_SAVE" => {
                if let Some(roles) = payload.and_then(|p| p.get("roles")).and_then(Value::as_array) {
                    for (role, patch) in cv.work_experience.iter_mut().zip(roles.iter()) {
                        if let Some(loc) = patch.get("location").and_then(Value::as_str) {
                            role.location = loc.to_string();
                        }
                    }
                }
                meta.wizard_stage = WizardStage::WorkTailorReview;
                Ok(())
            }
            "WORK_SELECT_ROLE" => {
                if let Some(idx) = payload.and_then(|p| p.get("index")).and_then(Value::as_u64) {
                    meta.selected_role_index = Some(idx as usize);
                }
                Ok(())
            }
            "WORK_CONFIRM_STAGE" => {
                work::confirm_stage(meta);
                Ok(())
            }
            "SKILLS_ADD_NOTES" => {
                skills::add_notes(meta);
                Ok(())
            }
            "SKILLS_NOTES_SAVE" => {
                let notes = payload.and_then(|p| p.get("notes")).and_then(Value::as_str).unwrap_or_default();
                skills::save_notes(meta, notes);
                Ok(())
            }
            "SKILLS_NOTES_CANCEL" => {
                skills::cancel_notes(meta);
                Ok(())
            }
            "SKILLS_TAILOR_RUN" => skills::tailor_run(self.llm.as_ref(), &session_id_str, trace_id, cv, meta).await,
            "SKILLS_TAILOR_SKIP" => {
                skills::skip(meta);
                Ok(())
            }
            "SKILLS_TAILOR_ACCEPT" => skills::tailor_accept(cv, meta),
            "REQUEST_GENERATE_PDF" => crate::wizard::pdf_cover::request_generate_pdf(
                self.pdf.as_ref(),
                self.blobs.as_ref(),
                cv,
                meta,
                self.config.pdf_always_regenerate,
                self.config.enable_cover_letter,
                self.config.enable_ai,
            )
            .await
            .map(|_| ()),
            "DOWNLOAD_PDF" => Ok(()),
            "COVER_LETTER_PREVIEW" | "COVER_LETTER_GENERATE" => pdf_cover::generate_cover_letter(
                self.llm.as_ref(),
                &session_id_str,
                trace_id,
                cv,
                meta,
                self.config.enable_cover_letter,
            )
            .await,
            "COVER_LETTER_BACK" => {
                pdf_cover::cover_letter_back(meta);
                Ok(())
            }
            "WIZARD_GOTO_STAGE" => {
                if let Some(target) = payload
                    .and_then(|p| p.get("target"))
                    .and_then(Value::as_str)
                    .and_then(parse_wizard_stage)
                {
                    meta.wizard_stage = navigation::resolve_goto(meta.wizard_stage, target);
                    meta.selected_role_index = None;
                }
                Ok(())
            }
            other => Err(format!("action {other} recognized but not wired to a handler")),
        }
    }

    /// Free-text turns never carry a `user_action`; they only exercise the
    /// coarse FSM's edit-intent override (edit-after-DONE, §8 property 3)
    /// and the review-stage turn counter feeding auto-advance.
    fn apply_free_text_resolution(&self, meta: &mut Metadata, message: &str) {
        let coarse_before = coarse_stage(meta.wizard_stage);
        let flags = fsm::SessionFlags {
            turns_in_review: meta.turns_in_review,
            pending_edits: meta.pending_edits,
            high_confidence: meta.high_confidence,
            ..Default::default()
        };
        let next = fsm::resolve(coarse_before, message, meta.target_language.as_deref(), flags, fsm::ValidationFlags::default());

        if coarse_before == Stage::Done && next == Stage::Review {
            // WorkTailorFeedback is the fine-grained substage whose
            // coarse_stage is Stage::Review; ReviewFinal (Confirm) would
            // silently undo the edit-intent override.
            meta.wizard_stage = WizardStage::WorkTailorFeedback;
        }

        let in_review_family = matches!(
            meta.wizard_stage,
            WizardStage::WorkTailorReview
                | WizardStage::WorkTailorFeedback
                | WizardStage::SkillsTailorReview
                | WizardStage::ReviewFinal
        );
        if in_review_family {
            meta.turns_in_review += 1;
        } else {
            meta.turns_in_review = 0;
        }
    }

    /// Education-confirm stable-profile hook (§4.5, §9 Open Questions):
    /// when `client_context.owner_key` is present, snapshots the now-confirmed
    /// contact+education+work core under that key for a future session's
    /// fast path. Best-effort: a save failure never fails the turn.
    async fn maybe_save_stable_profile(&self, cv: &CvData, meta: &mut Metadata, client_context: Option<&Value>) {
        let Some(owner_key) = client_context.and_then(|c| c.get("owner_key")).and_then(Value::as_str) else {
            return;
        };
        let language = meta.target_language.clone().unwrap_or_else(|| "en".to_string());
        match self.stable_profiles.save(owner_key, &language, cv).await {
            Ok(store_ref) => {
                meta.stable_profile_ref = Some(crate::models::StableProfileRef {
                    store: store_ref,
                    language: Some(language),
                });
            }
            Err(e) => tracing::warn!(error = %e, "failed to save stable profile, continuing without it"),
        }
    }

    /// `CONFIRM_IMPORT_PREFILL_YES` bulk-translation hook (§4.3, §8 S6, §9
    /// Open Questions): runs once per distinct `(target_language,
    /// cv_content)` pair — a repeat confirm with unchanged content and the
    /// same target language is a no-op thanks to
    /// `profile_import::bulk_translation_cache_hit`. Best-effort: a failed
    /// translation never fails the turn, the CV just stays untranslated.
    async fn maybe_run_bulk_translation(&self, cv: &mut CvData, meta: &mut Metadata, session_id: &str, trace_id: &str) {
        if !profile_import::needs_bulk_translation(meta, cv, self.config.enable_ai) {
            return;
        }
        let target = meta.target_language.clone().unwrap_or_else(|| "en".to_string());
        if let Err(e) = profile_import::run_bulk_translation(self.llm.as_ref(), session_id, trace_id, cv, meta, &target).await {
            tracing::warn!(error = %e, "bulk translation failed, continuing with untranslated content");
        }
    }

    /// `CONFIRM_IMPORT_PREFILL_YES` fast-path (§4.5, §9 Open Questions,
    /// resolved in DESIGN.md as apply-then-mark-confirmed): when
    /// `client_context.fast_path_profile` is true and a `stable_profile_ref`
    /// is supplied, the saved stable profile is applied verbatim over the
    /// freshly-merged DOCX prefill and both confirm flags are set, skipping
    /// the contact/education confirm steps entirely.
    async fn maybe_apply_fast_path_profile(&self, cv: &mut CvData, meta: &mut Metadata, client_context: Option<&Value>) {
        let fast_path = client_context.and_then(|c| c.get("fast_path_profile")).and_then(Value::as_bool).unwrap_or(false);
        if !fast_path {
            return;
        }
        let Some(store_ref) = client_context.and_then(|c| c.get("stable_profile_ref")).and_then(Value::as_str) else {
            return;
        };
        match self.stable_profiles.load(store_ref).await {
            Ok(Some((stable_cv, captured_language))) => {
                profile_import::apply_stable_profile(cv, meta, stable_cv, Some(&captured_language));
            }
            Ok(None) => tracing::warn!(store_ref, "stable profile ref not found, continuing without fast path"),
            Err(e) => tracing::warn!(error = %e, "failed to load stable profile, continuing without fast path"),
        }
    }

    async fn maybe_attach_pdf(&self, action_id: Option<&str>, meta: &Metadata) -> (Option<String>, Option<String>) {
        if !matches!(action_id, Some("REQUEST_GENERATE_PDF") | Some("DOWNLOAD_PDF")) {
            return (None, None);
        }
        let Some(pdf_ref) = meta.pdf_refs.get("cv") else {
            return (None, None);
        };
        match self.blobs.get(&pdf_ref.container, &pdf_ref.blob_name).await {
            Ok(Some(bytes)) => (Some(STANDARD.encode(bytes)), Some(pdf_ref.download_name.clone())),
            _ => (None, None),
        }
    }

    async fn build_response(
        &self,
        session: Session,
        error: Option<String>,
        trace_id: &str,
        action_id: Option<&str>,
    ) -> Result<TurnResponse, AppError> {
        let (pdf_base64, filename) = self.maybe_attach_pdf(action_id, &session.metadata).await;
        let text = assistant_text(session.metadata.wizard_stage, error.as_ref());
        let ui_action = ui::build_ui_action(session.metadata.wizard_stage);
        let readiness = compute_readiness(&session.cv_data, &session.metadata);

        Ok(TurnResponse {
            success: error.is_none(),
            session_id: session.id,
            stage: coarse_stage(session.metadata.wizard_stage),
            response: text,
            ui_action: Some(ui_action),
            run_summary: RunSummary {
                execution_mode: if self.config.single_call_execution {
                    "single_call".to_string()
                } else {
                    "multi_call".to_string()
                },
                model_calls: 0,
                max_model_calls: self.config.max_model_calls,
                stage_debug: serde_json::json!({
                    "trace_id": trace_id,
                    "wizard_stage": session.metadata.wizard_stage,
                    "readiness": readiness,
                }),
            },
            cv_data: session.cv_data,
            metadata: session.metadata,
            pdf_base64,
            filename,
        })
    }
}

#[cfg(test)]
mod tests {
    //! End-to-end scenario tests (§8 S1, S3) driving [`Orchestrator`]
    //! through real `process_turn` calls against the in-memory fakes, rather
    //! than unit-testing each family handler in isolation as the sibling
    //! modules already do.

    use super::*;
    use crate::blob::fake::InMemoryBlobStore;
    use crate::docx::ZipDocxExtractor;
    use crate::llm::fake::ScriptedLlmGateway;
    use crate::models::UserAction;
    use crate::stable_profile::fake::InMemoryStableProfileStore;
    use crate::store::fake::InMemorySessionStore;

    fn test_orchestrator(llm_responses: Vec<Value>) -> Orchestrator {
        Orchestrator::new(
            Arc::new(InMemorySessionStore::default()),
            Arc::new(InMemoryBlobStore::default()),
            Arc::new(ScriptedLlmGateway::with_responses(llm_responses)),
            Arc::new(crate::pdf::DefaultPdfRenderer),
            Arc::new(ZipDocxExtractor),
            Arc::new(InMemoryStableProfileStore::default()),
            Config::for_test(),
        )
    }

    fn action(id: &str, payload: Option<Value>) -> ProcessTurnParams {
        ProcessTurnParams {
            user_action: Some(UserAction { id: id.to_string(), payload }),
            ..Default::default()
        }
    }

    /// (S1) Happy path, English: a fresh session walks contact, education,
    /// job posting, work tailoring, skills, and PDF generation end to end,
    /// landing on `Done`, and a repeat `REQUEST_GENERATE_PDF` reuses the
    /// cached render byte-for-byte (§8 property 7).
    #[tokio::test]
    async fn s1_happy_path_reaches_cover_letter_review_and_pdf_generation_is_idempotent() {
        let tailored_roles = serde_json::json!({ "roles": [{
            "title": "Engineer", "employer": "Acme", "date_range": "2020-2023",
            "location": "Berlin", "bullets": ["Shipped the thing"]
        }]});
        let orch = test_orchestrator(vec![tailored_roles]);

        let mut meta = Metadata::default();
        meta.wizard_stage = WizardStage::LanguageSelection;
        let session = orch.store.create(CvData::default(), meta).await.unwrap();
        let session_id = session.id;

        let mut params = action("LANGUAGE_SELECT_EN", None);
        params.session_id = Some(session_id);
        let resp = orch.process_turn(params).await.unwrap();
        assert_eq!(resp.stage, Stage::Prepare);
        assert_eq!(resp.metadata.wizard_stage, WizardStage::Contact);

        let mut params = action(
            "CONTACT_SAVE",
            Some(serde_json::json!({"full_name": "Jane Doe", "email": "jane@example.com", "phone": "+1 555 0100"})),
        );
        params.session_id = Some(session_id);
        let resp = orch.process_turn(params).await.unwrap();
        assert_eq!(resp.metadata.wizard_stage, WizardStage::Contact);

        let mut params = action("CONTACT_CONFIRM", None);
        params.session_id = Some(session_id);
        let resp = orch.process_turn(params).await.unwrap();
        assert_eq!(resp.metadata.wizard_stage, WizardStage::Education);
        assert!(resp.metadata.confirmed_flags.contact_confirmed);

        let mut params = action(
            "EDUCATION_SAVE",
            Some(serde_json::json!({"education": [{"title": "BSc Computer Science", "institution": "State University", "date_range": "2014-2018", "details": []}]})),
        );
        params.session_id = Some(session_id);
        let resp = orch.process_turn(params).await.unwrap();
        assert_eq!(resp.metadata.wizard_stage, WizardStage::Education);

        let mut params = action("EDUCATION_CONFIRM", None);
        params.session_id = Some(session_id);
        let resp = orch.process_turn(params).await.unwrap();
        assert_eq!(resp.metadata.wizard_stage, WizardStage::JobPosting);
        assert!(resp.metadata.confirmed_flags.education_confirmed);

        let mut params = action("JOB_OFFER_SKIP", None);
        params.session_id = Some(session_id);
        let resp = orch.process_turn(params).await.unwrap();
        assert_eq!(resp.metadata.wizard_stage, WizardStage::WorkExperience);

        let mut params = action("WORK_TAILOR_RUN", None);
        params.session_id = Some(session_id);
        let resp = orch.process_turn(params).await.unwrap();
        assert_eq!(resp.metadata.wizard_stage, WizardStage::WorkTailorReview);
        assert_eq!(resp.stage, Stage::Review);

        let mut params = action("WORK_TAILOR_ACCEPT", None);
        params.session_id = Some(session_id);
        let resp = orch.process_turn(params).await.unwrap();
        assert_eq!(resp.metadata.wizard_stage, WizardStage::ItAiSkills);
        assert_eq!(resp.cv_data.work_experience.len(), 1);
        assert_eq!(resp.cv_data.work_experience[0].employer, "Acme");

        let mut params = action("SKILLS_TAILOR_SKIP", None);
        params.session_id = Some(session_id);
        let resp = orch.process_turn(params).await.unwrap();
        assert_eq!(resp.metadata.wizard_stage, WizardStage::ReviewFinal);
        assert_eq!(resp.stage, Stage::Confirm);

        let mut params = action("REQUEST_GENERATE_PDF", None);
        params.session_id = Some(session_id);
        let first = orch.process_turn(params).await.unwrap();
        // Cover letters are enabled and the locked language is English, so
        // generation routes to the cover-letter step rather than straight
        // to `Done` (§4.5.2).
        assert_eq!(first.metadata.wizard_stage, WizardStage::CoverLetterReview);
        assert_eq!(first.stage, Stage::Confirm);
        assert!(first.metadata.pdf_generated);
        let first_pdf = first.pdf_base64.expect("pdf_base64 must be set after generation");
        assert!(first_pdf.len() > 1000);

        let mut params = action("REQUEST_GENERATE_PDF", None);
        params.session_id = Some(session_id);
        let second = orch.process_turn(params).await.unwrap();
        assert_eq!(
            second.pdf_base64.as_deref(),
            Some(first_pdf.as_str()),
            "a repeat REQUEST_GENERATE_PDF with unchanged inputs must reuse the cached render"
        );
    }

    /// (S3) A `Done` session is not sticky once the user's free text carries
    /// edit intent — the coarse stage drops back to `Review` so the wizard
    /// can route the user to a fixup screen.
    #[tokio::test]
    async fn s3_edit_intent_after_done_returns_to_review() {
        let orch = test_orchestrator(vec![]);

        let mut meta = Metadata::default();
        meta.wizard_stage = WizardStage::Done;
        meta.target_language = Some("en".to_string());
        let session = orch.store.create(CvData::default(), meta).await.unwrap();

        let params = ProcessTurnParams {
            session_id: Some(session.id),
            message: Some("Actually, can you change my work experience?".to_string()),
            ..Default::default()
        };
        let resp = orch.process_turn(params).await.unwrap();
        assert_eq!(resp.stage, Stage::Review);
    }

    /// (S2) German output: same shape as S1 up through `WORK_TAILOR_RUN`,
    /// but with `LANGUAGE_SELECT_DE`. The tailored bullets, once joined,
    /// must read as German prose — more occurrences of `{der, die, das,
    /// und}` than of `{the, and}`.
    #[tokio::test]
    async fn s2_german_output_tailored_bullets_read_as_german() {
        let tailored_roles = serde_json::json!({ "roles": [{
            "title": "Ingenieur", "employer": "Acme", "date_range": "2020-2023",
            "location": "Berlin", "bullets": ["Die Zahlungsplattform und das Team wurden von der Ingenieurin geleitet"]
        }]});
        let orch = test_orchestrator(vec![tailored_roles]);

        let mut meta = Metadata::default();
        meta.wizard_stage = WizardStage::LanguageSelection;
        let session = orch.store.create(CvData::default(), meta).await.unwrap();
        let session_id = session.id;

        let mut params = action("LANGUAGE_SELECT_DE", None);
        params.session_id = Some(session_id);
        let resp = orch.process_turn(params).await.unwrap();
        assert_eq!(resp.metadata.target_language.as_deref(), Some("de"));

        let mut params = action("CONTACT_SAVE", Some(serde_json::json!({"full_name": "Jane Doe", "email": "jane@example.com", "phone": "+1 555 0100"})));
        params.session_id = Some(session_id);
        orch.process_turn(params).await.unwrap();
        let mut params = action("CONTACT_CONFIRM", None);
        params.session_id = Some(session_id);
        orch.process_turn(params).await.unwrap();
        let mut params = action("EDUCATION_SAVE", Some(serde_json::json!({"education": [{"title": "BSc", "institution": "Uni", "date_range": "2014-2018", "details": []}]})));
        params.session_id = Some(session_id);
        orch.process_turn(params).await.unwrap();
        let mut params = action("EDUCATION_CONFIRM", None);
        params.session_id = Some(session_id);
        orch.process_turn(params).await.unwrap();
        let mut params = action("JOB_OFFER_SKIP", None);
        params.session_id = Some(session_id);
        orch.process_turn(params).await.unwrap();

        let mut params = action("WORK_TAILOR_RUN", None);
        params.session_id = Some(session_id);
        let resp = orch.process_turn(params).await.unwrap();
        assert_eq!(resp.metadata.wizard_stage, WizardStage::WorkTailorReview);

        let joined = resp.cv_data.work_experience.iter().flat_map(|r| r.bullets.iter()).cloned().collect::<Vec<_>>().join(" ").to_lowercase();
        let german_hits = ["der", "die", "das", "und"].iter().map(|w| joined.matches(w).count()).sum::<usize>();
        let english_hits = ["the", "and"].iter().map(|w| joined.matches(w).count()).sum::<usize>();
        assert!(german_hits > english_hits, "expected German markers to dominate: {joined:?}");
    }

    /// (S4) A forced proposal carrying a 230-char English bullet (over the
    /// 200-char base hard limit): `WORK_TAILOR_ACCEPT` must not modify
    /// `cv_data.work_experience`, and the stage drops to
    /// `work_tailor_feedback` once the silent retry budget is exhausted.
    #[tokio::test]
    async fn s4_hard_limit_violation_blocks_accept_and_preserves_cv() {
        let over_limit = "x".repeat(230);
        let still_violating = serde_json::json!({ "roles": [{
            "title": "Engineer", "employer": "Acme", "date_range": "2020-2023",
            "location": "Berlin", "bullets": [over_limit]
        }]});
        // tailor_accept's silent retry budget is MAX_ACCEPT_RETRY_ATTEMPTS (2).
        let orch = test_orchestrator(vec![still_violating.clone(), still_violating.clone()]);

        let mut meta = Metadata::default();
        meta.wizard_stage = WizardStage::WorkTailorReview;
        meta.target_language = Some("en".to_string());
        meta.work_experience_proposal_block = Some(still_violating["roles"].clone());
        let session = orch.store.create(CvData::default(), meta).await.unwrap();

        let mut params = action("WORK_TAILOR_ACCEPT", None);
        params.session_id = Some(session.id);
        let resp = orch.process_turn(params).await.unwrap();

        assert_eq!(resp.metadata.wizard_stage, WizardStage::WorkTailorFeedback);
        assert!(resp.cv_data.work_experience.is_empty(), "a violating proposal must never land in cv_data");
        assert!(!resp.success);
        assert!(resp.response.contains("hard character limit"));
    }
}
