use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Canonical, language-neutral CV record. Field shapes mirror the wizard's
/// own editing surface: everything is a flat, ordered sequence so that
/// `update_field` can replace a whole section wholesale without a merge step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CvData {
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub address_lines: Vec<String>,
    #[serde(default)]
    pub photo_url: String,
    #[serde(default)]
    pub profile: String,
    #[serde(default)]
    pub work_experience: Vec<Role>,
    #[serde(default)]
    pub education: Vec<EducationEntry>,
    #[serde(default)]
    pub further_experience: Vec<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub it_ai_skills: Vec<String>,
    #[serde(default)]
    pub technical_operational_skills: Vec<String>,
    #[serde(default)]
    pub interests: String,
    #[serde(default)]
    pub references: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Role {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub employer: String,
    #[serde(default)]
    pub date_range: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub bullets: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EducationEntry {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub institution: String,
    #[serde(default)]
    pub date_range: String,
    #[serde(default)]
    pub details: Vec<String>,
}

/// Coarse FSM state (C2). Kept separate from `WizardStage` because the
/// macro/substage split is load-bearing: see §4.2 of SPEC_FULL.md.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Ingest,
    Prepare,
    Review,
    Confirm,
    Execute,
    Done,
}

/// Fine-grained wizard substage tag, the single source of truth consumed by
/// the UI builder (§9 Wizard-UI contract).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardStage {
    LanguageSelection,
    Contact,
    ContactEdit,
    Education,
    EducationEdit,
    JobPosting,
    JobPostingPaste,
    WorkExperience,
    WorkNotesEdit,
    WorkTailorReview,
    WorkTailorFeedback,
    ItAiSkills,
    SkillsNotesEdit,
    SkillsTailorReview,
    ReviewFinal,
    CoverLetterReview,
    ImportGatePending,
    Done,
}

impl Default for WizardStage {
    fn default() -> Self {
        WizardStage::LanguageSelection
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfirmedFlags {
    #[serde(default)]
    pub contact_confirmed: bool,
    #[serde(default)]
    pub education_confirmed: bool,
    #[serde(default)]
    pub confirmed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobReference {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub seniority: String,
    #[serde(default)]
    pub must_haves: Vec<String>,
    #[serde(default)]
    pub nice_to_haves: Vec<String>,
    #[serde(default)]
    pub language: String,
}

/// A resolved pointer to a blob-stored sub-object, used both for metadata
/// offloading (§4.1) and for PDF refs (§4.5.2). Content-addressed by
/// `sha256` of the serialized payload so identical payloads dedupe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobPointer {
    pub container: String,
    pub blob_name: String,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdfRef {
    /// "cv" | "cover_letter"
    pub kind: String,
    pub container: String,
    pub blob_name: String,
    pub download_name: String,
    pub created_at: DateTime<Utc>,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub ts: DateTime<Utc>,
    pub kind: String,
    #[serde(default)]
    pub detail: Value,
}

/// Cross-session fast-path prefill pointer. `store` is treated as an opaque
/// string per the Open Question resolution recorded in DESIGN.md — this
/// crate never interprets its internal encoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StableProfileRef {
    pub store: String,
    #[serde(default)]
    pub language: Option<String>,
}

/// Side-data keyed by wizard needs. Bulky, free-form sub-objects
/// (`docx_prefill_unconfirmed`, proposal blocks) are kept as `Value` so the
/// session store can offload them to blob storage uniformly without this
/// module knowing about the store's row-size budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub wizard_stage: WizardStage,
    #[serde(default)]
    pub stage_history: VecDeque<WizardStage>,
    #[serde(default)]
    pub target_language: Option<String>,
    #[serde(default)]
    pub source_language: Option<String>,
    #[serde(default)]
    pub confirmed_flags: ConfirmedFlags,
    #[serde(default)]
    pub docx_prefill_unconfirmed: Option<Value>,
    #[serde(default)]
    pub prefill_summary: Option<Value>,
    #[serde(default)]
    pub job_reference: Option<JobReference>,
    #[serde(default)]
    pub job_posting_text: Option<String>,
    #[serde(default)]
    pub job_posting_url: Option<String>,
    #[serde(default)]
    pub job_fetch_status: Option<String>,
    #[serde(default)]
    pub job_input_status: Option<String>,
    #[serde(default)]
    pub job_input_invalid_reason: Option<String>,
    #[serde(default)]
    pub job_posting_invalid_draft: Option<String>,
    #[serde(default)]
    pub work_tailoring_notes: Option<String>,
    #[serde(default)]
    pub work_tailoring_feedback: Option<String>,
    #[serde(default)]
    pub work_experience_proposal_block: Option<Value>,
    #[serde(default)]
    pub skills_proposal_block: Option<Value>,
    #[serde(default)]
    pub cover_letter_block: Option<Value>,
    #[serde(default)]
    pub work_experience_proposal_input_sig: Option<String>,
    #[serde(default)]
    pub skills_proposal_input_sig: Option<String>,
    #[serde(default)]
    pub pdf_refs: HashMap<String, PdfRef>,
    #[serde(default)]
    pub pdf_generated: bool,
    #[serde(default)]
    pub pdf_failed: bool,
    /// Content signature of the CV/language pair behind the last generated
    /// `pdf_refs["cv"]`, used to decide whether `REQUEST_GENERATE_PDF` can
    /// reuse the cached artifact instead of re-rendering (§4.5.2).
    #[serde(default)]
    pub pdf_input_sig: Option<String>,
    #[serde(default)]
    pub bulk_translated_to: Option<String>,
    #[serde(default)]
    pub bulk_translation_source_sig: Option<String>,
    #[serde(default)]
    pub section_hashes: HashMap<String, String>,
    #[serde(default)]
    pub section_hashes_prev: HashMap<String, String>,
    #[serde(default)]
    pub event_log: VecDeque<EventLogEntry>,
    #[serde(default)]
    pub stable_profile_ref: Option<StableProfileRef>,
    #[serde(default)]
    pub selected_role_index: Option<usize>,
    #[serde(default)]
    pub turns_in_review: u32,
    #[serde(default)]
    pub pending_edits: u32,
    /// Supplemental CONFIRM-gate relaxation signal, see §4.2.
    #[serde(default)]
    pub high_confidence: bool,
}

impl Default for Metadata {
    fn default() -> Self {
        Metadata {
            wizard_stage: WizardStage::default(),
            stage_history: VecDeque::new(),
            target_language: None,
            source_language: None,
            confirmed_flags: ConfirmedFlags::default(),
            docx_prefill_unconfirmed: None,
            prefill_summary: None,
            job_reference: None,
            job_posting_text: None,
            job_posting_url: None,
            job_fetch_status: None,
            job_input_status: None,
            job_input_invalid_reason: None,
            job_posting_invalid_draft: None,
            work_tailoring_notes: None,
            work_tailoring_feedback: None,
            work_experience_proposal_block: None,
            skills_proposal_block: None,
            cover_letter_block: None,
            work_experience_proposal_input_sig: None,
            skills_proposal_input_sig: None,
            pdf_refs: HashMap::new(),
            pdf_generated: false,
            pdf_failed: false,
            pdf_input_sig: None,
            bulk_translated_to: None,
            bulk_translation_source_sig: None,
            section_hashes: HashMap::new(),
            section_hashes_prev: HashMap::new(),
            event_log: VecDeque::new(),
            stable_profile_ref: None,
            selected_role_index: None,
            turns_in_review: 0,
            pending_edits: 0,
            high_confidence: false,
        }
    }
}

pub const STAGE_HISTORY_LIMIT: usize = 20;
pub const EVENT_LOG_LIMIT: usize = 80;

impl Metadata {
    /// Appends a stage to history, enforcing invariant 7 (no consecutive
    /// duplicates) and the bounded-length rule.
    pub fn push_stage_history(&mut self, stage: WizardStage) {
        if self.stage_history.back() == Some(&stage) {
            return;
        }
        self.stage_history.push_back(stage);
        while self.stage_history.len() > STAGE_HISTORY_LIMIT {
            self.stage_history.pop_front();
        }
    }

    pub fn append_event(&mut self, kind: impl Into<String>, detail: Value) {
        self.event_log.push_back(EventLogEntry {
            ts: Utc::now(),
            kind: kind.into(),
            detail,
        });
        while self.event_log.len() > EVENT_LOG_LIMIT {
            self.event_log.pop_front();
        }
    }

    pub fn has_pending_proposal(&self) -> bool {
        self.work_experience_proposal_block.is_some() || self.skills_proposal_block.is_some()
    }
}

/// Session — the only mutable aggregate, exclusively owned by its id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub cv_data: CvData,
    pub metadata: Metadata,
}
