//! Validation & Guards (C4): hard character limits, the job-posting gate,
//! the no-invention check, and the readiness summary that gates PDF
//! execution. Pure functions over `CvData`/`Metadata` — no I/O, no LLM
//! calls — grounded on the teacher's `context/validation.rs` impact-gate
//! shape (a pure predicate returning a structured pass/fail + reasons).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::models::{CvData, Metadata, Role};

/// Base (English) hard limits, scaled by [`hard_limit_scale`] for
/// German-like targets (§4.4).
pub const WORK_BULLET_BASE: usize = 200;
pub const FURTHER_EXPERIENCE_BULLET_BASE: usize = 80;
pub const ROLE_TITLE_BASE: usize = 90;
pub const EMPLOYER_BASE: usize = 60;
pub const LOCATION_BASE: usize = 50;
pub const DATE_RANGE_BASE: usize = 25;
pub const PROFILE_BASE: usize = 320;
pub const SKILLS_ITEM_BASE: usize = 70;
pub const LANGUAGES_ITEM_BASE: usize = 50;

const GERMAN_SCALE_FACTOR: f64 = 1.25;

/// Scale factor applied to base limits for `target_language`. Only
/// German-like targets scale (§3 invariant 4: `HARD_LIMIT(de)=250` is
/// `200 * 1.25`); every other language uses the base limit unscaled.
pub fn hard_limit_scale(target_language: Option<&str>) -> f64 {
    match target_language {
        Some(lang) if lang.eq_ignore_ascii_case("de") => GERMAN_SCALE_FACTOR,
        _ => 1.0,
    }
}

fn scaled(base: usize, target_language: Option<&str>) -> usize {
    ((base as f64) * hard_limit_scale(target_language)).round() as usize
}

pub fn work_bullet_limit(target_language: Option<&str>) -> usize {
    scaled(WORK_BULLET_BASE, target_language)
}
pub fn further_experience_bullet_limit(target_language: Option<&str>) -> usize {
    scaled(FURTHER_EXPERIENCE_BULLET_BASE, target_language)
}
pub fn role_title_limit(target_language: Option<&str>) -> usize {
    scaled(ROLE_TITLE_BASE, target_language)
}
pub fn employer_limit(target_language: Option<&str>) -> usize {
    scaled(EMPLOYER_BASE, target_language)
}
pub fn location_limit(target_language: Option<&str>) -> usize {
    scaled(LOCATION_BASE, target_language)
}
pub fn date_range_limit(target_language: Option<&str>) -> usize {
    scaled(DATE_RANGE_BASE, target_language)
}
pub fn profile_limit(target_language: Option<&str>) -> usize {
    scaled(PROFILE_BASE, target_language)
}
pub fn skills_item_limit(target_language: Option<&str>) -> usize {
    scaled(SKILLS_ITEM_BASE, target_language)
}
pub fn languages_item_limit(target_language: Option<&str>) -> usize {
    scaled(LANGUAGES_ITEM_BASE, target_language)
}

/// A single hard-limit breach, carrying enough indices for feedback-driven
/// retries (§4.5.1: "feed focused violations back into the same prompt").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BulletViolation {
    pub role_index: usize,
    pub bullet_index: usize,
    pub len: usize,
    pub limit: usize,
    pub text: String,
}

/// Checks every bullet of every role against the language-scaled work-bullet
/// hard limit (§3 invariant 4, §4.4).
pub fn bullet_length_violations(roles: &[Role], target_language: Option<&str>) -> Vec<BulletViolation> {
    let limit = work_bullet_limit(target_language);
    let mut violations = Vec::new();
    for (role_index, role) in roles.iter().enumerate() {
        for (bullet_index, bullet) in role.bullets.iter().enumerate() {
            let len = bullet.chars().count();
            if len > limit {
                violations.push(BulletViolation {
                    role_index,
                    bullet_index,
                    len,
                    limit,
                    text: bullet.clone(),
                });
            }
        }
    }
    violations
}

/// Stop words excluded from grounding checks: function words common across
/// the languages this wizard supports, plus punctuation-adjacent tokens
/// that never carry a "claim" on their own.
const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "of", "to", "in", "on", "for", "with", "at", "by", "from",
    "as", "is", "are", "was", "were", "be", "been", "this", "that", "these", "those", "it", "its",
    "der", "die", "das", "und", "oder", "von", "zu", "in", "auf", "mit", "bei", "für", "als",
    "ist", "sind", "war", "waren", "ein", "eine", "einer", "dem", "den", "des",
];

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2 && !STOP_WORDS.contains(t))
        .map(|t| t.to_string())
        .collect()
}

/// A no-invention ("E0") violation: a bullet containing a token not
/// grounded in the labeled corpus blocks (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InventionViolation {
    pub role_index: usize,
    pub bullet_index: usize,
    pub ungrounded_tokens: Vec<String>,
}

/// Builds the grounding corpus from the labeled input blocks (§4.4):
/// `CURRENT_WORK_EXPERIENCE`, `TAILORING_SUGGESTIONS`, `TAILORING_FEEDBACK`.
/// Any proposal token not present in this set (beyond stop words) is
/// ungrounded.
pub fn build_grounding_corpus(
    current_roles: &[Role],
    tailoring_notes: Option<&str>,
    tailoring_feedback: Option<&str>,
) -> HashSet<String> {
    let mut corpus = HashSet::new();
    for role in current_roles {
        for token in tokenize(&role.title) {
            corpus.insert(token);
        }
        for token in tokenize(&role.employer) {
            corpus.insert(token);
        }
        for token in tokenize(&role.location) {
            corpus.insert(token);
        }
        for bullet in &role.bullets {
            for token in tokenize(bullet) {
                corpus.insert(token);
            }
        }
    }
    if let Some(notes) = tailoring_notes {
        for token in tokenize(notes) {
            corpus.insert(token);
        }
    }
    if let Some(feedback) = tailoring_feedback {
        for token in tokenize(feedback) {
            corpus.insert(token);
        }
    }
    corpus
}

/// Checks every proposed bullet against `corpus`, flagging any bullet that
/// contains a token not grounded in the corpus.
pub fn no_invention_violations(proposed_roles: &[Role], corpus: &HashSet<String>) -> Vec<InventionViolation> {
    let mut violations = Vec::new();
    for (role_index, role) in proposed_roles.iter().enumerate() {
        for (bullet_index, bullet) in role.bullets.iter().enumerate() {
            let ungrounded: Vec<String> = tokenize(bullet).into_iter().filter(|t| !corpus.contains(t)).collect();
            if !ungrounded.is_empty() {
                violations.push(InventionViolation {
                    role_index,
                    bullet_index,
                    ungrounded_tokens: ungrounded,
                });
            }
        }
    }
    violations
}

/// A flat-list item exceeding its hard character limit, carrying the index
/// so a caller can truncate or report in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemViolation {
    pub index: usize,
    pub len: usize,
    pub limit: usize,
    pub text: String,
}

/// Checks every item of a flat string list (skills, languages) against
/// `limit`, unlike [`bullet_length_violations`] which walks role/bullet
/// pairs.
pub fn item_length_violations(items: &[String], limit: usize) -> Vec<ItemViolation> {
    items
        .iter()
        .enumerate()
        .filter(|(_, item)| item.chars().count() > limit)
        .map(|(index, item)| ItemViolation {
            index,
            len: item.chars().count(),
            limit,
            text: item.clone(),
        })
        .collect()
}

/// Truncates every item of `items` to at most `limit` chars, in place.
pub fn truncate_items_to_limit(items: &mut [String], limit: usize) {
    for item in items.iter_mut() {
        if item.chars().count() > limit {
            *item = item.chars().take(limit).collect();
        }
    }
}

/// Job-posting input classification (§4.4). Pasted/fetched text must look
/// like an actual posting, not candidate notes accidentally pasted into the
/// wrong box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobInputStatus {
    Valid,
    Invalid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobGateResult {
    pub status: JobInputStatus,
    pub reason: Option<String>,
}

const MIN_JOB_TEXT_LEN: usize = 80;
const MIN_ALPHA_RATIO: f64 = 0.6;
const MAX_FIRST_PERSON_RATIO: f64 = 0.03;

const FIRST_PERSON_PRONOUNS: &[&str] = &["i", "me", "my", "mine", "ich", "mir", "mich", "mein"];

/// Applies the job-posting gate (§4.4): long enough, mostly alphabetic, and
/// not shaped like first-person candidate notes.
pub fn job_posting_gate(text: &str) -> JobGateResult {
    let trimmed = text.trim();
    if trimmed.chars().count() < MIN_JOB_TEXT_LEN {
        return JobGateResult {
            status: JobInputStatus::Invalid,
            reason: Some("too_short".to_string()),
        };
    }

    let alpha_count = trimmed.chars().filter(|c| c.is_alphabetic()).count();
    let alpha_ratio = alpha_count as f64 / trimmed.chars().count() as f64;
    if alpha_ratio < MIN_ALPHA_RATIO {
        return JobGateResult {
            status: JobInputStatus::Invalid,
            reason: Some("low_alphabetic_ratio".to_string()),
        };
    }

    let words: Vec<&str> = trimmed.split_whitespace().collect();
    let first_person_count = words
        .iter()
        .filter(|w| FIRST_PERSON_PRONOUNS.contains(&w.to_lowercase().trim_matches(|c: char| !c.is_alphanumeric())))
        .count();
    let first_person_ratio = if words.is_empty() {
        0.0
    } else {
        first_person_count as f64 / words.len() as f64
    };
    if first_person_ratio > MAX_FIRST_PERSON_RATIO {
        return JobGateResult {
            status: JobInputStatus::Invalid,
            reason: Some("looks_like_candidate_notes".to_string()),
        };
    }

    JobGateResult {
        status: JobInputStatus::Valid,
        reason: None,
    }
}

/// Readiness summary gating PDF execution (§4.4, §8 property 10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Readiness {
    pub has_contact: bool,
    pub has_education: bool,
    pub has_work_experience: bool,
    pub contact_confirmed: bool,
    pub education_confirmed: bool,
    pub can_generate: bool,
    pub reasons: Vec<String>,
}

/// Computes the readiness summary from `(cv_data, metadata)` (§4.4).
/// `can_generate` requires every gate true AND no pending proposal blocks.
pub fn compute_readiness(cv: &CvData, metadata: &Metadata) -> Readiness {
    let has_contact = !cv.full_name.is_empty() && !cv.email.is_empty() && !cv.phone.is_empty();
    let has_education = !cv.education.is_empty();
    let has_work_experience = !cv.work_experience.is_empty();
    let contact_confirmed = metadata.confirmed_flags.contact_confirmed;
    let education_confirmed = metadata.confirmed_flags.education_confirmed;
    let has_pending_proposal = metadata.has_pending_proposal();

    let mut reasons = Vec::new();
    if !has_contact {
        reasons.push("missing contact fields".to_string());
    }
    if !contact_confirmed {
        reasons.push("contact not confirmed".to_string());
    }
    if !has_education {
        reasons.push("missing education".to_string());
    }
    if !education_confirmed {
        reasons.push("education not confirmed".to_string());
    }
    if !has_work_experience {
        reasons.push("missing work experience".to_string());
    }
    if has_pending_proposal {
        reasons.push("a proposal is awaiting accept/reject".to_string());
    }

    let can_generate = has_contact
        && has_education
        && has_work_experience
        && contact_confirmed
        && education_confirmed
        && !has_pending_proposal;

    Readiness {
        has_contact,
        has_education,
        has_work_experience,
        contact_confirmed,
        education_confirmed,
        can_generate,
        reasons,
    }
}

/// Validates contact field lengths/presence required for `CONTACT_CONFIRM`
/// (§3 invariant 3: `contact_confirmed` implies all three are non-empty).
pub fn contact_confirmable(cv: &CvData) -> bool {
    !cv.full_name.trim().is_empty() && !cv.email.trim().is_empty() && !cv.phone.trim().is_empty()
}
