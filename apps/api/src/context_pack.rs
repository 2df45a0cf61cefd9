//! Context Pack Builder (C7): a bounded, phase-specific projection of
//! session state fed to the LLM gateway as input. Grounded on the teacher's
//! `context/completeness.rs` (a pure function projecting a row set into a
//! bounded report) and the delta-mode flag from
//! `original_source/src/orchestrator/tools/context_pack_tools.py`.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::{CvData, Metadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Preparation,
    Confirmation,
    Execution,
}

pub const DEFAULT_MAX_PACK_CHARS: usize = 8000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextPack {
    pub phase: Phase,
    pub sections: Vec<PackSection>,
    pub truncated: bool,
    pub delta_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackSection {
    pub label: String,
    pub text: String,
}

fn section_digest(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

fn contact_section(cv: &CvData) -> PackSection {
    PackSection {
        label: "CONTACT".to_string(),
        text: format!(
            "{} | {} | {} | {}",
            cv.full_name,
            cv.email,
            cv.phone,
            cv.address_lines.join(", ")
        ),
    }
}

fn profile_section(cv: &CvData) -> PackSection {
    PackSection {
        label: "PROFILE".to_string(),
        text: cv.profile.clone(),
    }
}

fn work_experience_section(cv: &CvData) -> PackSection {
    let mut text = String::new();
    for role in &cv.work_experience {
        text.push_str(&format!(
            "- {} at {} ({}), {}\n",
            role.title, role.employer, role.date_range, role.location
        ));
        for bullet in &role.bullets {
            text.push_str(&format!("  * {bullet}\n"));
        }
    }
    PackSection {
        label: "CURRENT_WORK_EXPERIENCE".to_string(),
        text,
    }
}

fn education_section(cv: &CvData) -> PackSection {
    let mut text = String::new();
    for edu in &cv.education {
        text.push_str(&format!("- {} at {} ({})\n", edu.title, edu.institution, edu.date_range));
        for detail in &edu.details {
            text.push_str(&format!("  * {detail}\n"));
        }
    }
    PackSection {
        label: "EDUCATION".to_string(),
        text,
    }
}

fn skills_section(cv: &CvData) -> PackSection {
    PackSection {
        label: "SKILLS".to_string(),
        text: format!(
            "IT/AI: {}\nTechnical/Operational: {}\nLanguages: {}",
            cv.it_ai_skills.join(", "),
            cv.technical_operational_skills.join(", "),
            cv.languages.join(", ")
        ),
    }
}

fn job_reference_section(metadata: &Metadata, job_posting_text: Option<&str>) -> Option<PackSection> {
    if let Some(job_ref) = &metadata.job_reference {
        return Some(PackSection {
            label: "JOB_REFERENCE".to_string(),
            text: format!(
                "{} at {} ({})\nMust-haves: {}\nNice-to-haves: {}",
                job_ref.title,
                job_ref.company,
                job_ref.seniority,
                job_ref.must_haves.join(", "),
                job_ref.nice_to_haves.join(", ")
            ),
        });
    }
    job_posting_text.map(|text| PackSection {
        label: "JOB_POSTING_TEXT".to_string(),
        text: text.to_string(),
    })
}

fn tailoring_notes_section(metadata: &Metadata) -> Option<PackSection> {
    let notes = metadata.work_tailoring_notes.as_deref().unwrap_or_default();
    let feedback = metadata.work_tailoring_feedback.as_deref().unwrap_or_default();
    if notes.is_empty() && feedback.is_empty() {
        return None;
    }
    Some(PackSection {
        label: "TAILORING_SUGGESTIONS".to_string(),
        text: format!("NOTES: {notes}\nFEEDBACK: {feedback}"),
    })
}

fn pdf_refs_section(metadata: &Metadata) -> PackSection {
    PackSection {
        label: "PDF_REFS".to_string(),
        text: format!("{} generated artifact(s) on file", metadata.pdf_refs.len()),
    }
}

/// Builds the ordered, full (non-delta) section list for `phase` (§4.7):
/// Preparation omits PDF references; Execution emphasizes work/skills and
/// includes the job reference.
fn build_sections(phase: Phase, cv: &CvData, metadata: &Metadata, job_posting_text: Option<&str>) -> Vec<PackSection> {
    let mut sections = vec![contact_section(cv), profile_section(cv), education_section(cv)];

    match phase {
        Phase::Preparation => {
            sections.push(work_experience_section(cv));
            sections.push(skills_section(cv));
            if let Some(s) = job_reference_section(metadata, job_posting_text) {
                sections.push(s);
            }
        }
        Phase::Confirmation => {
            sections.push(work_experience_section(cv));
            sections.push(skills_section(cv));
            if let Some(s) = job_reference_section(metadata, job_posting_text) {
                sections.push(s);
            }
            if let Some(s) = tailoring_notes_section(metadata) {
                sections.push(s);
            }
        }
        Phase::Execution => {
            sections.push(work_experience_section(cv));
            sections.push(skills_section(cv));
            if let Some(s) = job_reference_section(metadata, job_posting_text) {
                sections.push(s);
            }
            if let Some(s) = tailoring_notes_section(metadata) {
                sections.push(s);
            }
            sections.push(pdf_refs_section(metadata));
        }
    }

    sections
}

/// Truncates `sections`' combined text to `max_pack_chars`, dropping whole
/// sections from the end rather than cutting mid-section. Never-truncate
/// (§7) applies to *CV content written back*, not to the size of an LLM
/// input pack, so trimming here is safe.
fn truncate_sections(mut sections: Vec<PackSection>, max_pack_chars: usize) -> (Vec<PackSection>, bool) {
    let total: usize = sections.iter().map(|s| s.text.chars().count()).sum();
    if total <= max_pack_chars {
        return (sections, false);
    }

    let mut budget = max_pack_chars;
    let mut kept = Vec::new();
    for section in sections.drain(..) {
        let len = section.text.chars().count();
        if len <= budget {
            budget -= len;
            kept.push(section);
        } else if budget > 0 {
            let truncated_text: String = section.text.chars().take(budget).collect();
            kept.push(PackSection {
                label: section.label,
                text: truncated_text,
            });
            budget = 0;
        }
    }
    (kept, true)
}

/// Builds a bounded, phase-scoped context pack (§4.7). When `delta_mode` is
/// requested AND a previous pack has already recorded section hashes, only
/// sections whose digest changed since that previous pack are included —
/// otherwise (first call of a session) falls back to a full pack, per the
/// grounding note in SPEC_FULL.md §4.7.
pub fn build_context_pack(
    phase: Phase,
    cv: &CvData,
    metadata: &mut Metadata,
    job_posting_text: Option<&str>,
    max_pack_chars: Option<usize>,
    delta_mode_requested: bool,
) -> ContextPack {
    let max_pack_chars = max_pack_chars.unwrap_or(DEFAULT_MAX_PACK_CHARS);
    let all_sections = build_sections(phase, cv, metadata, job_posting_text);

    let new_hashes: std::collections::HashMap<String, String> = all_sections
        .iter()
        .map(|s| (s.label.clone(), section_digest(&s.text)))
        .collect();

    // `section_hashes` holds the snapshot recorded as of the end of the
    // previous call; that's the baseline a delta pack diffs against. It is
    // then rotated into `section_hashes_prev` (informational) before being
    // replaced with this call's snapshot.
    let delta_eligible = delta_mode_requested && !metadata.section_hashes.is_empty();

    let sections = if delta_eligible {
        all_sections
            .into_iter()
            .filter(|s| {
                let prev = metadata.section_hashes.get(&s.label);
                prev != new_hashes.get(&s.label)
            })
            .collect()
    } else {
        all_sections
    };

    let (sections, truncated) = truncate_sections(sections, max_pack_chars);

    metadata.section_hashes_prev = metadata.section_hashes.clone();
    metadata.section_hashes = new_hashes;

    ContextPack {
        phase,
        sections,
        truncated,
        delta_mode: delta_eligible,
    }
}

impl ContextPack {
    /// Flattens the pack into the labeled-block text format the LLM
    /// gateway's prompts expect (`LABEL:\ntext\n\n` per section), matching
    /// the `CURRENT_WORK_EXPERIENCE` / `TAILORING_SUGGESTIONS` labels the
    /// no-invention corpus (§4.4) is built from.
    pub fn to_prompt_text(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            out.push_str(&section.label);
            out.push_str(":\n");
            out.push_str(&section.text);
            out.push_str("\n\n");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CvData, Metadata, Role};

    fn sample_cv() -> CvData {
        let mut cv = CvData::default();
        cv.full_name = "Jane Doe".to_string();
        cv.email = "jane@example.com".to_string();
        cv.work_experience.push(Role {
            title: "Engineer".to_string(),
            employer: "Acme".to_string(),
            date_range: "2020-2022".to_string(),
            location: "Berlin".to_string(),
            bullets: vec!["Shipped things".to_string()],
        });
        cv
    }

    #[test]
    fn preparation_omits_pdf_refs() {
        let cv = sample_cv();
        let mut meta = Metadata::default();
        let pack = build_context_pack(Phase::Preparation, &cv, &mut meta, None, None, false);
        assert!(!pack.sections.iter().any(|s| s.label == "PDF_REFS"));
    }

    #[test]
    fn execution_includes_pdf_refs() {
        let cv = sample_cv();
        let mut meta = Metadata::default();
        let pack = build_context_pack(Phase::Execution, &cv, &mut meta, None, None, false);
        assert!(pack.sections.iter().any(|s| s.label == "PDF_REFS"));
    }

    #[test]
    fn first_call_falls_back_to_full_pack_even_with_delta_requested() {
        let cv = sample_cv();
        let mut meta = Metadata::default();
        assert!(meta.section_hashes_prev.is_empty());
        let pack = build_context_pack(Phase::Execution, &cv, &mut meta, None, None, true);
        assert!(!pack.delta_mode, "first call has no prev hashes to diff against");
        assert!(!pack.sections.is_empty());
    }

    #[test]
    fn delta_mode_only_includes_changed_sections_on_second_call() {
        let cv = sample_cv();
        let mut meta = Metadata::default();
        let _first = build_context_pack(Phase::Execution, &cv, &mut meta, None, None, true);

        // Nothing changed: second call in delta mode should yield no sections.
        let second = build_context_pack(Phase::Execution, &cv, &mut meta, None, None, true);
        assert!(second.delta_mode);
        assert!(second.sections.is_empty());
    }

    #[test]
    fn delta_mode_includes_only_the_section_that_changed() {
        let mut cv = sample_cv();
        let mut meta = Metadata::default();
        let _first = build_context_pack(Phase::Execution, &cv, &mut meta, None, None, true);

        cv.profile = "Updated profile text".to_string();
        let second = build_context_pack(Phase::Execution, &cv, &mut meta, None, None, true);
        assert!(second.sections.iter().any(|s| s.label == "PROFILE"));
        assert!(!second.sections.iter().any(|s| s.label == "EDUCATION"));
    }

    #[test]
    fn truncation_drops_trailing_sections_not_mid_section() {
        let cv = sample_cv();
        let mut meta = Metadata::default();
        let pack = build_context_pack(Phase::Execution, &cv, &mut meta, None, Some(10), false);
        assert!(pack.truncated);
        // First section (CONTACT) is present even if cut short; never empty output.
        assert!(!pack.sections.is_empty());
    }
}
