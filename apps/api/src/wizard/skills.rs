//! Skills-tailoring family, the same shape as [`super::work`] but over the
//! two skills lists instead of role bullets. Each item is checked against
//! the per-item hard limit (§4.4: skills item 70 chars, language-scaled)
//! and truncated rather than rejected, since the sibling python structure
//! (`action_dispatch_skills.py`) has no feedback substage to send a skills
//! proposal back to — it silently clips instead of looping the model.

use crate::guards::{skills_item_limit, truncate_items_to_limit};
use crate::llm::{LlmGateway, SchemaCallParams, TraceCtx};
use crate::models::{CvData, Metadata, WizardStage};

pub fn add_notes(meta: &mut Metadata) {
    meta.wizard_stage = WizardStage::SkillsNotesEdit;
}

pub fn save_notes(meta: &mut Metadata, notes: &str) {
    meta.work_tailoring_notes = Some(notes.to_string());
    meta.wizard_stage = WizardStage::ItAiSkills;
}

pub fn cancel_notes(meta: &mut Metadata) {
    meta.wizard_stage = WizardStage::ItAiSkills;
}

pub fn skip(meta: &mut Metadata) {
    meta.wizard_stage = WizardStage::ReviewFinal;
}

#[derive(Debug, Clone, serde::Deserialize)]
struct SkillsTailorResponse {
    it_ai_skills: Vec<String>,
    technical_operational_skills: Vec<String>,
}

pub async fn tailor_run(
    llm: &dyn LlmGateway,
    session_id: &str,
    trace_id: &str,
    cv: &CvData,
    meta: &mut Metadata,
) -> Result<(), String> {
    let notes = meta.work_tailoring_notes.clone().unwrap_or_default();
    let job_ref_text = meta
        .job_reference
        .as_ref()
        .map(|j| format!("{} {} {}", j.title, j.must_haves.join(", "), j.nice_to_haves.join(", ")))
        .unwrap_or_default();

    let user_text = format!(
        "CURRENT_SKILLS:\nIT/AI: {}\nTechnical/Operational: {}\n\nJOB_REFERENCE:\n{job_ref_text}\n\nNOTES:\n{notes}",
        cv.it_ai_skills.join(", "),
        cv.technical_operational_skills.join(", ")
    );

    let params = SchemaCallParams {
        stage: "skills_tailor".to_string(),
        system_prompt: crate::llm::prompts::SKILLS_TAILOR_SYSTEM.to_string(),
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
    let parsed: SkillsTailorResponse = serde_json::from_value(value).map_err(|e| e.to_string())?;
    meta.skills_proposal_block = Some(serde_json::to_value(&parsed).map_err(|e| e.to_string())?);
    meta.wizard_stage = WizardStage::SkillsTailorReview;
    Ok(())
}

/// Applies the pending skills proposal, truncating any item over the
/// per-item hard limit (§4.4) rather than rejecting the whole proposal —
/// there is no `skills_tailor_feedback` substage to loop the user through,
/// unlike [`super::work::tailor_accept`]'s bullet-level retry.
pub fn tailor_accept(cv: &mut CvData, meta: &mut Metadata) -> Result<(), String> {
    let Some(block) = meta.skills_proposal_block.take() else {
        return Err("no pending skills proposal to accept".to_string());
    };
    let mut parsed: SkillsTailorResponse = serde_json::from_value(block).map_err(|e| e.to_string())?;

    let limit = skills_item_limit(meta.target_language.as_deref());
    truncate_items_to_limit(&mut parsed.it_ai_skills, limit);
    truncate_items_to_limit(&mut parsed.technical_operational_skills, limit);

    cv.it_ai_skills = parsed.it_ai_skills;
    cv.technical_operational_skills = parsed.technical_operational_skills;
    meta.wizard_stage = WizardStage::ReviewFinal;
    Ok(())
}
