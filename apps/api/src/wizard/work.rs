//! Work-tailoring protocol (§4.5.1). Grounded on
//! `action_dispatch_work_tailor_ai.py`'s `WORK_TAILOR_RUN` handler: a
//! proposal is generated against an input fingerprint so a repeat run with
//! unchanged inputs can be detected as a no-op retry (§8 property 8), and
//! any hard-limit or no-invention violation is fed back into a bounded
//! retry loop rather than surfaced raw to the user.

use sha2::{Digest, Sha256};

use crate::guards::{build_grounding_corpus, bullet_length_violations, no_invention_violations};
use crate::llm::{LlmGateway, SchemaCallParams, TraceCtx};
use crate::models::{CvData, Metadata, Role, WizardStage};

const MAX_TAILOR_ATTEMPTS: u32 = 3;
const MAX_ACCEPT_RETRY_ATTEMPTS: u32 = 2;

fn input_fingerprint(notes: &str, feedback: &str, job_sig: &str, roles: &[Role]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(notes.as_bytes());
    hasher.update(feedback.as_bytes());
    hasher.update(job_sig.as_bytes());
    for role in roles {
        hasher.update(role.title.as_bytes());
        for bullet in &role.bullets {
            hasher.update(bullet.as_bytes());
        }
    }
    hex::encode(hasher.finalize())
}

pub fn add_notes(meta: &mut Metadata) {
    meta.wizard_stage = WizardStage::WorkNotesEdit;
}

pub fn save_notes(meta: &mut Metadata, notes: &str) {
    meta.work_tailoring_notes = Some(notes.to_string());
    meta.wizard_stage = WizardStage::WorkExperience;
}

pub fn cancel_notes(meta: &mut Metadata) {
    meta.wizard_stage = WizardStage::WorkExperience;
}

#[derive(Debug, Clone, serde::Deserialize)]
struct TailorResponse {
    roles: Vec<Role>,
}

/// Runs the tailoring pass, retrying up to [`MAX_TAILOR_ATTEMPTS`] with
/// violation feedback appended to the prompt when the proposal breaches the
/// hard-limit or no-invention guards. If the input fingerprint is unchanged
/// since the last proposal, this is a no-op that re-surfaces the existing
/// proposal instead of spending another model call (§8 property 8).
pub async fn tailor_run(
    llm: &dyn LlmGateway,
    session_id: &str,
    trace_id: &str,
    cv: &CvData,
    meta: &mut Metadata,
) -> Result<(), String> {
    let job_sig = meta
        .job_reference
        .as_ref()
        .map(|j| format!("{}{}{}", j.title, j.company, j.must_haves.join(",")))
        .unwrap_or_default();
    let notes = meta.work_tailoring_notes.clone().unwrap_or_default();
    let feedback = meta.work_tailoring_feedback.clone().unwrap_or_default();
    let fingerprint = input_fingerprint(&notes, &feedback, &job_sig, &cv.work_experience);

    if meta.work_experience_proposal_input_sig.as_deref() == Some(fingerprint.as_str())
        && meta.work_experience_proposal_block.is_some()
    {
        meta.wizard_stage = WizardStage::WorkTailorReview;
        return Ok(());
    }

    let corpus = build_grounding_corpus(&cv.work_experience, Some(&notes), Some(&feedback));
    let mut violation_note = String::new();

    for attempt in 1..=MAX_TAILOR_ATTEMPTS {
        let user_text = format!(
            "CURRENT_WORK_EXPERIENCE:\n{:?}\n\nTAILORING_SUGGESTIONS:\n{notes}\n\nTAILORING_FEEDBACK:\n{feedback}\n\n{violation_note}",
            cv.work_experience
        );
        let params = SchemaCallParams {
            stage: "work_tailor".to_string(),
            system_prompt: crate::llm::prompts::WORK_TAILOR_SYSTEM.to_string(),
            user_text,
            trace: TraceCtx {
                session_id: session_id.to_string(),
                trace_id: format!("{trace_id}-{attempt}"),
            },
            max_output_tokens: 2048,
            is_bulk_translation: false,
            max_attempts: None,
        };

        let value = llm.call_schema_json(params).await.map_err(|e| e.to_string())?;
        let parsed: TailorResponse = serde_json::from_value(value).map_err(|e| e.to_string())?;

        let bullet_violations = bullet_length_violations(&parsed.roles, meta.target_language.as_deref());
        let invention_violations = no_invention_violations(&parsed.roles, &corpus);

        if bullet_violations.is_empty() && invention_violations.is_empty() {
            meta.work_experience_proposal_block = Some(serde_json::to_value(&parsed.roles).map_err(|e| e.to_string())?);
            meta.work_experience_proposal_input_sig = Some(fingerprint);
            meta.wizard_stage = WizardStage::WorkTailorReview;
            return Ok(());
        }

        if attempt == MAX_TAILOR_ATTEMPTS {
            // Out of attempts: surface the best (still-violating) proposal
            // rather than blocking the user entirely; the review screen
            // shows it for manual fixup.
            meta.work_experience_proposal_block = Some(serde_json::to_value(&parsed.roles).map_err(|e| e.to_string())?);
            meta.work_experience_proposal_input_sig = Some(fingerprint);
            meta.wizard_stage = WizardStage::WorkTailorReview;
            return Ok(());
        }

        let bullet_strs: Vec<String> = bullet_violations.iter().map(|v| v.text.clone()).collect();
        let invention_strs: Vec<String> = invention_violations
            .iter()
            .map(|v| v.ungrounded_tokens.join(", "))
            .collect();
        violation_note = crate::llm::prompts::violation_feedback(&bullet_strs, &invention_strs);
    }

    Ok(())
}

/// `WORK_TAILOR_ACCEPT`: re-runs the hard-limit guard against the stored
/// proposal and, if it still violates, the applied CV (§4.5.1, §3
/// invariant 6) before committing it into `cv_data.work_experience`. A
/// violation does not fail the turn outright: the orchestrator first runs
/// a bounded silent retry (≤[`MAX_ACCEPT_RETRY_ATTEMPTS`] attempts) against
/// the gateway with a violation-focused prompt, matching §4.5.1's "bounded
/// silent-retry (≤2 attempts) with a violation-focused prompt before
/// surfacing an error". Only once retries are exhausted does a violation
/// surface — the never-truncate rule (§7) forbids silently shortening a
/// proposal, so `cv_data` is left untouched and the stage drops to
/// `work_tailor_feedback` so the user can steer a re-run. Backfills any
/// proposed role missing a location from the previous CV snapshot,
/// matching the same role by (title, employer) (§4.5.1).
pub async fn tailor_accept(
    llm: &dyn LlmGateway,
    session_id: &str,
    trace_id: &str,
    cv: &mut CvData,
    meta: &mut Metadata,
) -> Result<(), String> {
    let Some(block) = meta.work_experience_proposal_block.take() else {
        return Err("no pending work experience proposal to accept".to_string());
    };
    let mut roles: Vec<Role> = match serde_json::from_value(block.clone()) {
        Ok(roles) => roles,
        Err(e) => {
            meta.work_experience_proposal_block = Some(block);
            return Err(e.to_string());
        }
    };

    let mut violations = bullet_length_violations(&roles, meta.target_language.as_deref());

    if !violations.is_empty() {
        let notes = meta.work_tailoring_notes.clone().unwrap_or_default();
        let feedback = meta.work_tailoring_feedback.clone().unwrap_or_default();
        let corpus = build_grounding_corpus(&cv.work_experience, Some(&notes), Some(&feedback));

        for attempt in 1..=MAX_ACCEPT_RETRY_ATTEMPTS {
            let bullet_strs: Vec<String> = violations.iter().map(|v| v.text.clone()).collect();
            let violation_note = crate::llm::prompts::violation_feedback(&bullet_strs, &[]);
            let user_text = format!(
                "CURRENT_WORK_EXPERIENCE:\n{roles:?}\n\nTAILORING_SUGGESTIONS:\n{notes}\n\nTAILORING_FEEDBACK:\n{feedback}\n\n{violation_note}"
            );
            let params = SchemaCallParams {
                stage: "work_tailor".to_string(),
                system_prompt: crate::llm::prompts::WORK_TAILOR_SYSTEM.to_string(),
                user_text,
                trace: TraceCtx {
                    session_id: session_id.to_string(),
                    trace_id: format!("{trace_id}-accept-retry-{attempt}"),
                },
                max_output_tokens: 2048,
                is_bulk_translation: false,
                max_attempts: None,
            };

            let Ok(value) = llm.call_schema_json(params).await else {
                // Silent retry is best-effort: a gateway failure here just
                // exhausts the retry budget, it does not change the error
                // the caller ultimately sees.
                break;
            };
            let Ok(parsed) = serde_json::from_value::<TailorResponse>(value) else {
                break;
            };

            let retried_bullet_violations =
                bullet_length_violations(&parsed.roles, meta.target_language.as_deref());
            let retried_invention_violations = no_invention_violations(&parsed.roles, &corpus);
            roles = parsed.roles;

            if retried_bullet_violations.is_empty() && retried_invention_violations.is_empty() {
                violations = Vec::new();
                break;
            }
            violations = retried_bullet_violations;
        }
    }

    if !violations.is_empty() {
        meta.work_experience_proposal_block = Some(serde_json::to_value(&roles).map_err(|e| e.to_string())?);
        meta.wizard_stage = WizardStage::WorkTailorFeedback;
        return Err(format!(
            "{} bullet(s) exceed the hard character limit for this language after retrying; regenerate or edit before accepting",
            violations.len()
        ));
    }

    for role in &mut roles {
        if role.location.trim().is_empty() {
            if let Some(prev) = cv
                .work_experience
                .iter()
                .find(|r| r.title == role.title && r.employer == role.employer)
            {
                role.location = prev.location.clone();
            }
        }
    }

    cv.work_experience = roles;
    meta.work_experience_proposal_input_sig = None;
    meta.wizard_stage = WizardStage::ItAiSkills;
    Ok(())
}

pub fn tailor_feedback(meta: &mut Metadata, feedback: &str) {
    meta.work_tailoring_feedback = Some(feedback.to_string());
    meta.wizard_stage = WizardStage::WorkTailorFeedback;
}

pub fn confirm_stage(meta: &mut Metadata) {
    meta.wizard_stage = WizardStage::ItAiSkills;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::fake::ScriptedLlmGateway;

    #[tokio::test]
    async fn repeat_tailor_run_with_unchanged_inputs_makes_at_most_one_llm_call() {
        let roles = serde_json::json!({ "roles": [{
            "title": "Engineer", "employer": "Acme", "date_range": "2020-2022",
            "location": "Berlin", "bullets": ["Did a thing"]
        }]});
        let llm = ScriptedLlmGateway::with_responses(vec![roles]);
        let mut cv = CvData::default();
        cv.work_experience.push(Role { title: "Eng".to_string(), bullets: vec!["did things".to_string()], ..Default::default() });
        let mut meta = Metadata::default();

        tailor_run(&llm, "session-1", "trace-1", &cv, &mut meta).await.unwrap();
        assert_eq!(llm.call_count().await, 1);
        assert_eq!(meta.wizard_stage, WizardStage::WorkTailorReview);

        // Second run: identical cv/notes/feedback/job fingerprint and an
        // existing proposal block short-circuits before ever calling the
        // gateway again (§8 property 8).
        tailor_run(&llm, "session-1", "trace-1", &cv, &mut meta).await.unwrap();
        assert_eq!(llm.call_count().await, 1, "unchanged inputs must not trigger a second model call");
    }

    #[test]
    fn fingerprint_is_stable_for_identical_inputs() {
        let roles = vec![Role { title: "Eng".to_string(), ..Default::default() }];
        let a = input_fingerprint("notes", "", "sig", &roles);
        let b = input_fingerprint("notes", "", "sig", &roles);
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_changes_when_notes_change() {
        let roles = vec![Role { title: "Eng".to_string(), ..Default::default() }];
        let a = input_fingerprint("notes", "", "sig", &roles);
        let b = input_fingerprint("different notes", "", "sig", &roles);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn accept_requires_pending_proposal() {
        let mut cv = CvData::default();
        let mut meta = Metadata::default();
        let llm = ScriptedLlmGateway::with_responses(vec![]);
        assert!(tailor_accept(&llm, "session-1", "trace-1", &mut cv, &mut meta).await.is_err());
    }

    #[tokio::test]
    async fn accept_commits_proposal_and_clears_block() {
        let mut cv = CvData::default();
        let mut meta = Metadata::default();
        let roles = vec![Role { title: "Engineer".to_string(), bullets: vec!["Did a thing".to_string()], ..Default::default() }];
        meta.work_experience_proposal_block = Some(serde_json::to_value(&roles).unwrap());
        let llm = ScriptedLlmGateway::with_responses(vec![]);
        tailor_accept(&llm, "session-1", "trace-1", &mut cv, &mut meta).await.unwrap();
        assert_eq!(cv.work_experience.len(), 1);
        assert!(meta.work_experience_proposal_block.is_none());
        assert_eq!(meta.wizard_stage, WizardStage::ItAiSkills);
        assert_eq!(llm.call_count().await, 0, "a clean proposal must not spend a retry call");
    }

    #[tokio::test]
    async fn accept_rejects_proposal_violating_hard_limit_after_exhausting_silent_retries() {
        let mut cv = CvData::default();
        cv.work_experience.push(Role { title: "Existing".to_string(), ..Default::default() });
        let mut meta = Metadata::default();
        meta.target_language = Some("en".to_string());
        let over_limit = "x".repeat(230);
        let roles = vec![Role { title: "Engineer".to_string(), bullets: vec![over_limit.clone()], ..Default::default() }];
        meta.work_experience_proposal_block = Some(serde_json::to_value(&roles).unwrap());

        // Both silent-retry attempts come back still violating the limit.
        let retry_response = serde_json::json!({ "roles": [{
            "title": "Engineer", "employer": "", "date_range": "", "location": "",
            "bullets": [over_limit]
        }]});
        let llm = ScriptedLlmGateway::with_responses(vec![retry_response.clone(), retry_response]);

        let result = tailor_accept(&llm, "session-1", "trace-1", &mut cv, &mut meta).await;

        assert!(result.is_err());
        assert_eq!(llm.call_count().await, 2, "must exhaust both bounded silent-retry attempts");
        assert_eq!(cv.work_experience.len(), 1, "cv_data must not be modified on violation");
        assert_eq!(cv.work_experience[0].title, "Existing");
        assert_eq!(meta.wizard_stage, WizardStage::WorkTailorFeedback);
        assert!(meta.work_experience_proposal_block.is_some(), "proposal stays staged for fixup");
    }

    #[tokio::test]
    async fn accept_silent_retry_recovers_and_commits() {
        let mut cv = CvData::default();
        cv.work_experience.push(Role { title: "Existing".to_string(), ..Default::default() });
        let mut meta = Metadata::default();
        meta.target_language = Some("en".to_string());
        let over_limit = "x".repeat(230);
        let roles = vec![Role { title: "Engineer".to_string(), bullets: vec![over_limit], ..Default::default() }];
        meta.work_experience_proposal_block = Some(serde_json::to_value(&roles).unwrap());

        // First silent retry comes back within the limit.
        let fixed_response = serde_json::json!({ "roles": [{
            "title": "Engineer", "employer": "Acme", "date_range": "2020-2022",
            "location": "Berlin", "bullets": ["Shipped a thing"]
        }]});
        let llm = ScriptedLlmGateway::with_responses(vec![fixed_response]);

        tailor_accept(&llm, "session-1", "trace-1", &mut cv, &mut meta).await.unwrap();

        assert_eq!(llm.call_count().await, 1);
        assert_eq!(cv.work_experience.len(), 1);
        assert_eq!(cv.work_experience[0].bullets, vec!["Shipped a thing".to_string()]);
        assert_eq!(meta.wizard_stage, WizardStage::ItAiSkills);
    }

    #[tokio::test]
    async fn accept_backfills_missing_location_from_previous_snapshot() {
        let mut cv = CvData::default();
        cv.work_experience.push(Role {
            title: "Engineer".to_string(),
            employer: "Acme".to_string(),
            location: "Berlin".to_string(),
            ..Default::default()
        });
        let mut meta = Metadata::default();
        let roles = vec![Role {
            title: "Engineer".to_string(),
            employer: "Acme".to_string(),
            location: String::new(),
            bullets: vec!["Did a thing".to_string()],
            ..Default::default()
        }];
        meta.work_experience_proposal_block = Some(serde_json::to_value(&roles).unwrap());
        let llm = ScriptedLlmGateway::with_responses(vec![]);

        tailor_accept(&llm, "session-1", "trace-1", &mut cv, &mut meta).await.unwrap();

        assert_eq!(cv.work_experience[0].location, "Berlin");
    }
}
