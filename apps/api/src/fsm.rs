//! Pure FSM resolver (C2). Ported from the original implementation's
//! `cv_fsm.py`: a single deterministic function with no side effects and no
//! hidden state, so it is trivially unit-testable (§8 property 2, FSM
//! purity).

use crate::models::Stage;

/// Flags the wizard derives from the current session and turn before
/// calling `resolve`. Kept as a plain struct (not read from the session
/// directly) so the function stays pure and the test suite can construct
/// arbitrary combinations cheaply.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionFlags {
    pub confirmation_required: bool,
    pub user_confirm_yes: bool,
    pub user_confirm_no: bool,
    pub turns_in_review: u32,
    pub generate_requested: bool,
    pub pending_edits: u32,
    pub pdf_generated: bool,
    pub pdf_failed: bool,
    /// Supplemental relaxed gate, see §4.2: true when the validator is
    /// highly confident the CV is generation-ready even if `readiness_ok`
    /// alone would not pass.
    pub high_confidence: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationFlags {
    pub validation_passed: bool,
    pub readiness_ok: bool,
}

const EDIT_INTENT_EN: &[&str] = &["change", "edit", "update", "modify", "fix", "revise", "adjust"];
const EDIT_INTENT_DE: &[&str] = &["ändern", "bearbeiten", "aktualisieren", "korrigieren"];
const EDIT_INTENT_PL: &[&str] = &[
    "zmień", "popraw", "cofnij", "dodaj", "usuń", "jednak", "nie tak", "inaczej",
];

/// Returns the edit-intent keyword set active for `language`. Unknown
/// languages fall back to English; German and Polish additionally extend
/// (not replace) the English set, matching the spec's "active language
/// set" wording and the precedent of German/Polish being additive
/// elsewhere (e.g. HARD_LIMIT scaling).
fn edit_intent_keywords(language: Option<&str>) -> Vec<&'static str> {
    let mut keywords: Vec<&'static str> = EDIT_INTENT_EN.to_vec();
    match language {
        Some("de") => keywords.extend_from_slice(EDIT_INTENT_DE),
        Some("pl") => keywords.extend_from_slice(EDIT_INTENT_PL),
        _ => {}
    }
    keywords
}

fn contains_edit_intent(user_message: &str, language: Option<&str>) -> bool {
    let lowered = user_message.to_lowercase();
    edit_intent_keywords(language)
        .iter()
        .any(|kw| lowered.contains(kw))
}

/// Pure function `resolve(stage, msg, flags) -> next_stage`. See §4.2 for
/// the full precedence table.
pub fn resolve(
    current_stage: Stage,
    user_message: &str,
    language: Option<&str>,
    flags: SessionFlags,
    validation: ValidationFlags,
) -> Stage {
    // Rule 1: edit-intent override beats everything except being re-checked
    // against DONE stickiness, which it itself overrides.
    if contains_edit_intent(user_message, language) {
        return Stage::Review;
    }

    match current_stage {
        // Rule 2: DONE is sticky unless rule 1 fired (handled above).
        Stage::Done => Stage::Done,

        // Rule 3.
        Stage::Ingest => Stage::Prepare,

        // Rule 4.
        Stage::Prepare => {
            if flags.confirmation_required {
                Stage::Review
            } else {
                Stage::Prepare
            }
        }

        // Rule 5.
        Stage::Review => {
            if flags.user_confirm_yes {
                Stage::Confirm
            } else if flags.turns_in_review >= 3 {
                Stage::Confirm
            } else {
                Stage::Review
            }
        }

        // Rule 6, with the high-confidence supplemental gate.
        Stage::Confirm => {
            if flags.user_confirm_no {
                Stage::Review
            } else if flags.generate_requested
                && validation.validation_passed
                && validation.readiness_ok
                && flags.pending_edits == 0
            {
                Stage::Execute
            } else if flags.generate_requested && flags.high_confidence && flags.pending_edits == 0 {
                Stage::Execute
            } else {
                Stage::Review
            }
        }

        // Rule 7.
        Stage::Execute => {
            if flags.pdf_generated {
                Stage::Done
            } else if flags.pdf_failed {
                Stage::Review
            } else {
                Stage::Execute
            }
        }
    }
}
