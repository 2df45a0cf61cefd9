//! `WIZARD_GOTO_STAGE` backward-only navigation. Grounded on
//! `action_dispatch_navigation.py`'s `_major()` stage-ranking function: a
//! jump is only honored if its rank is <= the current stage's rank.

use crate::models::WizardStage;

fn major(stage: WizardStage) -> u8 {
    use WizardStage::*;
    match stage {
        LanguageSelection | ImportGatePending => 0,
        Contact | ContactEdit => 1,
        Education | EducationEdit => 2,
        JobPosting | JobPostingPaste => 3,
        WorkExperience | WorkNotesEdit | WorkTailorReview | WorkTailorFeedback => 4,
        ItAiSkills | SkillsNotesEdit | SkillsTailorReview => 5,
        ReviewFinal | CoverLetterReview => 6,
        Done => 7,
    }
}

/// Resolves a `WIZARD_GOTO_STAGE { target }` request against `current`.
/// Forward jumps (target rank > current rank) are refused and the current
/// stage is returned unchanged.
pub fn resolve_goto(current: WizardStage, target: WizardStage) -> WizardStage {
    if major(target) <= major(current) {
        target
    } else {
        current
    }
}
