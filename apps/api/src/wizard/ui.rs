//! Wizard UI action contract (§9): the master list of action ids is the
//! single source of truth both the UI builder and the dispatcher consume,
//! so the two can never drift apart (§8 property 6, "no ghost actions").

use crate::models::{UiAction, UiActionButton, UiField, WizardStage};

/// Every action id the dispatcher (`wizard::dispatch`) knows how to handle.
/// `build_ui_action` below only ever emits ids from this list; the
/// no-ghost-actions test asserts the reverse too.
pub const ALL_ACTION_IDS: &[&str] = &[
    "LANGUAGE_SELECT_EN",
    "LANGUAGE_SELECT_DE",
    "LANGUAGE_SELECT_PL",
    "CONFIRM_IMPORT_PREFILL_YES",
    "CONFIRM_IMPORT_PREFILL_NO",
    "CONTACT_EDIT",
    "CONTACT_SAVE",
    "CONTACT_CANCEL",
    "CONTACT_CONFIRM",
    "EDUCATION_EDIT_JSON",
    "EDUCATION_SAVE",
    "EDUCATION_CANCEL",
    "EDUCATION_CONFIRM",
    "JOB_OFFER_PASTE",
    "JOB_OFFER_ANALYZE",
    "JOB_OFFER_CANCEL",
    "JOB_OFFER_SKIP",
    "WORK_ADD_TAILORING_NOTES",
    "WORK_NOTES_SAVE",
    "WORK_NOTES_CANCEL",
    "WORK_TAILOR_RUN",
    "WORK_TAILOR_ACCEPT",
    "WORK_TAILOR_FEEDBACK",
    "WORK_LOCATIONS_EDIT",
    "WORK_LOCATIONS_SAVE",
    "WORK_SELECT_ROLE",
    "WORK_CONFIRM_STAGE",
    "SKILLS_ADD_NOTES",
    "SKILLS_NOTES_SAVE",
    "SKILLS_NOTES_CANCEL",
    "SKILLS_TAILOR_RUN",
    "SKILLS_TAILOR_SKIP",
    "SKILLS_TAILOR_ACCEPT",
    "REQUEST_GENERATE_PDF",
    "DOWNLOAD_PDF",
    "COVER_LETTER_PREVIEW",
    "COVER_LETTER_GENERATE",
    "COVER_LETTER_BACK",
    "WIZARD_GOTO_STAGE",
];

pub fn is_known_action(id: &str) -> bool {
    ALL_ACTION_IDS.contains(&id)
}

fn button(id: &str, label: &str) -> UiActionButton {
    UiActionButton {
        id: id.to_string(),
        label: label.to_string(),
        style: None,
    }
}

/// Builds the `ui_action` payload for `stage` (§6). Every button emitted
/// here carries an id from [`ALL_ACTION_IDS`].
pub fn build_ui_action(stage: WizardStage) -> UiAction {
    match stage {
        WizardStage::LanguageSelection => UiAction {
            title: "Choose a language".to_string(),
            actions: vec![
                button("LANGUAGE_SELECT_EN", "English"),
                button("LANGUAGE_SELECT_DE", "Deutsch"),
                button("LANGUAGE_SELECT_PL", "Polski"),
            ],
            fields: None,
        },
        WizardStage::ImportGatePending => UiAction {
            title: "Use the details found in your uploaded document?".to_string(),
            actions: vec![
                button("CONFIRM_IMPORT_PREFILL_YES", "Yes, use them"),
                button("CONFIRM_IMPORT_PREFILL_NO", "No, start blank"),
            ],
            fields: None,
        },
        WizardStage::Contact => UiAction {
            title: "Confirm your contact details".to_string(),
            actions: vec![button("CONTACT_EDIT", "Edit"), button("CONTACT_CONFIRM", "Confirm")],
            fields: None,
        },
        WizardStage::ContactEdit => UiAction {
            title: "Edit contact details".to_string(),
            actions: vec![button("CONTACT_SAVE", "Save"), button("CONTACT_CANCEL", "Cancel")],
            fields: Some(vec![
                UiField { name: "full_name".to_string(), field_type: "text".to_string(), value: None },
                UiField { name: "email".to_string(), field_type: "text".to_string(), value: None },
                UiField { name: "phone".to_string(), field_type: "text".to_string(), value: None },
            ]),
        },
        WizardStage::Education => UiAction {
            title: "Confirm your education".to_string(),
            actions: vec![button("EDUCATION_EDIT_JSON", "Edit"), button("EDUCATION_CONFIRM", "Confirm")],
            fields: None,
        },
        WizardStage::EducationEdit => UiAction {
            title: "Edit education".to_string(),
            actions: vec![button("EDUCATION_SAVE", "Save"), button("EDUCATION_CANCEL", "Cancel")],
            fields: Some(vec![UiField { name: "education_json".to_string(), field_type: "json".to_string(), value: None }]),
        },
        WizardStage::JobPosting => UiAction {
            title: "Paste the job posting you're tailoring for".to_string(),
            actions: vec![button("JOB_OFFER_PASTE", "Paste text"), button("JOB_OFFER_SKIP", "Skip")],
            fields: None,
        },
        WizardStage::JobPostingPaste => UiAction {
            title: "Job posting".to_string(),
            actions: vec![button("JOB_OFFER_ANALYZE", "Analyze"), button("JOB_OFFER_CANCEL", "Cancel")],
            fields: Some(vec![UiField { name: "job_posting_text".to_string(), field_type: "textarea".to_string(), value: None }]),
        },
        WizardStage::WorkExperience => UiAction {
            title: "Tailor your work experience".to_string(),
            actions: vec![
                button("WORK_ADD_TAILORING_NOTES", "Add notes"),
                button("WORK_TAILOR_RUN", "Tailor with AI"),
                button("WORK_CONFIRM_STAGE", "Continue"),
            ],
            fields: None,
        },
        WizardStage::WorkNotesEdit => UiAction {
            title: "Notes for the tailoring pass".to_string(),
            actions: vec![button("WORK_NOTES_SAVE", "Save"), button("WORK_NOTES_CANCEL", "Cancel")],
            fields: Some(vec![UiField { name: "notes".to_string(), field_type: "textarea".to_string(), value: None }]),
        },
        WizardStage::WorkTailorReview => UiAction {
            title: "Review the tailored bullets".to_string(),
            actions: vec![
                button("WORK_TAILOR_ACCEPT", "Accept"),
                button("WORK_TAILOR_FEEDBACK", "Give feedback"),
                button("WORK_LOCATIONS_EDIT", "Fix locations"),
            ],
            fields: None,
        },
        WizardStage::WorkTailorFeedback => UiAction {
            title: "What should change?".to_string(),
            actions: vec![button("WORK_TAILOR_RUN", "Retry with feedback")],
            fields: Some(vec![UiField { name: "feedback".to_string(), field_type: "textarea".to_string(), value: None }]),
        },
        WizardStage::ItAiSkills => UiAction {
            title: "Tailor your skills".to_string(),
            actions: vec![
                button("SKILLS_ADD_NOTES", "Add notes"),
                button("SKILLS_TAILOR_RUN", "Tailor with AI"),
                button("SKILLS_TAILOR_SKIP", "Skip"),
            ],
            fields: None,
        },
        WizardStage::SkillsNotesEdit => UiAction {
            title: "Notes for skills tailoring".to_string(),
            actions: vec![button("SKILLS_NOTES_SAVE", "Save"), button("SKILLS_NOTES_CANCEL", "Cancel")],
            fields: Some(vec![UiField { name: "notes".to_string(), field_type: "textarea".to_string(), value: None }]),
        },
        WizardStage::SkillsTailorReview => UiAction {
            title: "Review tailored skills".to_string(),
            actions: vec![button("SKILLS_TAILOR_ACCEPT", "Accept")],
            fields: None,
        },
        WizardStage::ReviewFinal => UiAction {
            title: "Ready to generate your CV".to_string(),
            actions: vec![
                button("REQUEST_GENERATE_PDF", "Generate PDF"),
                button("COVER_LETTER_PREVIEW", "Add cover letter"),
            ],
            fields: None,
        },
        WizardStage::CoverLetterReview => UiAction {
            title: "Review your cover letter".to_string(),
            actions: vec![
                button("COVER_LETTER_GENERATE", "Regenerate"),
                button("COVER_LETTER_BACK", "Back"),
                button("REQUEST_GENERATE_PDF", "Generate PDF"),
            ],
            fields: None,
        },
        WizardStage::Done => UiAction {
            title: "Your CV is ready".to_string(),
            actions: vec![button("DOWNLOAD_PDF", "Download"), button("WIZARD_GOTO_STAGE", "Make changes")],
            fields: None,
        },
    }
}
