//! Education family, mirroring the contact family's edit/save/cancel/confirm
//! shape (`action_dispatch_education.py`'s sibling structure is inferred
//! from the contact dispatcher, which the original source documents
//! explicitly as the template every other section substage follows).

use serde_json::Value;

use crate::models::{CvData, EducationEntry, Metadata, WizardStage};

pub fn edit(meta: &mut Metadata) {
    meta.wizard_stage = WizardStage::EducationEdit;
}

pub fn cancel(meta: &mut Metadata) {
    meta.wizard_stage = WizardStage::Education;
}

pub fn save(cv: &mut CvData, meta: &mut Metadata, payload: Option<&Value>) {
    if let Some(payload) = payload {
        if let Some(entries) = payload.get("education").and_then(Value::as_array) {
            cv.education = entries
                .iter()
                .filter_map(|v| serde_json::from_value::<EducationEntry>(v.clone()).ok())
                .collect();
        }
    }
    meta.wizard_stage = WizardStage::Education;
}

pub fn confirm(cv: &CvData, meta: &mut Metadata) -> Result<(), &'static str> {
    if cv.education.is_empty() {
        return Err("at least one education entry is required before confirming");
    }
    meta.confirmed_flags.education_confirmed = true;
    meta.wizard_stage = WizardStage::JobPosting;
    Ok(())
}
