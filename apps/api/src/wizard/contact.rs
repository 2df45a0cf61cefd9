//! Contact family (§4.5 Profile import / contact substages). Grounded on
//! `action_dispatch_contact.py`: language selection sets both the modern
//! `target_language` and a legacy `language` mirror, contact confirm
//! requires all three fields non-empty and is idempotent on `confirmed_at`.

use serde_json::Value;

use crate::guards::contact_confirmable;
use crate::models::{CvData, Metadata, WizardStage};

pub fn select_language(cv: &CvData, meta: &mut Metadata, language: &str) {
    meta.target_language = Some(language.to_string());
    meta.source_language = Some(language.to_string());

    let has_work_or_education = !cv.work_experience.is_empty() || !cv.education.is_empty();
    if meta.docx_prefill_unconfirmed.is_some() && !has_work_or_education {
        meta.wizard_stage = WizardStage::ImportGatePending;
    } else {
        meta.wizard_stage = WizardStage::Contact;
    }
}

pub fn edit(meta: &mut Metadata) {
    meta.wizard_stage = WizardStage::ContactEdit;
}

pub fn cancel(meta: &mut Metadata) {
    meta.wizard_stage = WizardStage::Contact;
}

pub fn save(cv: &mut CvData, meta: &mut Metadata, payload: Option<&Value>) {
    if let Some(payload) = payload {
        if let Some(v) = payload.get("full_name").and_then(Value::as_str) {
            cv.full_name = v.to_string();
        }
        if let Some(v) = payload.get("email").and_then(Value::as_str) {
            cv.email = v.to_string();
        }
        if let Some(v) = payload.get("phone").and_then(Value::as_str) {
            cv.phone = v.to_string();
        }
        if let Some(lines) = payload.get("address_lines").and_then(Value::as_array) {
            cv.address_lines = lines.iter().filter_map(Value::as_str).map(String::from).collect();
        }
    }
    meta.wizard_stage = WizardStage::Contact;
}

/// `CONTACT_CONFIRM` (§3 invariant 3). Idempotent: a pre-existing
/// `confirmed_at` timestamp is never overwritten.
pub fn confirm(cv: &CvData, meta: &mut Metadata) -> Result<(), &'static str> {
    if !contact_confirmable(cv) {
        return Err("full_name, email, and phone are all required before confirming contact");
    }
    meta.confirmed_flags.contact_confirmed = true;
    if meta.confirmed_flags.confirmed_at.is_none() {
        meta.confirmed_flags.confirmed_at = Some(chrono::Utc::now());
    }
    meta.wizard_stage = WizardStage::Education;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_select_routes_to_import_gate_when_prefill_unconfirmed_and_empty() {
        let cv = CvData::default();
        let mut meta = Metadata::default();
        meta.docx_prefill_unconfirmed = Some(serde_json::json!({"full_name": "Jane"}));
        select_language(&cv, &mut meta, "de");
        assert_eq!(meta.wizard_stage, WizardStage::ImportGatePending);
        assert_eq!(meta.target_language.as_deref(), Some("de"));
        assert_eq!(meta.source_language.as_deref(), Some("de"));
    }

    #[test]
    fn language_select_routes_to_contact_when_no_prefill() {
        let cv = CvData::default();
        let mut meta = Metadata::default();
        select_language(&cv, &mut meta, "en");
        assert_eq!(meta.wizard_stage, WizardStage::Contact);
    }

    #[test]
    fn confirm_requires_all_fields() {
        let cv = CvData::default();
        let mut meta = Metadata::default();
        assert!(confirm(&cv, &mut meta).is_err());
    }

    #[test]
    fn confirm_is_idempotent_on_confirmed_at() {
        let mut cv = CvData::default();
        cv.full_name = "Jane".to_string();
        cv.email = "j@example.com".to_string();
        cv.phone = "+1 555".to_string();
        let mut meta = Metadata::default();
        confirm(&cv, &mut meta).unwrap();
        let first_ts = meta.confirmed_flags.confirmed_at;
        confirm(&cv, &mut meta).unwrap();
        assert_eq!(meta.confirmed_flags.confirmed_at, first_ts);
    }
}
