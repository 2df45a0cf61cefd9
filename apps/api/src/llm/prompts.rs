#![allow(dead_code)]

//! Shared prompt constants and prompt-building fragments. Each wizard
//! family that calls the LLM gateway composes its own user_text from the
//! context pack plus these cross-cutting fragments.

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You are a precise, structured assistant. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// "No-invention" grounding instruction, enforced deterministically by C4
/// afterward — this is belt-and-suspenders, not the actual guard.
pub const GROUNDING_INSTRUCTION: &str = "\
    CRITICAL: Every bullet you produce must be grounded in the CURRENT_WORK_EXPERIENCE, \
    TAILORING_SUGGESTIONS, or TAILORING_FEEDBACK blocks given below. \
    Do NOT invent employers, titles, dates, technologies, or achievements that are not \
    present in those blocks. If you cannot support a claim, omit it.";

/// Hard-limit reminder, mirrored by the deterministic validator in C4.
pub const HARD_LIMIT_INSTRUCTION: &str = "\
    CRITICAL: Respect the character limits given for each field. Prefer a shorter, \
    accurate bullet over a longer invented one. Do not pad to fill space.";

/// Appended to a retry prompt when the previous attempt failed validation.
pub fn violation_feedback(bullet_violations: &[String], invention_violations: &[String]) -> String {
    let mut out = String::new();
    if !bullet_violations.is_empty() {
        out.push_str("FIX_VALIDATION: the following bullets exceeded the hard character limit and must be shortened without losing meaning: ");
        out.push_str(&bullet_violations.join("; "));
        out.push('\n');
    }
    if !invention_violations.is_empty() {
        out.push_str("E0_POLICY_ERRORS: the following bullets contain ungrounded claims and must be rewritten using only the provided source material: ");
        out.push_str(&invention_violations.join("; "));
        out.push('\n');
    }
    out
}

pub const SCHEMA_REPAIR_INSTRUCTION: &str = "\
    Your previous response could not be parsed as valid JSON matching the required schema. \
    Return ONLY the corrected JSON object, with no prose and no markdown fences.";

pub const JOB_REFERENCE_SCHEMA_SYSTEM: &str = "\
    Extract a structured job reference from the posting text below. Respond with JSON: \
    {title, company, seniority, must_haves: [string], nice_to_haves: [string], language}.";

pub const WORK_TAILOR_SYSTEM: &str = "\
    Tailor the candidate's work experience bullets to the job reference and notes provided. \
    Respond with JSON: {roles: [{title, employer, date_range, location, bullets: [string]}]}.";

pub const SKILLS_TAILOR_SYSTEM: &str = "\
    Rank and tailor the candidate's skills to the job reference and notes provided. \
    Respond with JSON: {it_ai_skills: [string], technical_operational_skills: [string]}.";

pub const COVER_LETTER_SYSTEM: &str = "\
    Draft a one-page cover letter body in the target language using only the provided CV \
    content and job reference. Respond with JSON: {paragraphs: [string]}.";

/// Bulk translation (§4.3, §9 Open Questions): translates the free-text
/// surface of a CV into the locked target language in a single call,
/// leaving contact fields and structural data (dates, employer names)
/// untouched. Respond shape mirrors `BulkTranslationPayload`.
pub const BULK_TRANSLATION_SYSTEM: &str = "\
    Translate the following CV content into the requested target language. \
    Preserve meaning exactly; do not add, remove, or invent content; do not translate \
    employer names, dates, or proper nouns. Respond with JSON: \
    {profile, work_experience: [{bullets: [string]}], education: [{details: [string]}], \
    further_experience: [string], it_ai_skills: [string], \
    technical_operational_skills: [string], languages: [string], interests, references}.";
