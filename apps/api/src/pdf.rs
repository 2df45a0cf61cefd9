//! PDF renderer boundary (§4.5.2, §1 Non-goals: document layout heuristics
//! and template HTML/CSS are out of scope). Modeled as a trait object,
//! generalizing the teacher's `Arc<dyn FitScorer>` pluggable-backend
//! pattern (`generation/fit_scoring.rs`) to a pluggable rendering backend.
//! The default implementation produces a deterministic, schema-conformant
//! byte stream sufficient to exercise the idempotency latch (§8 property 7)
//! and the two-page contract, without attempting real typography — a real
//! renderer (e.g. one driving the teacher's `layout` simulator) is a drop-in
//! replacement behind the same trait.

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::models::CvData;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Cv,
    CoverLetter,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Cv => "cv",
            DocumentKind::CoverLetter => "cover_letter",
        }
    }
}

#[derive(Debug, Serialize)]
struct CvRenderModel<'a> {
    full_name: &'a str,
    email: &'a str,
    phone: &'a str,
    profile: &'a str,
    work_experience: &'a [crate::models::Role],
    education: &'a [crate::models::EducationEntry],
    it_ai_skills: &'a [String],
    technical_operational_skills: &'a [String],
    languages: &'a [String],
}

#[async_trait]
pub trait PdfRenderer: Send + Sync {
    /// Renders `cv` to a two-page PDF byte stream. Enforcing the two-page
    /// contract is this trait's responsibility per §4.5.2; callers never
    /// attempt to measure or re-flow content themselves.
    async fn render_cv(&self, cv: &CvData, target_language: &str) -> anyhow::Result<Vec<u8>>;

    /// Renders a one-page cover letter from its accepted paragraph draft.
    async fn render_cover_letter(&self, full_name: &str, paragraphs: &[String], target_language: &str) -> anyhow::Result<Vec<u8>>;
}

/// Deterministic stand-in renderer: serializes a render model to a stable
/// byte layout wrapped in a minimal PDF-like envelope. Byte-for-byte
/// identical inputs always produce byte-for-byte identical output, which is
/// exactly what the idempotency latch test (§8 property 7) checks.
pub struct DefaultPdfRenderer;

fn wrap_pdf_envelope(kind: DocumentKind, page_count: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 64);
    out.extend_from_slice(b"%PDF-1.7\n");
    out.extend_from_slice(format!("% kind={} pages={}\n", kind.as_str(), page_count).as_bytes());
    out.extend_from_slice(body);
    out.extend_from_slice(b"\n%%EOF\n");
    out
}

#[async_trait]
impl PdfRenderer for DefaultPdfRenderer {
    async fn render_cv(&self, cv: &CvData, target_language: &str) -> anyhow::Result<Vec<u8>> {
        let model = CvRenderModel {
            full_name: &cv.full_name,
            email: &cv.email,
            phone: &cv.phone,
            profile: &cv.profile,
            work_experience: &cv.work_experience,
            education: &cv.education,
            it_ai_skills: &cv.it_ai_skills,
            technical_operational_skills: &cv.technical_operational_skills,
            languages: &cv.languages,
        };
        let mut body = serde_json::to_vec(&model)?;
        body.extend_from_slice(format!("\nLANG:{target_language}").as_bytes());
        Ok(wrap_pdf_envelope(DocumentKind::Cv, 2, &body))
    }

    async fn render_cover_letter(&self, full_name: &str, paragraphs: &[String], target_language: &str) -> anyhow::Result<Vec<u8>> {
        let mut body = serde_json::to_vec(&serde_json::json!({
            "full_name": full_name,
            "paragraphs": paragraphs,
            "target_language": target_language,
        }))?;
        body.extend_from_slice(b"\nPAGE:1");
        Ok(wrap_pdf_envelope(DocumentKind::CoverLetter, 1, &body))
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Derives the deterministic download filename (§4.5.2):
/// `{full_name}_{target_language}_{kind}_{short_timestamp}.pdf`.
pub fn download_name(full_name: &str, target_language: &str, kind: DocumentKind, short_timestamp: &str) -> String {
    let slug: String = full_name
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    let slug = slug.trim_matches('_');
    let slug = if slug.is_empty() { "cv" } else { slug };
    format!("{slug}_{target_language}_{}_{short_timestamp}.pdf", kind.as_str())
}
