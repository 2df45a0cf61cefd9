//! Document extractor — external interface (§1: "Document extractor (DOCX →
//! prefill dict + photo bytes)" is listed as a collaborator, not the core).
//! Document-parsing heuristics are an explicit Non-goal, so this module
//! keeps the boundary thin: a trait so the wizard never depends on the
//! concrete format, plus a default implementation that is real enough to
//! exercise the prefill/photo flow (a DOCX is a zip of XML parts) without
//! attempting layout-aware heuristics.

use serde::{Deserialize, Serialize};

/// Best-effort structured prefill pulled from an uploaded DOCX, staged in
/// `metadata.docx_prefill_unconfirmed` until the user confirms the import
/// (§4.5 Profile import).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocxPrefill {
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub address_lines: Vec<String>,
    #[serde(default)]
    pub profile: String,
    #[serde(default)]
    pub work_experience: Vec<crate::models::Role>,
    #[serde(default)]
    pub education: Vec<crate::models::EducationEntry>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub it_ai_skills: Vec<String>,
    #[serde(default)]
    pub interests: String,
    #[serde(default)]
    pub references: String,
}

/// Derived counts surfaced to the client right after upload so the wizard
/// can explain what was found (§3 `prefill_summary`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefillSummary {
    pub has_name: bool,
    pub has_email: bool,
    pub has_phone: bool,
    pub work_experience_count: usize,
    pub education_count: usize,
    pub languages_count: usize,
    pub it_ai_skills_count: usize,
    pub interests_chars: usize,
}

impl PrefillSummary {
    pub fn from_prefill(p: &DocxPrefill) -> Self {
        PrefillSummary {
            has_name: !p.full_name.is_empty(),
            has_email: !p.email.is_empty(),
            has_phone: !p.phone.is_empty(),
            work_experience_count: p.work_experience.len(),
            education_count: p.education.len(),
            languages_count: p.languages.len(),
            it_ai_skills_count: p.it_ai_skills.len(),
            interests_chars: p.interests.chars().count(),
        }
    }
}

pub trait DocumentExtractor: Send + Sync {
    fn prefill_from_docx(&self, bytes: &[u8]) -> anyhow::Result<DocxPrefill>;
    /// Returns the bytes of the first embedded image found, if any.
    fn extract_first_photo(&self, bytes: &[u8]) -> anyhow::Result<Option<Vec<u8>>>;
}

/// Default extractor: reads `word/document.xml` out of the DOCX zip
/// container, strips markup to recover a flat run of paragraph text, then
/// applies a handful of regex-based field heuristics (email, phone, a
/// "first non-empty line is the name" guess). This is intentionally shallow
/// — see the module doc comment — the wizard tolerates a mostly-empty
/// prefill just fine since every field re-enters a confirm-before-use gate.
pub struct ZipDocxExtractor;

impl ZipDocxExtractor {
    fn read_document_xml(&self, bytes: &[u8]) -> anyhow::Result<String> {
        let reader = std::io::Cursor::new(bytes);
        let mut archive = zip::ZipArchive::new(reader)?;
        let mut file = archive.by_name("word/document.xml")?;
        let mut xml = String::new();
        std::io::Read::read_to_string(&mut file, &mut xml)?;
        Ok(xml)
    }

    /// Strips XML tags, turning `<w:p>` boundaries into newlines so
    /// paragraph structure survives for the downstream heuristics.
    fn strip_tags(xml: &str) -> String {
        let mut out = String::with_capacity(xml.len() / 2);
        let mut in_tag = false;
        let mut tag_buf = String::new();
        for ch in xml.chars() {
            match ch {
                '<' => {
                    in_tag = true;
                    tag_buf.clear();
                }
                '>' => {
                    in_tag = false;
                    if tag_buf.starts_with("/w:p") || tag_buf.starts_with("w:br") {
                        out.push('\n');
                    }
                    tag_buf.clear();
                }
                _ if in_tag => tag_buf.push(ch),
                _ => out.push(ch),
            }
        }
        out
    }
}

impl DocumentExtractor for ZipDocxExtractor {
    fn prefill_from_docx(&self, bytes: &[u8]) -> anyhow::Result<DocxPrefill> {
        let xml = match self.read_document_xml(bytes) {
            Ok(xml) => xml,
            Err(_) => return Ok(DocxPrefill::default()),
        };
        let text = Self::strip_tags(&xml);
        let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();

        let email_re = regex::Regex::new(r"[\w.+-]+@[\w-]+\.[\w.-]+").unwrap();
        let phone_re = regex::Regex::new(r"[+]?[\d][\d\s().-]{7,}\d").unwrap();

        let mut prefill = DocxPrefill::default();
        if let Some(first) = lines.first() {
            prefill.full_name = first.to_string();
        }
        if let Some(m) = email_re.find(&text) {
            prefill.email = m.as_str().to_string();
        }
        if let Some(m) = phone_re.find(&text) {
            prefill.phone = m.as_str().trim().to_string();
        }
        prefill.profile = lines.get(1).map(|s| s.to_string()).unwrap_or_default();
        Ok(prefill)
    }

    fn extract_first_photo(&self, bytes: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        let reader = std::io::Cursor::new(bytes);
        let mut archive = match zip::ZipArchive::new(reader) {
            Ok(a) => a,
            Err(_) => return Ok(None),
        };
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            let name = entry.name().to_string();
            if name.starts_with("word/media/") {
                let mut data = Vec::new();
                std::io::Read::read_to_end(&mut entry, &mut data)?;
                return Ok(Some(data));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn build_minimal_docx(document_xml: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let cursor = std::io::Cursor::new(&mut buf);
            let mut writer = zip::ZipWriter::new(cursor);
            let options = zip::write::FileOptions::default();
            writer.start_file("word/document.xml", options).unwrap();
            writer.write_all(document_xml.as_bytes()).unwrap();
            writer.finish().unwrap();
        }
        buf
    }

    #[test]
    fn extracts_name_email_phone_from_paragraphs() {
        let xml = "<w:document><w:body>\
            <w:p><w:r><w:t>Jane Doe</w:t></w:r></w:p>\
            <w:p><w:r><w:t>Experienced backend engineer</w:t></w:r></w:p>\
            <w:p><w:r><w:t>jane@example.com +1 555 0100</w:t></w:r></w:p>\
            </w:body></w:document>";
        let docx = build_minimal_docx(xml);
        let extractor = ZipDocxExtractor;
        let prefill = extractor.prefill_from_docx(&docx).unwrap();
        assert_eq!(prefill.full_name, "Jane Doe");
        assert_eq!(prefill.email, "jane@example.com");
        assert!(prefill.phone.contains("555"));
    }

    #[test]
    fn missing_document_xml_yields_empty_prefill() {
        let extractor = ZipDocxExtractor;
        let prefill = extractor.prefill_from_docx(b"not a zip").unwrap();
        assert_eq!(prefill.full_name, "");
    }

    #[test]
    fn no_photo_returns_none() {
        let xml = "<w:document><w:body><w:p><w:r><w:t>Hi</w:t></w:r></w:p></w:body></w:document>";
        let docx = build_minimal_docx(xml);
        let extractor = ZipDocxExtractor;
        assert!(extractor.extract_first_photo(&docx).unwrap().is_none());
    }
}
