//! Case content normalizer.
//!
//! Raw case documents are markdown with `## <section>` headers. Only four
//! sections matter for retrieval and display, in this order: facts,
//! reasoning, holding gist, cited statutes. Everything else is dropped.

use regex::Regex;
use std::sync::OnceLock;

/// The four canonical case sections, in extract order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CaseSection {
    Facts,
    Reasoning,
    Holding,
    CitedStatutes,
}

impl CaseSection {
    pub const ALL: [CaseSection; 4] = [
        CaseSection::Facts,
        CaseSection::Reasoning,
        CaseSection::Holding,
        CaseSection::CitedStatutes,
    ];

    fn from_header(header: &str) -> Option<Self> {
        match header {
            "基本案情" | "Facts" => Some(CaseSection::Facts),
            "裁判理由" | "Reasoning" => Some(CaseSection::Reasoning),
            "裁判要旨" | "Holding" => Some(CaseSection::Holding),
            "法律条文" | "Cited Statutes" => Some(CaseSection::CitedStatutes),
            _ => None,
        }
    }
}

static HEADER_PATTERN: OnceLock<Regex> = OnceLock::new();

fn header_pattern() -> &'static Regex {
    HEADER_PATTERN.get_or_init(|| {
        Regex::new(r"##[ \t]*(基本案情|裁判理由|裁判要旨|法律条文|Facts|Reasoning|Holding|Cited Statutes)")
            .expect("case header regex must compile")
    })
}

/// A section found in a case document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedSection {
    pub section: CaseSection,
    /// Header as written in the source
    pub header: String,
    pub body: String,
}

/// Find the first occurrence of each canonical section. A body runs from
/// its header to the next `##` or the end of the text.
pub fn extract_sections(text: &str) -> Vec<ExtractedSection> {
    let mut found: Vec<ExtractedSection> = Vec::new();

    for caps in header_pattern().captures_iter(text) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let Some(section) = CaseSection::from_header(name.as_str()) else {
            continue;
        };
        if found.iter().any(|s| s.section == section) {
            continue;
        }

        let rest = &text[whole.end()..];
        let body_end = rest.find("##").unwrap_or(rest.len());
        found.push(ExtractedSection {
            section,
            header: name.as_str().to_string(),
            body: rest[..body_end].trim().to_string(),
        });
    }

    found.sort_by_key(|s| s.section);
    found
}

/// Reduce raw case text to its canonical extract.
///
/// Missing sections are omitted, never synthesized. Text with none of the
/// four sections is returned unchanged.
pub fn normalize_case_text(text: &str) -> String {
    let sections = extract_sections(text);
    if sections.is_empty() {
        return text.to_string();
    }

    sections
        .iter()
        .map(|s| format!("## {}\n{}", s.header, s.body))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const CASE: &str = "# 张某诉李某劳动争议案\n\
## 关键词\n劳动合同 解除\n\
## 裁判要旨\n用人单位违法解除劳动合同的，应当支付赔偿金。\n\
## 基本案情\n张某于2019年入职，2021年被公司口头辞退。\n\
## 裁判理由\n公司未提供解除依据。\n\
## 法律条文\n《劳动合同法》第八十七条\n";

    #[test]
    fn test_sections_come_out_in_canonical_order() {
        let out = normalize_case_text(CASE);
        assert_eq!(
            out,
            "## 基本案情\n张某于2019年入职，2021年被公司口头辞退。\n\n\
## 裁判理由\n公司未提供解除依据。\n\n\
## 裁判要旨\n用人单位违法解除劳动合同的，应当支付赔偿金。\n\n\
## 法律条文\n《劳动合同法》第八十七条"
        );
    }

    #[test]
    fn test_non_canonical_sections_are_dropped() {
        let out = normalize_case_text(CASE);
        assert!(!out.contains("关键词"));
        assert!(!out.contains("张某诉李某"));
    }

    #[test]
    fn test_missing_section_is_omitted() {
        let text = "## 基本案情\n事实部分\n## 法律条文\n第一条";
        let sections = extract_sections(text);
        assert_eq!(
            sections.iter().map(|s| s.section).collect::<Vec<_>>(),
            vec![CaseSection::Facts, CaseSection::CitedStatutes]
        );
        assert_eq!(normalize_case_text(text), "## 基本案情\n事实部分\n\n## 法律条文\n第一条");
    }

    #[test]
    fn test_text_without_sections_is_unchanged() {
        let text = "某某法院判决书全文，没有分节。";
        assert_eq!(normalize_case_text(text), text);
    }

    #[test]
    fn test_first_occurrence_wins() {
        let text = "## 裁判理由\n第一次\n## 裁判理由\n第二次";
        let sections = extract_sections(text);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].body, "第一次");
    }

    #[test]
    fn test_english_headers() {
        let text = "## Holding\nGist.\n## Facts\nWhat happened.";
        assert_eq!(
            normalize_case_text(text),
            "## Facts\nWhat happened.\n\n## Holding\nGist."
        );
    }

    #[test]
    fn test_empty_body_at_end_of_text() {
        let sections = extract_sections("## 裁判要旨");
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].body, "");
    }
}
