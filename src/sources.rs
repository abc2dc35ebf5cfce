use std::collections::HashSet;

use crate::models::RankedDocumentSet;
use crate::web_search::extract_source_urls;

const EXCERPT_CHARS: usize = 100;

/// Citation block listing the evidence an answer was built on.
///
/// Sections without entries are left out; with nothing to cite the block is
/// empty.
pub fn summarize_sources(evidence: &RankedDocumentSet, web_content: &str) -> String {
    let statutes: Vec<String> = evidence
        .statutes()
        .map(|r| format!("- 《{}》: {}", r.chunk.title, excerpt(&r.chunk.text)))
        .collect();

    let mut seen_files = HashSet::new();
    let cases: Vec<String> = evidence
        .cases()
        .filter(|r| seen_files.insert(r.chunk.file_id))
        .map(|r| format!("- 《{}》", r.chunk.title))
        .collect();

    let urls: Vec<String> = extract_source_urls(web_content)
        .into_iter()
        .map(|u| format!("- {u}"))
        .collect();

    let sections: Vec<String> = [
        ("**法律条文依据：**", statutes),
        ("**案例依据：**", cases),
        ("**网络搜索来源：**", urls),
    ]
    .into_iter()
    .filter(|(_, lines)| !lines.is_empty())
    .map(|(heading, lines)| format!("{heading}\n{}", lines.join("\n")))
    .collect();

    if sections.is_empty() {
        return String::new();
    }
    format!("---\n{}", sections.join("\n\n"))
}

fn excerpt(text: &str) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(EXCERPT_CHARS) {
        Some((end, _)) => format!("{}…", &flat[..end]),
        None => flat,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, DocType, RetrievalResult};
    use std::sync::Arc;

    fn result(id: &str, file_id: u64, doc_type: DocType, title: &str, text: &str) -> RetrievalResult {
        RetrievalResult::new(Arc::new(Chunk {
            chunk_id: id.to_string(),
            file_id,
            source_path: format!("{id}.md"),
            doc_type,
            title: title.to_string(),
            chunk_sequence: 0,
            text: text.to_string(),
        }))
    }

    #[test]
    fn test_full_summary() {
        let evidence = RankedDocumentSet::concat(
            vec![result("s1", 1, DocType::Statute, "劳动合同法 第八十七条", "用人单位违反本法规定解除\n劳动合同的……")],
            vec![
                result("c1", 10, DocType::PublicCase, "张某诉某公司案", "## 基本案情\n……"),
                result("c2", 10, DocType::PublicCase, "张某诉某公司案", "## 裁判理由\n……"),
                result("c3", 11, DocType::PrivateCase, "李某劳动争议案", "……"),
            ],
        );
        let web = "标题: t\n摘要: s\n来源: https://law.example/87";

        assert_eq!(
            summarize_sources(&evidence, web),
            "---\n**法律条文依据：**\n- 《劳动合同法 第八十七条》: 用人单位违反本法规定解除 劳动合同的……\n\n\
**案例依据：**\n- 《张某诉某公司案》\n- 《李某劳动争议案》\n\n\
**网络搜索来源：**\n- https://law.example/87"
        );
    }

    #[test]
    fn test_nothing_to_cite() {
        assert_eq!(summarize_sources(&RankedDocumentSet::default(), ""), "");
    }

    #[test]
    fn test_cases_only() {
        let evidence = RankedDocumentSet::concat(
            vec![],
            vec![result("c1", 3, DocType::PrivateCase, "王某案", "……")],
        );
        let summary = summarize_sources(&evidence, "");
        assert!(summary.starts_with("---\n**案例依据：**"));
        assert!(!summary.contains("法律条文依据"));
    }

    #[test]
    fn test_long_statute_is_excerpted() {
        let text = "条".repeat(150);
        let evidence =
            RankedDocumentSet::concat(vec![result("s1", 1, DocType::Statute, "民法典", &text)], vec![]);
        let summary = summarize_sources(&evidence, "");
        let line = summary.lines().nth(2).unwrap();
        assert!(line.ends_with('…'));
        assert_eq!(line.chars().filter(|c| *c == '条').count(), EXCERPT_CHARS);
    }
}
