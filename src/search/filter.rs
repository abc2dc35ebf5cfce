use std::collections::BTreeSet;
use std::sync::Arc;

use crate::models::{DocType, FileId};

/// Visibility predicate applied *before* scoring in both the lexical and the
/// semantic index, so a requested `top_k` is always counted over chunks the
/// caller may see.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkFilter {
    statutes: bool,
    case_files: Arc<BTreeSet<FileId>>,
}

impl ChunkFilter {
    pub fn statutes_only() -> Self {
        Self {
            statutes: true,
            case_files: Arc::default(),
        }
    }

    pub fn cases(case_files: Arc<BTreeSet<FileId>>) -> Self {
        Self {
            statutes: false,
            case_files,
        }
    }

    pub fn new(statutes: bool, case_files: Arc<BTreeSet<FileId>>) -> Self {
        Self {
            statutes,
            case_files,
        }
    }

    pub fn admits(&self, doc_type: DocType, file_id: FileId) -> bool {
        match doc_type {
            DocType::Statute => self.statutes,
            DocType::PrivateCase | DocType::PublicCase => self.case_files.contains(&file_id),
        }
    }

    /// True when no chunk can pass.
    pub fn is_closed(&self) -> bool {
        !self.statutes && self.case_files.is_empty()
    }

    /// Scope keys as indexed by the lexical scorer.
    pub fn scope_keys(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(self.case_files.len() + 1);
        if self.statutes {
            keys.push(STATUTE_SCOPE.to_string());
        }
        keys.extend(self.case_files.iter().map(|id| case_scope_key(*id)));
        keys
    }
}

pub const STATUTE_SCOPE: &str = "statute";

/// Scope key for a chunk. Statute and case file ids may overlap numerically,
/// so the corpus kind is part of the key.
pub fn scope_key(doc_type: DocType, file_id: FileId) -> String {
    match doc_type {
        DocType::Statute => STATUTE_SCOPE.to_string(),
        DocType::PrivateCase | DocType::PublicCase => case_scope_key(file_id),
    }
}

fn case_scope_key(file_id: FileId) -> String {
    format!("case:{file_id}")
}
