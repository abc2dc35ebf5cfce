//! File permissions and the per-request access scope.
//!
//! The store mirrors the relational contract
//! `files(file_id PK, ...)` / `file_permissions(file_id FK, permission_type, owner_id)`
//! with cascade delete. Retrieval never reaches the store directly: it is
//! handed an [`AccessScope`] resolved once per request.

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Degraded, RetrievalError, Service};
use crate::models::{FileId, FileRecord, KnowledgeMode, Permission, PermissionGrant, UserId};
use crate::search::filter::ChunkFilter;

/// Read side of the permission store, as seen by the access filter.
pub trait PermissionLookup: Send + Sync {
    fn public_file_ids(&self) -> Result<BTreeSet<FileId>>;
    fn private_file_ids(&self, user: UserId) -> Result<BTreeSet<FileId>>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Tables {
    files: BTreeMap<FileId, FileRecord>,
    permissions: Vec<Permission>,
}

/// A file together with the grants the requesting user can see.
#[derive(Debug, Clone, Serialize)]
pub struct VisibleFile {
    pub file: FileRecord,
    pub grants: Vec<PermissionGrant>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PermissionStats {
    pub total_files: usize,
    pub total_permissions: usize,
    pub public_permissions: usize,
    pub private_permissions: usize,
    /// (user, file count), busiest first, at most 10
    pub top_uploaders: Vec<(UserId, usize)>,
}

/// JSON-persisted permission store. Readers never block each other.
pub struct PermissionStore {
    tables: RwLock<Tables>,
    persist_path: Option<PathBuf>,
}

impl PermissionStore {
    pub fn in_memory() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            persist_path: None,
        }
    }

    pub fn open_or_create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tables = if path.exists() {
            let data =
                std::fs::read_to_string(path).context("Failed to read permission store")?;
            serde_json::from_str(&data).context("Failed to parse permission store")?
        } else {
            Tables::default()
        };

        Ok(Self {
            tables: RwLock::new(tables),
            persist_path: Some(path.to_path_buf()),
        })
    }

    /// Persist tables to disk (atomic write via temp file + rename).
    fn persist(&self, tables: &Tables) -> Result<()> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        let data = serde_json::to_string_pretty(tables)?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &data).context("Failed to write permission store")?;
        std::fs::rename(&tmp_path, path).context("Failed to replace permission store")?;
        Ok(())
    }

    /// Apply `change` to a copy of the tables and swap it in only once the
    /// copy is on disk. `change` returns its result and whether anything
    /// changed.
    fn commit<T>(&self, change: impl FnOnce(&mut Tables) -> Result<(T, bool)>) -> Result<T> {
        let mut tables = self.tables.write();
        let mut next = tables.clone();
        let (out, dirty) = change(&mut next)?;
        if dirty {
            self.persist(&next)?;
            *tables = next;
        }
        Ok(out)
    }

    /// Insert or replace a file record. Existing permission rows are kept.
    pub fn add_file(&self, file: FileRecord) -> Result<()> {
        self.commit(|tables| {
            tables.files.insert(file.file_id, file);
            Ok(((), true))
        })
    }

    pub fn file_info(&self, file_id: FileId) -> Option<FileRecord> {
        self.tables.read().files.get(&file_id).cloned()
    }

    pub fn update_file_path(&self, file_id: FileId, new_path: &str) -> Result<bool> {
        self.commit(|tables| {
            let Some(file) = tables.files.get_mut(&file_id) else {
                return Ok((false, false));
            };
            file.path = new_path.to_string();
            Ok((true, true))
        })
    }

    /// Add a grant. Adding an existing grant is a no-op.
    pub fn add_permission(&self, file_id: FileId, grant: PermissionGrant) -> Result<()> {
        self.commit(|tables| {
            if !tables.files.contains_key(&file_id) {
                return Err(RetrievalError::Permission(format!("unknown file {file_id}")).into());
            }
            let row = Permission { file_id, grant };
            if tables.permissions.contains(&row) {
                tracing::debug!("Permission already present: {row:?}");
                return Ok(((), false));
            }
            tables.permissions.push(row);
            Ok(((), true))
        })
    }

    pub fn remove_permission(&self, file_id: FileId, grant: PermissionGrant) -> Result<bool> {
        self.commit(|tables| {
            let before = tables.permissions.len();
            tables
                .permissions
                .retain(|p| !(p.file_id == file_id && p.grant == grant));
            let removed = tables.permissions.len() != before;
            if !removed {
                tracing::debug!("No permission to remove for file {file_id}: {grant:?}");
            }
            Ok((removed, removed))
        })
    }

    /// Replace all grants on a file from knowledge-type names
    /// (`public`, `private`). Unknown names are skipped.
    pub fn set_file_permissions(
        &self,
        file_id: FileId,
        knowledge_types: &[&str],
        user: UserId,
    ) -> Result<()> {
        self.commit(|tables| {
            if !tables.files.contains_key(&file_id) {
                return Err(RetrievalError::Permission(format!("unknown file {file_id}")).into());
            }
            tables.permissions.retain(|p| p.file_id != file_id);
            for kind in knowledge_types {
                let grant = match *kind {
                    "public" => PermissionGrant::Public,
                    "private" => PermissionGrant::Private { owner_id: user },
                    other => {
                        tracing::warn!("Skipping unknown knowledge type '{other}' for file {file_id}");
                        continue;
                    }
                };
                let row = Permission { file_id, grant };
                if !tables.permissions.contains(&row) {
                    tables.permissions.push(row);
                }
            }
            Ok(((), true))
        })
    }

    pub fn clear_file_permissions(&self, file_id: FileId) -> Result<()> {
        self.commit(|tables| {
            tables.permissions.retain(|p| p.file_id != file_id);
            Ok(((), true))
        })
    }

    /// Delete a file and, by cascade, every permission row on it.
    pub fn delete_file(&self, file_id: FileId) -> Result<bool> {
        self.commit(|tables| {
            let existed = tables.files.remove(&file_id).is_some();
            tables.permissions.retain(|p| p.file_id != file_id);
            Ok((existed, true))
        })
    }

    pub fn file_permissions(&self, file_id: FileId) -> Vec<PermissionGrant> {
        self.tables
            .read()
            .permissions
            .iter()
            .filter(|p| p.file_id == file_id)
            .map(|p| p.grant)
            .collect()
    }

    pub fn is_file_accessible_by_user(&self, file_id: FileId, user: UserId) -> bool {
        self.tables
            .read()
            .permissions
            .iter()
            .any(|p| p.file_id == file_id && p.grant.admits(user))
    }

    pub fn accessible_file_ids(&self, user: UserId) -> BTreeSet<FileId> {
        self.tables
            .read()
            .permissions
            .iter()
            .filter(|p| p.grant.admits(user))
            .map(|p| p.file_id)
            .collect()
    }

    /// Files the user may see with their visible grants, newest first.
    pub fn files_visible_to(&self, user: UserId) -> Vec<VisibleFile> {
        let tables = self.tables.read();
        let mut grants: HashMap<FileId, Vec<PermissionGrant>> = HashMap::new();
        for p in tables.permissions.iter().filter(|p| p.grant.admits(user)) {
            grants.entry(p.file_id).or_default().push(p.grant);
        }

        let mut visible: Vec<VisibleFile> = grants
            .into_iter()
            .filter_map(|(file_id, grants)| {
                tables.files.get(&file_id).map(|file| VisibleFile {
                    file: file.clone(),
                    grants,
                })
            })
            .collect();
        visible.sort_by(|a, b| {
            b.file
                .created_at
                .cmp(&a.file.created_at)
                .then(a.file.file_id.cmp(&b.file.file_id))
        });
        visible
    }

    pub fn statistics(&self) -> PermissionStats {
        let tables = self.tables.read();
        let public_permissions = tables
            .permissions
            .iter()
            .filter(|p| p.grant == PermissionGrant::Public)
            .count();

        let mut per_user: HashMap<UserId, usize> = HashMap::new();
        for file in tables.files.values() {
            *per_user.entry(file.owner_user_id).or_insert(0) += 1;
        }
        let mut top_uploaders: Vec<(UserId, usize)> = per_user.into_iter().collect();
        top_uploaders.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        top_uploaders.truncate(10);

        PermissionStats {
            total_files: tables.files.len(),
            total_permissions: tables.permissions.len(),
            public_permissions,
            private_permissions: tables.permissions.len() - public_permissions,
            top_uploaders,
        }
    }
}

impl PermissionLookup for PermissionStore {
    fn public_file_ids(&self) -> Result<BTreeSet<FileId>> {
        Ok(self
            .tables
            .read()
            .permissions
            .iter()
            .filter(|p| p.grant == PermissionGrant::Public)
            .map(|p| p.file_id)
            .collect())
    }

    fn private_file_ids(&self, user: UserId) -> Result<BTreeSet<FileId>> {
        Ok(self
            .tables
            .read()
            .permissions
            .iter()
            .filter(|p| p.grant == PermissionGrant::Private { owner_id: user })
            .map(|p| p.file_id)
            .collect())
    }
}

/// Capability resolved once per request: which statute and case chunks the
/// caller may retrieve under the requested mode.
#[derive(Debug, Clone)]
pub struct AccessScope {
    mode: KnowledgeMode,
    statutes_visible: bool,
    case_files: Arc<BTreeSet<FileId>>,
}

impl AccessScope {
    /// Resolve visibility for `(mode, user)`. A failing lookup closes the
    /// affected set rather than widening it, and the scope comes back as a
    /// fallback carrying the first lookup error.
    pub fn resolve(lookup: &dyn PermissionLookup, mode: KnowledgeMode, user: UserId) -> Degraded<Self> {
        let mut failure = None;
        let mut ids = |found: Result<BTreeSet<FileId>>| {
            found.unwrap_or_else(|e| {
                failure.get_or_insert(e);
                BTreeSet::new()
            })
        };

        let (statutes_visible, case_files) = match mode {
            KnowledgeMode::PublicKnowledge => (true, ids(lookup.public_file_ids())),
            // Only the caller's own cases; statutes are excluded in this mode.
            KnowledgeMode::PrivateKnowledge => (false, ids(lookup.private_file_ids(user))),
            KnowledgeMode::EntireKnowledge => {
                let mut all = ids(lookup.public_file_ids());
                all.extend(ids(lookup.private_file_ids(user)));
                (true, all)
            }
            KnowledgeMode::NoneKnowledge => (false, BTreeSet::new()),
        };

        tracing::debug!(
            "Resolved access scope: mode={mode} user={user} statutes={statutes_visible} case_files={}",
            case_files.len()
        );

        let scope = Self {
            mode,
            statutes_visible,
            case_files: Arc::new(case_files),
        };
        match failure {
            None => Degraded::Fresh(scope),
            Some(e) => {
                let cause = RetrievalError::external(Service::PermissionStore, e);
                tracing::warn!("Permission lookup for user {user} failed, unreadable files stay hidden: {cause}");
                Degraded::Fallback { value: scope, cause }
            }
        }
    }

    pub fn skips_retrieval(&self) -> bool {
        self.mode == KnowledgeMode::NoneKnowledge
    }

    pub fn case_file_ids(&self) -> &BTreeSet<FileId> {
        &self.case_files
    }

    /// Predicate for the statute corpus, or None when statutes are out of scope.
    pub fn statute_filter(&self) -> Option<ChunkFilter> {
        self.statutes_visible.then(ChunkFilter::statutes_only)
    }

    /// Predicate for the case corpus, or None when no case file is visible.
    pub fn case_filter(&self) -> Option<ChunkFilter> {
        (!self.case_files.is_empty()).then(|| ChunkFilter::cases(self.case_files.clone()))
    }

    /// Predicate over a merged corpus.
    pub fn unified_filter(&self) -> Option<ChunkFilter> {
        let filter = ChunkFilter::new(self.statutes_visible, self.case_files.clone());
        (!filter.is_closed()).then_some(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn file(id: FileId, owner: UserId, day: u32) -> FileRecord {
        FileRecord {
            file_id: id,
            owner_user_id: owner,
            title: format!("case {id}"),
            path: format!("cases/{id}.md"),
            category: "case".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
        }
    }

    fn seeded() -> PermissionStore {
        let store = PermissionStore::in_memory();
        store.add_file(file(1, 10, 1)).unwrap();
        store.add_file(file(2, 10, 2)).unwrap();
        store.add_file(file(7, 20, 3)).unwrap();
        store.add_permission(1, PermissionGrant::Public).unwrap();
        store
            .add_permission(2, PermissionGrant::Private { owner_id: 10 })
            .unwrap();
        store
            .add_permission(7, PermissionGrant::Private { owner_id: 20 })
            .unwrap();
        store
    }

    #[test]
    fn test_public_mode_sees_public_files_only() {
        let store = seeded();
        let scope = AccessScope::resolve(&store, KnowledgeMode::PublicKnowledge, 20).into_value();
        assert_eq!(scope.case_file_ids(), &BTreeSet::from([1]));
        assert!(scope.statute_filter().is_some());
    }

    #[test]
    fn test_private_permission_alone_hides_file_in_public_mode() {
        let store = seeded();
        let scope = AccessScope::resolve(&store, KnowledgeMode::PublicKnowledge, 20).into_value();
        assert!(!scope.case_file_ids().contains(&7));

        store.add_permission(7, PermissionGrant::Public).unwrap();
        let scope = AccessScope::resolve(&store, KnowledgeMode::PublicKnowledge, 20).into_value();
        assert!(scope.case_file_ids().contains(&7));
    }

    #[test]
    fn test_private_mode_excludes_statutes() {
        let store = seeded();
        let scope = AccessScope::resolve(&store, KnowledgeMode::PrivateKnowledge, 10).into_value();
        assert_eq!(scope.case_file_ids(), &BTreeSet::from([2]));
        assert!(scope.statute_filter().is_none());
    }

    #[test]
    fn test_entire_mode_is_union() {
        let store = seeded();
        let scope = AccessScope::resolve(&store, KnowledgeMode::EntireKnowledge, 10).into_value();
        assert_eq!(scope.case_file_ids(), &BTreeSet::from([1, 2]));
        assert!(scope.statute_filter().is_some());
    }

    #[test]
    fn test_none_mode_sees_nothing() {
        let store = seeded();
        let scope = AccessScope::resolve(&store, KnowledgeMode::NoneKnowledge, 10).into_value();
        assert!(scope.skips_retrieval());
        assert!(scope.statute_filter().is_none());
        assert!(scope.case_filter().is_none());
        assert!(scope.unified_filter().is_none());
    }

    #[test]
    fn test_visibility_matches_grant_rule_for_every_pair() {
        let store = seeded();
        store.add_permission(7, PermissionGrant::Public).unwrap();
        for user in [10, 20, 30] {
            for file_id in [1, 2, 7] {
                let grants = store.file_permissions(file_id);
                let expected_public = grants.contains(&PermissionGrant::Public);
                let expected_private =
                    grants.contains(&PermissionGrant::Private { owner_id: user });

                let public = AccessScope::resolve(&store, KnowledgeMode::PublicKnowledge, user).into_value();
                let private = AccessScope::resolve(&store, KnowledgeMode::PrivateKnowledge, user).into_value();
                let entire = AccessScope::resolve(&store, KnowledgeMode::EntireKnowledge, user).into_value();

                assert_eq!(public.case_file_ids().contains(&file_id), expected_public);
                assert_eq!(private.case_file_ids().contains(&file_id), expected_private);
                assert_eq!(
                    entire.case_file_ids().contains(&file_id),
                    expected_public || expected_private
                );
                assert_eq!(
                    store.is_file_accessible_by_user(file_id, user),
                    expected_public || expected_private
                );
            }
        }
    }

    #[test]
    fn test_add_permission_is_idempotent() {
        let store = seeded();
        store.add_permission(1, PermissionGrant::Public).unwrap();
        assert_eq!(store.file_permissions(1), vec![PermissionGrant::Public]);
    }

    #[test]
    fn test_add_permission_requires_known_file() {
        let store = seeded();
        assert!(store.add_permission(99, PermissionGrant::Public).is_err());
    }

    #[test]
    fn test_set_file_permissions_replaces_rows() {
        let store = seeded();
        store
            .set_file_permissions(1, &["private", "public", "shared"], 10)
            .unwrap();
        let grants = store.file_permissions(1);
        assert_eq!(grants.len(), 2);
        assert!(grants.contains(&PermissionGrant::Public));
        assert!(grants.contains(&PermissionGrant::Private { owner_id: 10 }));
    }

    #[test]
    fn test_delete_file_cascades() {
        let store = seeded();
        assert!(store.delete_file(2).unwrap());
        assert!(store.file_permissions(2).is_empty());
        assert!(store.file_info(2).is_none());
        assert!(!store.delete_file(2).unwrap());
    }

    #[test]
    fn test_remove_permission_reports_absence() {
        let store = seeded();
        assert!(store.remove_permission(1, PermissionGrant::Public).unwrap());
        assert!(!store.remove_permission(1, PermissionGrant::Public).unwrap());
    }

    #[test]
    fn test_files_visible_to_newest_first() {
        let store = seeded();
        let files = store.files_visible_to(10);
        let ids: Vec<FileId> = files.iter().map(|f| f.file.file_id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn test_statistics() {
        let stats = seeded().statistics();
        assert_eq!(stats.total_files, 3);
        assert_eq!(stats.total_permissions, 3);
        assert_eq!(stats.public_permissions, 1);
        assert_eq!(stats.private_permissions, 2);
        assert_eq!(stats.top_uploaders[0], (10, 2));
    }

    #[test]
    fn test_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("permissions.json");
        {
            let store = PermissionStore::open_or_create(&path).unwrap();
            store.add_file(file(5, 1, 5)).unwrap();
            store
                .add_permission(5, PermissionGrant::Private { owner_id: 1 })
                .unwrap();
        }
        let store = PermissionStore::open_or_create(&path).unwrap();
        assert_eq!(store.private_file_ids(1).unwrap(), BTreeSet::from([5]));
        assert!(store.file_info(5).is_some());
    }

    struct BrokenLookup;

    impl PermissionLookup for BrokenLookup {
        fn public_file_ids(&self) -> Result<BTreeSet<FileId>> {
            anyhow::bail!("database is locked")
        }
        fn private_file_ids(&self, _user: UserId) -> Result<BTreeSet<FileId>> {
            anyhow::bail!("database is locked")
        }
    }

    #[test]
    fn test_failing_lookup_closes_case_scope() {
        let resolved = AccessScope::resolve(&BrokenLookup, KnowledgeMode::EntireKnowledge, 1);
        assert!(resolved.is_fallback());
        assert_eq!(
            resolved.cause().and_then(RetrievalError::service),
            Some(Service::PermissionStore)
        );
        let scope = resolved.into_value();
        assert!(scope.case_filter().is_none());
        assert!(scope.statute_filter().is_some());
    }

    #[test]
    fn test_healthy_lookup_resolves_fresh() {
        let store = seeded();
        assert!(!AccessScope::resolve(&store, KnowledgeMode::EntireKnowledge, 10).is_fallback());
        assert!(!AccessScope::resolve(&store, KnowledgeMode::NoneKnowledge, 10).is_fallback());
    }

    #[test]
    fn test_failed_persist_leaves_memory_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store_dir = dir.path().join("store");
        let store = PermissionStore::open_or_create(&store_dir.join("permissions.json")).unwrap();
        store.add_file(file(7, 1, 7)).unwrap();
        store
            .add_permission(7, PermissionGrant::Private { owner_id: 1 })
            .unwrap();

        std::fs::remove_dir_all(&store_dir).unwrap();

        assert!(store.add_permission(7, PermissionGrant::Public).is_err());
        assert!(store.delete_file(7).is_err());
        assert!(store.set_file_permissions(7, &["public"], 1).is_err());
        assert_eq!(
            store.file_permissions(7),
            vec![PermissionGrant::Private { owner_id: 1 }]
        );
        assert!(store.file_info(7).is_some());
        assert_eq!(store.public_file_ids().unwrap(), BTreeSet::new());
    }
}
