use crate::error::CatalogError;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Category for files that live directly in the scan root.
pub const GENERAL_CATEGORY: &str = "GENERAL";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptEntry {
    pub category: String,
    pub display_name: String,
    pub full_path: PathBuf,
}

/// One scan of the scripts directory. Categories iterate in lexicographic order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogSnapshot {
    categories: BTreeMap<String, Vec<ScriptEntry>>,
}

impl CatalogSnapshot {
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(String::as_str)
    }

    pub fn entries(&self, category: &str) -> &[ScriptEntry] {
        self.categories
            .get(category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[ScriptEntry])> {
        self.categories
            .iter()
            .map(|(name, entries)| (name.as_str(), entries.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.categories.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    fn paths(&self) -> BTreeSet<&Path> {
        self.categories
            .values()
            .flatten()
            .map(|entry| entry.full_path.as_path())
            .collect()
    }
}

/// Walks `root` and groups every file by its immediate parent directory.
///
/// The root is created when missing. Entries the walker cannot read are
/// skipped without error.
pub fn scan(root: &Path) -> Result<CatalogSnapshot, CatalogError> {
    if !root.exists() {
        std::fs::create_dir_all(root).map_err(|source| CatalogError::CreateRoot {
            path: root.to_path_buf(),
            source,
        })?;
        debug!(root = %root.display(), "created scripts directory");
    }

    let mut categories: BTreeMap<String, Vec<ScriptEntry>> = BTreeMap::new();
    for entry in WalkDir::new(root).min_depth(1).into_iter().filter_map(Result::ok) {
        let is_file = entry.file_type().is_file()
            || (entry.file_type().is_symlink() && entry.path().is_file());
        if !is_file {
            continue;
        }

        let path = entry.path();
        let category = if entry.depth() == 1 {
            GENERAL_CATEGORY.to_string()
        } else {
            match path.parent().and_then(Path::file_name) {
                Some(name) => name.to_string_lossy().to_uppercase(),
                None => GENERAL_CATEGORY.to_string(),
            }
        };
        let display_name = entry.file_name().to_string_lossy().into_owned();

        categories
            .entry(category.clone())
            .or_default()
            .push(ScriptEntry {
                category,
                display_name,
                full_path: path.to_path_buf(),
            });
    }

    for entries in categories.values_mut() {
        entries.sort_by(|a, b| {
            a.display_name
                .cmp(&b.display_name)
                .then_with(|| a.full_path.cmp(&b.full_path))
        });
    }

    Ok(CatalogSnapshot { categories })
}

/// Whether the display must be rebuilt. A missing previous snapshot always counts.
pub fn changed(previous: Option<&CatalogSnapshot>, current: &CatalogSnapshot) -> bool {
    match previous {
        Some(previous) => previous != current,
        None => true,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    pub added: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

pub fn diff(previous: Option<&CatalogSnapshot>, current: &CatalogSnapshot) -> SnapshotDiff {
    let before = previous.map(CatalogSnapshot::paths).unwrap_or_default();
    let after = current.paths();
    SnapshotDiff {
        added: after
            .difference(&before)
            .map(|path| path.to_path_buf())
            .collect(),
        removed: before
            .difference(&after)
            .map(|path| path.to_path_buf())
            .collect(),
    }
}
