//! Policy templates, settings substitution, building and inheritance batching.
//!
//! Provides:
//! - [`document::PolicyDocument`]: one parsed policy file with its parent reference
//! - [`settings::SettingsSubstitution`]: `${Name}` placeholder resolution
//! - [`builder::PolicyBuilder`]: read templates, substitute, write resolved output
//! - [`tree::PolicyTree`]: inheritance graph over resolved output, split into upload batches

pub mod builder;
pub mod document;
pub mod error;
pub mod settings;
pub mod tree;

use std::fs;
use std::path::{Path, PathBuf};

pub use builder::{BuildReport, PolicyBuilder, WrittenPolicy};
pub use document::PolicyDocument;
pub use error::{PolicyError, PolicyResult};
pub use settings::{Settings, SettingsSubstitution};
pub use tree::PolicyTree;

/// Recursively collect `*.xml` files under `dir`, sorted by path.
pub(crate) fn policy_files(dir: &Path) -> PolicyResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    collect_xml(dir, &mut files)?;
    files.sort();
    Ok(files)
}

fn collect_xml(dir: &Path, files: &mut Vec<PathBuf>) -> PolicyResult<()> {
    for entry in fs::read_dir(dir).map_err(|e| PolicyError::io(dir, e))? {
        let entry = entry.map_err(|e| PolicyError::io(dir, e))?;
        let path = entry.path();
        if path.is_dir() {
            collect_xml(&path, files)?;
        } else if is_policy_file(&path) {
            files.push(path);
        }
    }
    Ok(())
}

/// `true` for paths with an `xml` extension, in any case.
pub(crate) fn is_policy_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("xml"))
        .unwrap_or(false)
}

/// Read every policy under `dir`. Any parse failure aborts the whole read.
pub(crate) fn read_policies(dir: &Path) -> PolicyResult<Vec<PolicyDocument>> {
    policy_files(dir)?
        .into_iter()
        .map(PolicyDocument::from_file)
        .collect()
}
