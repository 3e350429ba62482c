use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use crate::errors::ErrorLog;
use crate::record::{Index, Record};

/// Walk a tree and return records in index order (depth-first pre-order with
/// sorted siblings, which is exactly component-wise lexicographic order).
/// The root itself is included with the empty index.
///
/// An unlistable directory is substituted by an empty listing: the directory
/// record itself survives, its children silently don't, and a ListError line
/// lands in the error log.
pub fn walk_tree(
    root: &Path,
    excludes: &GlobSet,
    skip_name: Option<&str>,
    errlog: &mut ErrorLog,
) -> Result<Vec<Record>> {
    let mut out = Vec::new();

    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                let path = e
                    .path()
                    .map(|p| p.to_path_buf())
                    .unwrap_or_else(|| root.to_path_buf());
                errlog.file_error("ListError", &path, &e);
                continue;
            }
        };
        let path = entry.path();
        let rel = path.strip_prefix(root)?;

        if rel.as_os_str().is_empty() {
            out.push(Record::from_path(path, Index::root())?);
            continue;
        }
        let index = match Index::from_rel_path(rel) {
            Some(i) => i,
            None => {
                errlog.file_warning(path, "non-UTF-8 file name skipped");
                continue;
            }
        };
        if let Some(name) = skip_name {
            if index.0.first().map(|c| c.as_str()) == Some(name) {
                continue;
            }
        }
        if excludes.is_match(rel) {
            continue;
        }

        match Record::from_path(path, index) {
            Ok(rec) if rec.exists() => out.push(rec),
            Ok(_) => {} // raced with a deletion, drop it
            Err(e) => errlog.file_error("ListError", path, &e),
        }
    }

    Ok(out)
}

pub fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for p in patterns {
        builder.add(Glob::new(p)?);
    }
    Ok(builder.build()?)
}
