// ─────────────────────────────────────────────────────────────────────────────
// Regressum v0.2.0
// Copyright 2026 Ankit Chaubey <ankitchaubey.dev@gmail.com>
// github.com/ankit-chaubey
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// All rights reserved 2026.
// ─────────────────────────────────────────────────────────────────────────────
//! Regression — roll an aborted session back to the previous mirror state.
//!
//! An aborted session leaves two current-mirror markers. Every increment it
//! managed to write is stamped with the previous session time and was
//! fsync'd before the mirror entry changed, so replaying those increments
//! over the mirror reconstructs the old state exactly.

use anyhow::{Context, Result};
use colored::Colorize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Seek, SeekFrom};
use std::path::Path;
use walkdir::WalkDir;

use crate::errors::{ErrorLog, SessionError};
use crate::increments::{self, IncFile, IncKind, SessionTime};
use crate::output::OutputCtx;
use crate::record::{copy_attribs, create_special, FileType, Index, Record};
use crate::repo::Repo;
use crate::rolling;

/// Roll the repository back to the older of the two markers; returns the
/// exit-code bitset.
pub fn regress(repo_root: &Path, out: &OutputCtx, dry_run: bool) -> Result<i32> {
    let repo = Repo::new(repo_root);
    let markers = repo.markers()?;
    if markers.len() < 2 {
        anyhow::bail!("nothing to regress: repository has {} marker(s)", markers.len());
    }
    if markers.len() > 2 {
        return Err(SessionError::RepositoryCorrupt(format!(
            "{} current_mirror markers found",
            markers.len()
        ))
        .into());
    }
    let t_old = markers[0].time;
    let t_new = markers[1].time;
    out.println(&format!(
        "{} {} → {}",
        "Regressing:".cyan().bold(),
        t_new.to_string().red(),
        t_old.to_string().green(),
    ));

    let mut errlog = ErrorLog::open(None)?;
    let old_state: BTreeMap<Index, Record> = repo
        .store()
        .get_at_time(t_old, None)?
        .map(|recs| recs.into_iter().map(|r| (r.index.clone(), r)).collect())
        .unwrap_or_else(|| {
            errlog.warning("no metadata for the previous session, regressing by content only");
            BTreeMap::new()
        });

    let session_incs = aborted_session_increments(&repo, t_old)?;
    out.println(&format!(
        "  {} increment(s) from the aborted session",
        session_incs.len()
    ));

    if dry_run {
        for (index, inc) in &session_incs {
            out.dry(&format!("revert {} from {}", index, inc.path.display()));
        }
        return Ok(errlog.ret_code());
    }

    // pass 1, ascending: recreate old directories and contents
    for (index, inc) in &session_incs {
        if inc.kind == IncKind::Missing {
            continue;
        }
        if let Err(e) = revert_entry(&repo, index, inc, old_state.get(index)) {
            errlog.file_error("UpdateError", &index.to_path(repo.root()), e);
        }
    }
    // pass 2, descending: drop entries that did not exist back then
    for (index, inc) in session_incs.iter().rev() {
        if inc.kind != IncKind::Missing {
            continue;
        }
        remove_entry(&index.to_path(repo.root()));
    }
    // attributes last, children before their parents
    for (index, rec) in old_state.iter().rev() {
        if session_incs.iter().any(|(i, _)| i == index) {
            let _ = copy_attribs(rec, &index.to_path(repo.root()));
        }
    }

    remove_stray_temps(repo.root());

    // drop everything the aborted session wrote
    for (_, inc) in &session_incs {
        let _ = fs::remove_file(&inc.path);
    }
    repo.store().remove_at_time(t_new)?;
    let _ = fs::remove_file(repo.session_statistics_path(t_new));
    let _ = fs::remove_file(repo.file_statistics_path(t_new));
    let _ = fs::remove_file(repo.error_log_path(t_new));
    repo.remove_marker_at(t_new)?;

    out.println(&format!(
        "  {} mirror is back at {}",
        "Regression complete:".green().bold(),
        t_old.to_string().yellow()
    ));
    Ok(errlog.ret_code())
}

/// Every increment stamped with the previous session time, in index order.
/// Only the aborted session can have written those: a finished session would
/// have removed the older marker.
fn aborted_session_increments(repo: &Repo, t_old: SessionTime) -> Result<Vec<(Index, IncFile)>> {
    let inc_root = repo.inc_root();
    let mut out: Vec<(Index, IncFile)> = Vec::new();

    // the root's own increments sit next to the increments tree
    for inc in increments::list_inc_files(&repo.data_dir(), crate::repo::INC_BASE)? {
        if inc.time == t_old && inc.kind != IncKind::Data {
            out.push((Index::root(), inc));
        }
    }
    if inc_root.is_dir() {
        for entry in WalkDir::new(&inc_root).follow_links(false).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str() else {
                continue;
            };
            let Some(mut inc) = increments::parse_inc_name(name) else {
                continue;
            };
            if inc.time != t_old || inc.kind == IncKind::Data {
                continue;
            }
            inc.path = entry.path().to_path_buf();
            let rel = entry
                .path()
                .parent()
                .unwrap_or(&inc_root)
                .strip_prefix(&inc_root)
                .unwrap_or(Path::new(""));
            let Some(parent_index) = Index::from_rel_path(rel) else {
                continue;
            };
            out.push((parent_index.join(&inc.base), inc));
        }
    }
    out.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(out)
}

/// Put one mirror entry back into its pre-session state.
fn revert_entry(
    repo: &Repo,
    index: &Index,
    inc: &IncFile,
    old_rec: Option<&Record>,
) -> Result<()> {
    let mirror = index.to_path(repo.root());
    match inc.kind {
        IncKind::Dir => {
            if !mirror.is_dir() {
                remove_entry(&mirror);
                fs::create_dir_all(&mirror)
                    .with_context(|| format!("mkdir {}", mirror.display()))?;
            }
        }
        IncKind::Snapshot => {
            let old_type = old_rec.map(|r| r.ftype).unwrap_or(FileType::Regular);
            remove_entry(&mirror);
            match old_type {
                FileType::Symlink => {
                    let target = String::from_utf8_lossy(&increments::read_inc_bytes(inc)?)
                        .into_owned();
                    #[cfg(unix)]
                    std::os::unix::fs::symlink(&target, &mirror)?;
                }
                t if t.is_special() => {
                    let rec = old_rec.expect("special type implies a metadata record");
                    if create_special(rec, &mirror).is_err() {
                        File::create(&mirror)?; // placeholder, as during backup
                    }
                }
                _ => {
                    let bytes = increments::read_inc_bytes(inc)?;
                    fs::write(&mirror, &bytes)
                        .with_context(|| format!("Cannot write {}", mirror.display()))?;
                }
            }
        }
        IncKind::Diff => {
            // a file whose rename never happened still holds the old bytes
            if let Some(rec) = old_rec {
                if let (Some(want), Ok(have)) =
                    (rec.sha256.as_deref(), file_sha256(&mirror))
                {
                    if want == have {
                        return Ok(());
                    }
                }
            }
            let delta = increments::read_inc_bytes(inc)?;
            let mut basis = File::open(&mirror)
                .with_context(|| format!("Cannot open {}", mirror.display()))?;
            basis.seek(SeekFrom::Start(0))?;
            let tmp = mirror.with_file_name(format!(
                ".regressum.regress.{}.tmp",
                std::process::id()
            ));
            let sha = rolling::patch(
                BufReader::new(basis),
                &delta,
                BufWriter::new(File::create(&tmp)?),
            )?;
            if let Some(want) = old_rec.and_then(|r| r.sha256.as_deref()) {
                if want != sha {
                    let _ = fs::remove_file(&tmp);
                    anyhow::bail!("regressed content does not match recorded hash");
                }
            }
            fs::rename(&tmp, &mirror)?;
        }
        IncKind::Missing | IncKind::Data => {}
    }
    Ok(())
}

fn remove_entry(path: &Path) {
    match fs::symlink_metadata(path) {
        Ok(m) if m.is_dir() => {
            let _ = fs::remove_dir_all(path);
        }
        Ok(_) => {
            let _ = fs::remove_file(path);
        }
        Err(_) => {}
    }
}

/// Drop half-written `.regressum.*.tmp` files the aborted session left
/// beside mirror entries.
fn remove_stray_temps(root: &Path) {
    for entry in WalkDir::new(root).follow_links(false).into_iter().flatten() {
        let name = entry.file_name().to_string_lossy();
        if name.starts_with(".regressum.") && name.ends_with(".tmp") {
            let _ = fs::remove_file(entry.path());
        }
    }
}

fn file_sha256(path: &Path) -> Result<String> {
    use sha2::{Digest, Sha256};
    use std::io::Read;
    let mut hasher = Sha256::new();
    let mut f = BufReader::new(File::open(path)?);
    let mut buf = [0u8; 131072];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
