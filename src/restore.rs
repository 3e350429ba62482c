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
//! Restore — compose reverse-diff chains over the mirror and materialize any
//! historical snapshot into a target directory.

use anyhow::{Context, Result};
use colored::Colorize;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::collate::Collated;
use crate::config::SessionConfig;
use crate::errors::{ErrorLog, SessionError};
use crate::increments::{self, IncFile, IncKind, SessionTime};
use crate::output::OutputCtx;
use crate::record::{chmod, copy_attribs, create_special, FileType, Index, Record};
use crate::repo::Repo;
use crate::rolling;
use crate::utils::human;

// ─── Restore file ──────────────────────────────────────────────────────────

/// One mirror entry plus the increments that matter for a given restore
/// time. The relevant chain starts at the newest usable state (mirror or a
/// snapshot increment) and ends with the increment at the restore time.
pub struct RestoreFile {
    pub index: Index,
    pub mirror_path: PathBuf,
    pub inc_base: PathBuf,
    relevant: Vec<RestoreSource>,
}

enum RestoreSource {
    Mirror(PathBuf),
    Inc(IncFile),
}

impl RestoreFile {
    pub fn new(
        index: Index,
        mirror_path: PathBuf,
        inc_base: PathBuf,
        inc_list: Vec<IncFile>,
        restore_time: SessionTime,
        mirror_time: SessionTime,
    ) -> Self {
        let relevant = Self::relevant_incs(&mirror_path, inc_list, restore_time, mirror_time);
        RestoreFile {
            index,
            mirror_path,
            inc_base,
            relevant,
        }
    }

    /// The shortest suffix of history that reaches `restore_time`: newest
    /// first, starting from a full state, every later element a diff.
    fn relevant_incs(
        mirror_path: &Path,
        inc_list: Vec<IncFile>,
        restore_time: SessionTime,
        mirror_time: SessionTime,
    ) -> Vec<RestoreSource> {
        if inc_list.is_empty() || restore_time >= mirror_time {
            return vec![RestoreSource::Mirror(mirror_path.to_path_buf())];
        }
        let mut newer: Vec<IncFile> = inc_list
            .into_iter()
            .filter(|i| i.time >= restore_time)
            .collect();
        newer.sort_by(|a, b| a.time.cmp(&b.time));

        let mut keep = Vec::new();
        for inc in newer {
            let is_diff = inc.kind == IncKind::Diff;
            keep.push(inc);
            if !is_diff {
                break; // a full state terminates the chain going backward
            }
        }
        let mut relevant: Vec<RestoreSource> = Vec::new();
        if keep.is_empty() || keep.last().map(|i| i.kind) == Some(IncKind::Diff) {
            relevant.push(RestoreSource::Mirror(mirror_path.to_path_buf()));
        }
        for inc in keep.into_iter().rev() {
            relevant.push(RestoreSource::Inc(inc));
        }
        relevant
    }

    /// What existed at the restore time, attribute-wise. Only used when the
    /// metadata store is gone; sizes may be off since diffs don't carry them.
    pub fn get_attribs(&self) -> Result<Record> {
        match self.relevant.last() {
            Some(RestoreSource::Mirror(path)) => {
                Record::from_path(path, self.index.clone()).map_err(Into::into)
            }
            Some(RestoreSource::Inc(inc)) => match inc.kind {
                IncKind::Missing => Ok(Record::absent(self.index.clone())),
                IncKind::Dir => {
                    let mut rec = Record::from_path(&inc.path, self.index.clone())?;
                    rec.ftype = FileType::Directory;
                    rec.size = None;
                    Ok(rec)
                }
                _ => {
                    let mut rec = Record::from_path(&inc.path, self.index.clone())?;
                    rec.ftype = FileType::Regular;
                    Ok(rec)
                }
            },
            None => Ok(Record::absent(self.index.clone())),
        }
    }

    /// True when the entry was a directory at the restore time.
    pub fn is_dir_then(&self) -> bool {
        match self.relevant.last() {
            Some(RestoreSource::Mirror(path)) => path.is_dir(),
            Some(RestoreSource::Inc(inc)) => inc.kind == IncKind::Dir,
            None => false,
        }
    }

    /// Reconstruct the file content at the restore time. Any failure
    /// substitutes an empty stream and logs a warning — a broken chain
    /// should not abort a whole restore.
    pub fn restore_reader(&self, errlog: &mut ErrorLog) -> Box<dyn Read> {
        match self.compose() {
            Ok(f) => Box::new(f),
            Err(e) => {
                errlog.file_warning(&self.mirror_path, format!("substituting empty file: {e}"));
                Box::new(io::empty())
            }
        }
    }

    fn compose(&self) -> Result<File> {
        let mut current = self.first_state()?;
        for source in &self.relevant[1..] {
            let RestoreSource::Inc(inc) = source else {
                anyhow::bail!("mirror in the middle of an increment chain");
            };
            anyhow::ensure!(
                inc.kind == IncKind::Diff,
                "increment chain element {} is not a diff",
                inc.path.display()
            );
            let delta = increments::read_inc_bytes(inc)?;
            let mut next = tempfile::tempfile()?;
            current.seek(SeekFrom::Start(0))?;
            rolling::patch(&mut current, &delta, &mut next)?;
            next.seek(SeekFrom::Start(0))?;
            current = next;
        }
        current.seek(SeekFrom::Start(0))?;
        Ok(current)
    }

    /// The newest full state: the mirror file itself, or a snapshot
    /// increment decompressed into an anonymous temp file.
    fn first_state(&self) -> Result<File> {
        match self.relevant.first() {
            Some(RestoreSource::Mirror(path)) => {
                File::open(path).with_context(|| format!("Cannot open {}", path.display()))
            }
            Some(RestoreSource::Inc(inc)) => {
                anyhow::ensure!(
                    inc.kind == IncKind::Snapshot,
                    "increment chain must start from a snapshot, got {}",
                    inc.path.display()
                );
                let mut tmp = tempfile::tempfile()?;
                let mut r = increments::open_inc_reader(inc)?;
                io::copy(&mut r, &mut tmp)?;
                tmp.seek(SeekFrom::Start(0))?;
                Ok(tmp)
            }
            None => Ok(tempfile::tempfile()?),
        }
    }
}

// ─── Permission changer ────────────────────────────────────────────────────

/// Temporarily relaxes mirror permissions so a non-root restore can list and
/// read everything; every elevation is undone as soon as the walk leaves the
/// directory, and at the latest in `finish`.
pub struct PermissionChanger {
    root: PathBuf,
    enabled: bool,
    current: Index,
    /// LIFO of (index, path, original perms) still to restore.
    open: Vec<(Index, PathBuf, u32)>,
    euid: u32,
}

impl PermissionChanger {
    pub fn new(root: &Path, cfg: &SessionConfig) -> Self {
        PermissionChanger {
            root: root.to_path_buf(),
            enabled: !cfg.is_root(),
            current: Index::root(),
            open: Vec::new(),
            euid: cfg.process_uid,
        }
    }

    /// Walk to `index`: restore everything the walk has left, then elevate
    /// each unreadable component from the last common prefix down.
    pub fn descend(&mut self, index: &Index) {
        if !self.enabled {
            return;
        }
        let old = std::mem::replace(&mut self.current, index.clone());
        if index.is_root() || *index <= old {
            return;
        }
        self.restore_left(index);
        let common = (0..old.len().min(index.len()))
            .take_while(|&i| old.0[i] == index.0[i])
            .count();
        for k in common + 1..=index.len() {
            let prefix = Index(index.0[..k].to_vec());
            let path = prefix.to_path(&self.root);
            let Ok(rec) = Record::from_path(&path, prefix.clone()) else {
                continue;
            };
            let perms = rec.perms.unwrap_or(0);
            let owned = rec.uid == Some(self.euid);
            if rec.is_dir() && !(owned && perms & 0o500 == 0o500) {
                self.open.push((prefix, path.clone(), perms));
                let _ = chmod(&path, 0o700 | perms);
            } else if rec.is_reg() && !(owned && perms & 0o400 == 0o400) && owned {
                self.open.push((prefix, path.clone(), perms));
                let _ = chmod(&path, 0o400 | perms);
            }
        }
    }

    fn restore_left(&mut self, index: &Index) {
        while let Some((top_idx, path, perms)) = self.open.last() {
            if !top_idx.is_prefix_of(index) {
                let _ = chmod(path, *perms);
                self.open.pop();
            } else {
                break;
            }
        }
    }

    /// Restore every remaining elevation.
    pub fn finish(&mut self) {
        while let Some((_, path, perms)) = self.open.pop() {
            let _ = chmod(&path, perms);
        }
    }

    /// Restore everything and move the cursor back to the root, so a second
    /// pass over the tree elevates again from the top.
    pub fn rewind(&mut self) {
        self.finish();
        self.current = Index::root();
    }
}

impl Drop for PermissionChanger {
    fn drop(&mut self) {
        self.finish();
    }
}

// ─── RF cache ──────────────────────────────────────────────────────────────

/// Materializes RestoreFiles one directory at a time. Requests must arrive
/// in non-decreasing index order: going backward is a corrupt stream, going
/// forward drops stale entries.
pub struct RfCache {
    mirror_root: PathBuf,
    inc_root: PathBuf,
    restore_time: SessionTime,
    mirror_time: SessionTime,
    list: Vec<RestoreFile>,
    last_filled: Option<Index>,
    pub perm_changer: PermissionChanger,
}

impl RfCache {
    pub fn new(repo: &Repo, restore_time: SessionTime, mirror_time: SessionTime, cfg: &SessionConfig) -> Self {
        RfCache {
            mirror_root: repo.root().to_path_buf(),
            inc_root: repo.inc_root(),
            restore_time,
            mirror_time,
            list: Vec::new(),
            last_filled: None,
            perm_changer: PermissionChanger::new(repo.root(), cfg),
        }
    }

    pub fn root_rf(&self) -> RestoreFile {
        RestoreFile::new(
            Index::root(),
            self.mirror_root.clone(),
            self.inc_root.clone(),
            root_inc_list(&self.inc_root),
            self.restore_time,
            self.mirror_time,
        )
    }

    /// The RestoreFile for `index`, or None when the repository holds no
    /// trace of it (likely corruption; the caller substitutes emptiness).
    pub fn get(&mut self, index: &Index) -> Result<Option<RestoreFile>> {
        loop {
            if self.list.is_empty() && !self.fill_for(index)? {
                return Ok(None);
            }
            let Some(front) = self.list.first() else {
                return Ok(None);
            };
            if front.index == *index {
                self.perm_changer.descend(index);
                return Ok(Some(self.list.remove(0)));
            } else if front.index > *index {
                // request went backward within the directory → missing
                if front.index.parent() == index.parent() || !self.fill_for(index)? {
                    return Ok(None);
                }
            } else {
                self.list.remove(0);
            }
        }
    }

    /// List the parent directory of `index` in both the mirror and the
    /// increments tree, pair entries by basename, and put the resulting
    /// RestoreFiles at the head of the cache.
    fn fill_for(&mut self, index: &Index) -> Result<bool> {
        let Some(parent) = index.parent() else {
            self.list.insert(0, self.root_rf());
            return Ok(true);
        };
        // refuse to list the same directory twice; the entry is just gone
        if self.last_filled.as_ref() == Some(&parent) {
            return Ok(false);
        }
        self.last_filled = Some(parent.clone());
        self.perm_changer.descend(&parent);
        let parent_rf = RestoreFile::new(
            parent.clone(),
            parent.to_path(&self.mirror_root),
            parent.to_path(&self.inc_root),
            Vec::new(),
            self.restore_time,
            self.mirror_time,
        );
        let subs = sub_rfs(&parent_rf, self.restore_time, self.mirror_time)?;
        if subs.is_empty() {
            return Ok(false);
        }
        let mut new_list = subs;
        new_list.append(&mut self.list);
        self.list = new_list;
        Ok(true)
    }
}

/// The root directory's own increments live in the data directory as
/// `increments.<t>.<kind>` beside the increments tree.
fn root_inc_list(inc_root: &Path) -> Vec<IncFile> {
    let (Some(dir), Some(base)) = (inc_root.parent(), inc_root.file_name()) else {
        return Vec::new();
    };
    increments::list_inc_files(dir, &base.to_string_lossy())
        .unwrap_or_default()
        .into_iter()
        .filter(|i| i.kind != IncKind::Data)
        .collect()
}

/// RestoreFiles for every entry under a directory: mirror listing collated
/// with increment groups by basename, in index order.
fn sub_rfs(
    parent: &RestoreFile,
    restore_time: SessionTime,
    mirror_time: SessionTime,
) -> Result<Vec<RestoreFile>> {
    // names present in the mirror directory
    let mut mirror_names: Vec<String> = Vec::new();
    if parent.mirror_path.is_dir() {
        for entry in fs::read_dir(&parent.mirror_path)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if parent.index.is_root() && name == crate::repo::DATA_DIR {
                    continue;
                }
                mirror_names.push(name.to_string());
            }
        }
    }
    // increment groups by basename; plain subdirectories of the increments
    // tree count as (empty) groups so recursion can continue below them
    let mut inc_groups: HashMap<String, Vec<IncFile>> = HashMap::new();
    if parent.inc_base.is_dir() {
        for entry in fs::read_dir(&parent.inc_base)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if let Some(mut inc) = increments::parse_inc_name(&name) {
                if inc.kind != IncKind::Data {
                    inc.path = entry.path();
                    inc_groups.entry(inc.base.clone()).or_default().push(inc);
                    continue;
                }
            }
            if entry.path().is_dir() {
                inc_groups.entry(name).or_default();
            }
        }
    }

    let mut names: Vec<String> = mirror_names;
    names.extend(inc_groups.keys().cloned());
    names.sort();
    names.dedup();

    let mut out = Vec::new();
    for name in names {
        let index = parent.index.join(&name);
        let mut incs = inc_groups.remove(&name).unwrap_or_default();
        incs.sort_by(|a, b| a.time.cmp(&b.time));
        out.push(RestoreFile::new(
            index,
            parent.mirror_path.join(&name),
            parent.inc_base.join(&name),
            incs,
            restore_time,
            mirror_time,
        ));
    }
    Ok(out)
}

// ─── Restore session ───────────────────────────────────────────────────────

pub struct RestoreOptions {
    pub cfg: SessionConfig,
    pub force: bool,
    pub require_metadata: bool,
}

/// Restore the repository state at `requested` into `target`; returns the
/// exit-code bitset.
pub fn restore(
    repo_root: &Path,
    target: &Path,
    requested: SessionTime,
    opts: &RestoreOptions,
    out: &OutputCtx,
) -> Result<i32> {
    let repo = Repo::new(repo_root);
    anyhow::ensure!(
        repo.is_initialized(),
        "{} is not a regressum repository",
        repo_root.display()
    );
    repo.check_single_marker()?;
    let mirror_time = repo.mirror_time()?;
    let restore_time = repo.resolve_restore_time(requested)?;

    out.println(&format!(
        "{} {} @ {} → {}",
        "Restoring:".cyan().bold(),
        repo_root.display().to_string().yellow(),
        restore_time.to_string().green(),
        target.display().to_string().yellow(),
    ));

    let mut errlog = ErrorLog::open(None)?;
    let mut rf_cache = RfCache::new(&repo, restore_time, mirror_time, &opts.cfg);

    // record stream: metadata when possible, mirror walk as a last resort
    let records: Vec<Record> = match repo.store().get_at_time(restore_time, None)? {
        Some(recs) => recs,
        None => {
            if opts.require_metadata {
                return Err(SessionError::MetadataMissing.into());
            }
            errlog.warning("mirror metadata not found, reading from directory");
            records_from_rfs(&mut rf_cache)?
        }
    };

    if target.exists() && fs::read_dir(target).map(|mut d| d.next().is_some()).unwrap_or(false) {
        anyhow::ensure!(
            opts.force,
            "target {} is not empty (use --force to make it match the snapshot)",
            target.display()
        );
    }
    fs::create_dir_all(target)
        .with_context(|| format!("Cannot create target {}", target.display()))?;

    // pair the restored stream against what the target already holds
    let mut target_errlog = ErrorLog::open(None)?;
    let target_recs = crate::walk::walk_tree(
        target,
        &crate::walk::build_globset(&[])?,
        None,
        &mut target_errlog,
    )?;
    let mut collated = Collated::new(records.into_iter(), target_recs.into_iter());

    let mut writer = TargetWriter {
        target: target.to_path_buf(),
        cfg: opts.cfg.clone(),
        links_seen: HashMap::new(),
        deferred_dirs: Vec::new(),
        restored: 0,
        restored_bytes: 0,
    };

    while let Some((restored, existing)) = collated.next_pair()? {
        match (restored, existing) {
            (Some(rec), existing) => {
                if !rec.index.is_safe() && !rec.index.is_root() {
                    errlog.file_error(
                        "UpdateError",
                        &rec.index.to_path(Path::new(".")),
                        "unsafe path in snapshot",
                    );
                    continue;
                }
                writer.write_record(&rec, existing.as_ref(), &mut rf_cache, &mut errlog)?;
            }
            (None, Some(stale)) => {
                // present in the target but not in the snapshot
                writer.remove_stale(&stale);
            }
            (None, None) => {}
        }
    }
    writer.apply_deferred_dirs();
    rf_cache.perm_changer.finish();

    out.println(&format!(
        "  {} {} files ({})",
        "Restored:".green().bold(),
        writer.restored,
        human(writer.restored_bytes),
    ));
    Ok(errlog.ret_code())
}

/// Depth-first record stream built from the filesystem when the metadata
/// store is unavailable.
fn records_from_rfs(cache: &mut RfCache) -> Result<Vec<Record>> {
    let mut out = Vec::new();
    let mut stack = vec![cache.root_rf()];
    while let Some(rf) = stack.pop() {
        let rec = rf.get_attribs()?;
        let is_dir = rf.is_dir_then();
        if rec.exists() || is_dir {
            let mut rec = rec;
            if is_dir {
                rec.ftype = FileType::Directory;
                rec.size = None;
            }
            out.push(rec);
        }
        if is_dir {
            cache.perm_changer.descend(&rf.index);
            let mut subs = sub_rfs(&rf, cache.restore_time, cache.mirror_time)?;
            subs.reverse(); // stack order
            stack.extend(subs);
        }
    }
    cache.perm_changer.rewind();
    out.sort_by(|a, b| a.index.cmp(&b.index));
    Ok(out)
}

// ─── Target writeout ───────────────────────────────────────────────────────

struct TargetWriter {
    target: PathBuf,
    cfg: SessionConfig,
    /// (device, inode) of the source → path already materialized.
    links_seen: HashMap<(u64, u64), PathBuf>,
    deferred_dirs: Vec<(Index, Record)>,
    restored: u64,
    restored_bytes: u64,
}

impl TargetWriter {
    fn write_record(
        &mut self,
        rec: &Record,
        existing: Option<&Record>,
        rf_cache: &mut RfCache,
        errlog: &mut ErrorLog,
    ) -> Result<()> {
        let path = rec.index.to_path(&self.target);
        if rec.index.is_root() {
            self.deferred_dirs.push((rec.index.clone(), rec.bare_clone()));
            return Ok(());
        }

        // clear whatever the target holds unless it already matches
        if let Some(old) = existing {
            if old.is_dir() && rec.is_dir() {
                self.deferred_dirs.push((rec.index.clone(), rec.bare_clone()));
                return Ok(());
            }
            if !rec.is_dir() && rec.equal_content(old, false) {
                // already in place; keep it reachable as a link carrier
                if self.cfg.preserve_hardlinks && rec.nlink.map_or(false, |n| n > 1) {
                    if let Some(key) = rec.inode {
                        self.links_seen.entry(key).or_insert_with(|| path.clone());
                    }
                }
                return Ok(());
            }
            remove_tree(&path);
        }

        match rec.ftype {
            FileType::Directory => {
                fs::create_dir_all(&path)?;
                self.deferred_dirs.push((rec.index.clone(), rec.bare_clone()));
                return Ok(());
            }
            FileType::Regular => {
                if self.cfg.preserve_hardlinks {
                    if let Some(key) = rec.inode.filter(|_| rec.nlink.map_or(false, |n| n > 1)) {
                        if let Some(first) = self.links_seen.get(&key) {
                            fs::hard_link(first, &path)?;
                            self.restored += 1;
                            return Ok(());
                        }
                        self.links_seen.insert(key, path.clone());
                    }
                }
                match rf_cache.get(&rec.index)? {
                    Some(rf) => {
                        let mut reader = rf.restore_reader(errlog);
                        let mut f = File::create(&path)
                            .with_context(|| format!("Cannot write {}", path.display()))?;
                        let n = io::copy(&mut reader, &mut f)?;
                        f.flush()?;
                        self.restored_bytes += n;
                    }
                    None => {
                        errlog.file_warning(&path, "no data found in repository, writing empty file");
                        File::create(&path)?;
                    }
                }
            }
            FileType::Symlink => {
                let target = rec.symlink_target.clone().unwrap_or_default();
                #[cfg(unix)]
                std::os::unix::fs::symlink(&target, &path)
                    .with_context(|| format!("Cannot create symlink {}", path.display()))?;
            }
            FileType::Absent => return Ok(()),
            _ => {
                if let Err(e) = create_special(rec, &path) {
                    errlog.file_error("SpecialFileError", &path, e);
                    let _ = File::create(&path); // placeholder
                }
            }
        }
        let _ = copy_attribs(rec, &path);
        self.restored += 1;
        Ok(())
    }

    fn remove_stale(&mut self, stale: &Record) {
        if stale.index.is_root() {
            return;
        }
        let path = stale.index.to_path(&self.target);
        remove_tree(&path);
    }

    /// Directory attributes go on last, deepest first, so children cannot
    /// perturb their parents' mtimes afterwards.
    fn apply_deferred_dirs(&mut self) {
        self.deferred_dirs.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, rec) in &self.deferred_dirs {
            let path = rec.index.to_path(&self.target);
            let _ = copy_attribs(rec, &path);
        }
    }
}

fn remove_tree(path: &Path) {
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

#[cfg(test)]
mod tests {
    use super::*;

    fn inc(base: &str, t: i64, kind: IncKind) -> IncFile {
        IncFile {
            path: PathBuf::from(format!("/inc/{}.{}.x", base, t)),
            base: base.to_string(),
            time: SessionTime::from_unix(t),
            kind,
            gz: false,
        }
    }

    fn kinds(rf: &RestoreFile) -> Vec<String> {
        rf.relevant
            .iter()
            .map(|s| match s {
                RestoreSource::Mirror(_) => "mirror".to_string(),
                RestoreSource::Inc(i) => format!("{}@{}", i.kind.suffix(), i.time.unix()),
            })
            .collect()
    }

    fn rf_with(incs: Vec<IncFile>, restore: i64, mirror: i64) -> RestoreFile {
        RestoreFile::new(
            Index(vec!["f".into()]),
            PathBuf::from("/mirror/f"),
            PathBuf::from("/inc/f"),
            incs,
            SessionTime::from_unix(restore),
            SessionTime::from_unix(mirror),
        )
    }

    #[test]
    fn mirror_alone_when_restoring_now_or_no_incs() {
        let rf = rf_with(vec![], 500, 3000);
        assert_eq!(kinds(&rf), vec!["mirror"]);
        let rf = rf_with(vec![inc("f", 1000, IncKind::Diff)], 3000, 3000);
        assert_eq!(kinds(&rf), vec!["mirror"]);
    }

    #[test]
    fn all_diff_chain_terminates_at_mirror() {
        let rf = rf_with(
            vec![inc("f", 1000, IncKind::Diff), inc("f", 2000, IncKind::Diff)],
            1000,
            3000,
        );
        assert_eq!(kinds(&rf), vec!["mirror", "diff@2000", "diff@1000"]);
    }

    #[test]
    fn snapshot_terminates_chain_early() {
        let rf = rf_with(
            vec![
                inc("f", 1000, IncKind::Diff),
                inc("f", 2000, IncKind::Snapshot),
                inc("f", 2500, IncKind::Diff),
            ],
            1000,
            3000,
        );
        // ascending: diff@1000, snapshot@2000 → stop; reversed with the
        // snapshot first, diff@2500 never needed
        assert_eq!(kinds(&rf), vec!["snapshot@2000", "diff@1000"]);
    }

    #[test]
    fn increments_older_than_restore_time_are_ignored() {
        let rf = rf_with(
            vec![inc("f", 500, IncKind::Snapshot), inc("f", 2000, IncKind::Missing)],
            1500,
            3000,
        );
        assert_eq!(kinds(&rf), vec!["missing@2000"]);
        assert!(!rf.get_attribs().unwrap().exists());
    }
}
