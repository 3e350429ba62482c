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
//! The backup session: signatures out, deltas back, patch + increment.
//!
//! The whole session is one pull chain. The tree reducer pulls diff records;
//! the diff stage pulls signatures; the signature stage pulls collated pairs
//! out of the CCPP, which commits metadata as rows fall out of its cache.
//! Flush tokens are first-class stream items emitted at a fixed cadence so
//! the local pipeline keeps the exact shape of the remote one.

use anyhow::{Context, Result};
use colored::Colorize;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::cache::Ccpp;
use crate::collate::Collated;
use crate::config::SessionConfig;
use crate::errors::ErrorLog;
use crate::increments::SessionTime;
use crate::output::OutputCtx;
use crate::patch::PatchBranch;
use crate::record::{chmod, Attached, Index, Payload, Record};
use crate::reducer::TreeReducer;
use crate::repo::Repo;
use crate::rolling::{self, Signature};
use crate::stats::{FileStats, SessionStats};
use crate::utils;
use crate::walk;

/// A stream element: either a record-bearing item or a flush token that must
/// round-trip the pipeline unchanged.
pub enum StreamItem<T> {
    Flush,
    Item(T),
}

/// Destination-side signature of one changed entry.
pub struct SigRecord {
    pub record: Record,
    pub signature: Option<Signature>,
    /// Source entry is a hard link to this earlier index; no payload needed.
    pub linked: Option<Index>,
}

// ─── Signature stage (repository side) ─────────────────────────────────────

struct SigStream {
    ccpp: Rc<RefCell<Ccpp>>,
    mirror_root: PathBuf,
    cfg: SessionConfig,
    since_flush: usize,
}

impl SigStream {
    fn next(&mut self) -> Result<Option<StreamItem<SigRecord>>> {
        loop {
            if self.since_flush >= self.cfg.flush_threshold() {
                self.since_flush = 0;
                return Ok(Some(StreamItem::Flush));
            }
            let pair = self.ccpp.borrow_mut().next_pair()?;
            let Some((source, dest)) = pair else {
                return Ok(None);
            };
            self.since_flush += 1;

            let unchanged = match (&source, &dest) {
                (Some(s), Some(d)) => {
                    s.equal_content(d, true)
                        && (!self.cfg.preserve_hardlinks
                            || self
                                .ccpp
                                .borrow()
                                .hardlinks
                                .record_eq(Some(s), Some(d)))
                }
                _ => false,
            };
            if unchanged {
                continue;
            }

            let index = source
                .as_ref()
                .map(|r| r.index.clone())
                .or_else(|| dest.as_ref().map(|r| r.index.clone()))
                .expect("pair with no index");
            if let Some(sig) = self.one_sig(&index, source.as_ref(), dest.as_ref())? {
                self.ccpp.borrow_mut().flag_changed(&index);
                return Ok(Some(StreamItem::Item(sig)));
            }
            // signature failed fatally for this file; leave it untouched
        }
    }

    fn one_sig(
        &mut self,
        index: &Index,
        source: Option<&Record>,
        dest: Option<&Record>,
    ) -> Result<Option<SigRecord>> {
        if self.cfg.preserve_hardlinks {
            if let Some(src) = source {
                let linked = {
                    let ccpp = self.ccpp.borrow();
                    ccpp.hardlinks
                        .is_linked(src)
                        .then(|| ccpp.hardlinks.link_index(src))
                        .flatten()
                };
                if let Some(first) = linked {
                    return Ok(Some(SigRecord {
                        record: Record::absent(index.clone()),
                        signature: None,
                        linked: Some(first),
                    }));
                }
            }
        }
        match dest {
            Some(d) if d.is_reg() => {
                let path = index.to_path(&self.mirror_root);
                match self.sig_of_mirror_file(&path, d)? {
                    Some(sig) => Ok(Some(SigRecord {
                        record: d.bare_clone(),
                        signature: Some(sig),
                        linked: None,
                    })),
                    None => Ok(None),
                }
            }
            Some(d) => Ok(Some(SigRecord {
                record: d.bare_clone(),
                signature: None,
                linked: None,
            })),
            None => Ok(Some(SigRecord {
                record: Record::absent(index.clone()),
                signature: None,
                linked: None,
            })),
        }
    }

    /// Open the mirror file for signing, with the permission dance: a file
    /// we own but cannot read gets `u+r` permanently (so the diffs stay
    /// stable), and one retry after chmod covers network filesystems that
    /// only honor the new mode on a fresh open.
    fn sig_of_mirror_file(&mut self, path: &Path, dest: &Record) -> Result<Option<Signature>> {
        let perms = dest.perms.unwrap_or(0);
        if !self.cfg.is_root()
            && perms & 0o400 == 0
            && dest.uid == Some(self.cfg.process_uid)
        {
            let _ = chmod(path, 0o400 | perms);
        }
        match File::open(path) {
            Ok(f) => Ok(Some(rolling::signature(BufReader::new(f))?)),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                let _ = chmod(path, 0o400 | perms);
                match File::open(path) {
                    Ok(f) => Ok(Some(rolling::signature(BufReader::new(f))?)),
                    Err(e2) => {
                        self.ccpp
                            .borrow_mut()
                            .errlog
                            .file_error("PermError", path, e2);
                        Ok(None)
                    }
                }
            }
            Err(e) => {
                self.ccpp
                    .borrow_mut()
                    .errlog
                    .file_error("UpdateError", path, e);
                Ok(None)
            }
        }
    }
}

// ─── Delta stage (source side) ─────────────────────────────────────────────

struct DiffStream {
    sigs: SigStream,
    source_root: PathBuf,
}

impl DiffStream {
    /// Turn one signature into a diff record with attached payload. The
    /// source is freshly stat'ed: a file that changed since the walk will be
    /// caught by the verify step on the repository side.
    fn next(&mut self) -> Result<Option<Record>> {
        loop {
            match self.sigs.next()? {
                None => return Ok(None),
                Some(StreamItem::Flush) => continue, // round-trips, absorbed locally
                Some(StreamItem::Item(sig)) => {
                    let index = sig.record.index.clone();
                    let path = index.to_path(&self.source_root);
                    let mut rec = match Record::from_path(&path, index.clone()) {
                        Ok(r) => r,
                        Err(e) => {
                            self.sigs
                                .ccpp
                                .borrow_mut()
                                .errlog
                                .file_error("ListError", &path, e);
                            Record::absent(index)
                        }
                    };
                    if let Some(first) = sig.linked {
                        rec.linked_to = Some(first);
                        return Ok(Some(rec));
                    }
                    match (&sig.signature, rec.is_reg()) {
                        (Some(s), true) => match delta_of(s, &path) {
                            Ok(delta) => {
                                rec.attached = Attached::Diff;
                                rec.payload = Some(Payload::Delta(delta));
                            }
                            Err(e) => {
                                self.sigs
                                    .ccpp
                                    .borrow_mut()
                                    .errlog
                                    .file_error("UpdateError", &path, e);
                                rec.attached = Attached::Snapshot;
                                rec.payload = Some(Payload::File(path));
                            }
                        },
                        _ => {
                            rec.attached = Attached::Snapshot;
                            if rec.is_reg() {
                                rec.payload = Some(Payload::File(path));
                            }
                        }
                    }
                    return Ok(Some(rec));
                }
            }
        }
    }
}

fn delta_of(sig: &Signature, path: &Path) -> Result<Vec<u8>> {
    let f = File::open(path).with_context(|| format!("Cannot open {}", path.display()))?;
    rolling::delta(sig, BufReader::new(f))
}

// ─── Fill-in stage ─────────────────────────────────────────────────────────

/// Insert directory records for unchanged ancestors, taken from the mirror,
/// so the tree reducer's begin/end hooks fire for every level of the path.
struct FillIn {
    inner: DiffStream,
    mirror_root: PathBuf,
    covered: Vec<Index>,
    queue: VecDeque<Record>,
}

impl FillIn {
    fn new(inner: DiffStream, mirror_root: &Path) -> Self {
        FillIn {
            inner,
            mirror_root: mirror_root.to_path_buf(),
            covered: Vec::new(),
            queue: VecDeque::new(),
        }
    }

    fn next(&mut self) -> Result<Option<Record>> {
        if let Some(rec) = self.queue.pop_front() {
            return Ok(Some(rec));
        }
        let Some(rec) = self.inner.next()? else {
            return Ok(None);
        };
        self.covered.retain(|p| p.is_prefix_of(&rec.index));
        for k in 0..rec.index.len() {
            let prefix = Index(rec.index.0[..k].to_vec());
            if self.covered.iter().any(|c| *c == prefix) {
                continue;
            }
            let filler = Record::from_path(&prefix.to_path(&self.mirror_root), prefix.clone())?;
            if filler.is_dir() {
                self.queue.push_back(filler);
                self.covered.push(prefix);
            }
        }
        if rec.is_dir() {
            self.covered.push(rec.index.clone());
        }
        self.queue.push_back(rec);
        Ok(self.queue.pop_front())
    }
}

// ─── Session controller ────────────────────────────────────────────────────

pub struct BackupOptions {
    pub cfg: SessionConfig,
    pub excludes: Vec<String>,
}

/// Run one backup session; returns the exit-code bitset.
pub fn backup(
    source: &Path,
    repo_root: &Path,
    opts: &BackupOptions,
    out: &OutputCtx,
) -> Result<i32> {
    anyhow::ensure!(
        source.is_dir(),
        "source directory does not exist: {}",
        source.display()
    );
    let repo = Repo::new(repo_root);
    fs::create_dir_all(repo.data_dir())
        .with_context(|| format!("Cannot create {}", repo.data_dir().display()))?;
    repo.check_single_marker()?;

    let cfg = opts.cfg.clone();
    let prev_time = repo.markers()?.first().map(|m| m.time);
    let t_new = cfg
        .current_time
        .map(SessionTime::from_unix)
        .unwrap_or_else(SessionTime::now);
    if let Some(prev) = prev_time {
        anyhow::ensure!(
            t_new > prev,
            "session time {} is not after the previous session {}",
            t_new,
            prev
        );
    }
    let incremental = prev_time.is_some();

    out.println(&format!(
        "{} {} → {}  (session {})",
        "Backing up:".cyan().bold(),
        source.display().to_string().yellow(),
        repo_root.display().to_string().yellow(),
        t_new.to_string().green(),
    ));

    // the new marker precedes any mirror mutation, first session included;
    // an aborted run must always be visible on the next startup
    repo.touch_marker(t_new)?;
    if incremental {
        fs::create_dir_all(repo.inc_root())?;
    }

    let mut errlog = ErrorLog::open(Some(&repo.error_log_path(t_new)))?;

    // source walk and destination records (previous metadata, else mirror)
    let excludes = walk::build_globset(&opts.excludes)?;
    let source_recs = walk::walk_tree(source, &excludes, Some(crate::repo::DATA_DIR), &mut errlog)?;
    let dest_recs: Vec<Record> = match prev_time {
        Some(prev) => match repo.store().get_at_time(prev, None) {
            Ok(Some(recs)) => recs,
            Ok(None) => {
                errlog.warning("mirror metadata not found, reading from directory");
                walk::walk_tree(
                    repo.root(),
                    &walk::build_globset(&[])?,
                    Some(crate::repo::DATA_DIR),
                    &mut errlog,
                )?
            }
            Err(e) => {
                // an aborted first session can leave a truncated snapshot;
                // the mirror itself is still the truth
                errlog.warning(format!("mirror metadata unreadable ({e}), reading from directory"));
                walk::walk_tree(
                    repo.root(),
                    &walk::build_globset(&[])?,
                    Some(crate::repo::DATA_DIR),
                    &mut errlog,
                )?
            }
        },
        None => walk::walk_tree(
            repo.root(),
            &walk::build_globset(&[])?,
            Some(crate::repo::DATA_DIR),
            &mut errlog,
        )?,
    };

    let mut collated = Collated::new(source_recs.into_iter(), dest_recs.into_iter());
    let meta_writer = repo.store().writer(t_new)?;
    let file_stats = FileStats::create(&repo.file_statistics_path(t_new))?;
    let ccpp = Rc::new(RefCell::new(Ccpp::new(
        Box::new(move || collated.next_pair()),
        cfg.clone(),
        repo.root(),
        meta_writer,
        SessionStats::new(utils::now()),
        Some(file_stats),
        errlog,
    )));

    let sigs = SigStream {
        ccpp: ccpp.clone(),
        mirror_root: repo.root().to_path_buf(),
        cfg: cfg.clone(),
        since_flush: 0,
    };
    let diffs = DiffStream {
        sigs,
        source_root: source.to_path_buf(),
    };
    let mut stream = FillIn::new(diffs, repo.root());

    let inc_root = repo.inc_root();
    // increments are stamped with the previous session time: they hold the
    // state the mirror had back then
    let inc_time = prev_time.unwrap_or(t_new);
    let mut reducer = TreeReducer::new(|| {
        PatchBranch::new(
            repo.root(),
            incremental.then_some(inc_root.as_path()),
            ccpp.clone(),
            cfg.clone(),
            inc_time,
        )
    });

    while let Some(rec) = stream.next()? {
        reducer.process(&rec)?;
    }
    reducer.finish()?;

    let ret = {
        let mut c = ccpp.borrow_mut();
        c.close()?;
        // metadata is final: compact the previous snapshot into a reverse
        // diff before anything else is flushed
        repo.store().convert_newest_to_diff()?;
        c.stats.end_time = utils::now();
        c.stats.errors = c.errlog.file_errors;
        c.stats.write(&repo.session_statistics_path(t_new))?;
        out.println(&format!("  {}", c.stats.summary().dimmed()));
        c.errlog.ret_code()
    };

    if cfg.fsync {
        let _ = utils::fsync_file_and_dir(&repo.data_dir());
    }
    // the first session wrote the repository's only marker up front; every
    // later one now retires the previous session's
    if incremental {
        repo.remove_older_marker()?;
    }

    out.println(&format!(
        "  {} session {}",
        "Backup complete:".green().bold(),
        t_new.to_string().yellow()
    ));
    Ok(ret)
}
