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
//! Cache-collated post-processor (CCPP).
//!
//! A bounded FIFO over collated `(source, dest)` pairs. The patcher needs the
//! original records after the diff arrives; metadata may only be committed
//! once a file is known to be processed; unreadable destination directories
//! must be relaxed before entry and restored after leaving. All three
//! concerns meet here: a row is inserted when the pair is handed out, flagged
//! by the signature and patch stages, and committed exactly once on eviction.

use anyhow::Result;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use crate::collate::Pair;
use crate::config::SessionConfig;
use crate::errors::ErrorLog;
use crate::hardlink::HardlinkTracker;
use crate::meta::MetaWriter;
use crate::record::{chmod, Index, Record};
use crate::stats::{FileStats, SessionStats};

/// Outcome of one in-flight row.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Success {
    #[default]
    Pending,
    Updated,
    Deleted,
}

#[derive(Debug, Default)]
struct Row {
    source: Option<Record>,
    dest: Option<Record>,
    changed: bool,
    success: Success,
    inc: Option<crate::increments::IncFile>,
}

type PairSource = Box<dyn FnMut() -> Result<Option<Pair>>>;

pub struct Ccpp {
    next_fn: PairSource,
    cfg: SessionConfig,
    dest_root: PathBuf,
    cache: HashMap<Index, Row>,
    order: VecDeque<Index>,
    cache_size: usize,
    /// Ancestor directories whose children are still in flight.
    parents: Vec<(Index, (Option<Record>, Option<Record>))>,
    /// Directories whose perms were relaxed, LIFO, with the perms to restore.
    dir_perms: Vec<(Index, PathBuf, u32)>,
    pub hardlinks: HardlinkTracker,
    meta: Option<MetaWriter>,
    pub stats: SessionStats,
    file_stats: Option<FileStats>,
    pub errlog: ErrorLog,
}

impl Ccpp {
    pub fn new(
        next_fn: PairSource,
        cfg: SessionConfig,
        dest_root: &Path,
        meta: MetaWriter,
        stats: SessionStats,
        file_stats: Option<FileStats>,
        errlog: ErrorLog,
    ) -> Self {
        let cache_size = cfg.cache_size();
        Ccpp {
            next_fn,
            cfg,
            dest_root: dest_root.to_path_buf(),
            cache: HashMap::new(),
            order: VecDeque::new(),
            cache_size,
            parents: Vec::new(),
            dir_perms: Vec::new(),
            hardlinks: HardlinkTracker::new(),
            meta: Some(meta),
            stats,
            file_stats,
            errlog,
        }
    }

    /// Pull the next collated pair, register it in the cache, and evict the
    /// oldest row once capacity is exceeded. Insertion order is index order,
    /// so eviction order is too.
    pub fn next_pair(&mut self) -> Result<Option<Pair>> {
        let Some((source, dest)) = (self.next_fn)()? else {
            return Ok(None);
        };
        self.pre_process(source.as_ref(), dest.as_ref());

        let index = source
            .as_ref()
            .map(|r| r.index.clone())
            .or_else(|| dest.as_ref().map(|r| r.index.clone()))
            .expect("collated pair with both sides absent");
        self.cache.insert(
            index.clone(),
            Row {
                source: source.clone(),
                dest: dest.clone(),
                ..Default::default()
            },
        );
        self.order.push_back(index);

        if self.order.len() > self.cache_size {
            self.evict_one()?;
        }
        Ok(Some((source, dest)))
    }

    fn pre_process(&mut self, source: Option<&Record>, dest: Option<&Record>) {
        if self.cfg.preserve_hardlinks {
            self.hardlinks.add(source, dest);
        }
        // Relax unreadable destination directories before the walk enters
        // them; remember the perms the directory should end up with.
        if let Some(d) = dest {
            if d.is_dir() && !self.cfg.is_root() {
                let perms = d.perms.unwrap_or(0);
                if perms & 0o700 < 0o700 {
                    let path = d.index.to_path(&self.dest_root);
                    if chmod(&path, 0o700 | perms).is_ok() {
                        if let Some(s) = source.filter(|s| s.is_dir()) {
                            self.dir_perms.push((
                                d.index.clone(),
                                path,
                                s.perms.unwrap_or(perms),
                            ));
                        }
                    }
                }
            }
        }
    }

    pub fn in_cache(&self, index: &Index) -> bool {
        self.cache.contains_key(index)
    }

    pub fn flag_changed(&mut self, index: &Index) {
        if let Some(row) = self.cache.get_mut(index) {
            row.changed = true;
        }
    }

    pub fn flag_success(&mut self, index: &Index) {
        if let Some(row) = self.cache.get_mut(index) {
            row.success = Success::Updated;
        }
    }

    pub fn flag_deleted(&mut self, index: &Index) {
        if let Some(row) = self.cache.get_mut(index) {
            row.success = Success::Deleted;
        }
    }

    pub fn set_inc(&mut self, index: &Index, inc: crate::increments::IncFile) {
        if let Some(row) = self.cache.get_mut(index) {
            row.inc = Some(inc);
        }
    }

    /// `(source, dest)` for a live row, falling back to the parent cache for
    /// ancestors already evicted.
    pub fn get_records(&self, index: &Index) -> (Option<Record>, Option<Record>) {
        if let Some(row) = self.cache.get(index) {
            return (row.source.clone(), row.dest.clone());
        }
        for (pidx, pair) in self.parents.iter().rev() {
            if pidx == index {
                return pair.clone();
            }
        }
        (None, None)
    }

    pub fn get_source_record(&self, index: &Index) -> Option<Record> {
        self.get_records(index).0
    }

    pub fn get_mirror_record(&self, index: &Index) -> Option<Record> {
        self.get_records(index).1
    }

    /// Attach a freshly computed content hash to the cached source record so
    /// it lands in the metadata on eviction.
    pub fn update_hash(&mut self, index: &Index, sha256: &str) {
        if let Some(row) = self.cache.get_mut(index) {
            if let Some(src) = row.source.as_mut() {
                src.sha256 = Some(sha256.to_string());
                if self.cfg.preserve_hardlinks && src.has_multiple_links() {
                    self.hardlinks.set_sha256(src, sha256);
                }
            }
        }
    }

    /// Give a hard-link followup the hash its group carrier computed.
    pub fn update_hardlink_hash(&mut self, diff: &Record) {
        let Some(sha) = self.hardlinks.sha256(diff) else {
            return;
        };
        if let Some(row) = self.cache.get_mut(&diff.index) {
            if let Some(src) = row.source.as_mut() {
                src.sha256 = Some(sha);
            }
        }
    }

    fn evict_one(&mut self) -> Result<()> {
        let Some(index) = self.order.pop_front() else {
            return Ok(());
        };
        let Some(row) = self.cache.remove(&index) else {
            // filesystem duplicate-entry workaround: warn, never error
            self.errlog
                .warning(format!("index {} missing from cache at eviction", index));
            return Ok(());
        };
        self.post_process(&row)?;
        self.reset_dir_perms(&index);
        self.update_parents(index, row);
        Ok(())
    }

    /// Commit metadata and statistics for one finished row. The metadata
    /// source is the destination record when nothing changed, the source
    /// record after a successful update, and nothing at all for a deletion.
    fn post_process(&mut self, row: &Row) -> Result<()> {
        if self.cfg.preserve_hardlinks {
            self.hardlinks.del(row.source.as_ref(), row.dest.as_ref());
        }
        if !row.changed || row.success != Success::Pending {
            if let Some(s) = &row.source {
                self.stats.add_source_file(s);
            }
            if let Some(d) = &row.dest {
                self.stats.add_mirror_file(d);
            }
        }
        if row.success != Success::Pending {
            self.stats
                .add_changed(row.source.as_ref(), row.dest.as_ref());
        }
        if let Some(inc) = &row.inc {
            self.stats.add_increment(inc);
        }

        let meta_rec = match row.success {
            Success::Pending => row.dest.as_ref(),
            Success::Updated => row.source.as_ref(),
            Success::Deleted => None,
        };
        if let Some(rec) = meta_rec.filter(|r| r.exists()) {
            if let Some(w) = self.meta.as_mut() {
                w.write(rec)?;
            }
        }
        if let Some(fs) = self.file_stats.as_mut() {
            fs.update(
                row.source.as_ref(),
                row.dest.as_ref(),
                row.changed,
                row.inc.as_ref(),
            )?;
        }
        Ok(())
    }

    /// Register a directory elevation performed by the patch branch so the
    /// real mode comes back once the walk (or the session) is done with it.
    pub fn push_dir_perms(&mut self, index: &Index, path: &Path, perms: u32) {
        self.dir_perms
            .push((index.clone(), path.to_path_buf(), perms));
    }

    /// Restore relaxed directory perms once the walk has left the subtree.
    fn reset_dir_perms(&mut self, current: &Index) {
        while let Some((dir_index, path, perms)) = self.dir_perms.last() {
            if current > dir_index && !dir_index.is_prefix_of(current) {
                let _ = chmod(path, *perms);
                self.dir_perms.pop();
            } else {
                break;
            }
        }
    }

    /// Keep evicted ancestor directories reachable while later indices may
    /// still be their descendants.
    fn update_parents(&mut self, index: Index, row: Row) {
        let is_dir = row.source.as_ref().map_or(false, |r| r.is_dir())
            || row.dest.as_ref().map_or(false, |r| r.is_dir());
        if !is_dir {
            return;
        }
        self.parents.truncate(index.len());
        self.parents.push((index, (row.source, row.dest)));
    }

    /// Drain the cache (committing every row), restore any remaining
    /// permission elevations, and close the metadata writer. The session
    /// controller converts the store to a reverse diff immediately after
    /// this returns, before statistics are written.
    pub fn close(&mut self) -> Result<()> {
        while !self.order.is_empty() {
            self.evict_one()?;
        }
        while let Some((_, path, perms)) = self.dir_perms.pop() {
            let _ = chmod(&path, perms);
        }
        if let Some(w) = self.meta.take() {
            w.close()?;
        }
        if let Some(fs) = self.file_stats.take() {
            fs.close()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::increments::SessionTime;
    use crate::meta::MetadataStore;
    use crate::record::FileType;

    fn reg(name: &str, mtime: i64) -> Record {
        let mut r = Record::absent(Index(vec![name.to_string()]));
        r.ftype = FileType::Regular;
        r.size = Some(1);
        r.mtime = Some(mtime);
        r.perms = Some(0o644);
        r
    }

    fn make_ccpp(pairs: Vec<Pair>, data_dir: &Path, t: SessionTime) -> Ccpp {
        let store = MetadataStore::new(data_dir);
        let meta = store.writer(t).unwrap();
        let mut iter = pairs.into_iter();
        let mut cfg = SessionConfig::from_config(&crate::config::Config::default());
        cfg.pipeline_depth = 4; // tiny cache to force evictions
        Ccpp::new(
            Box::new(move || Ok(iter.next())),
            cfg,
            Path::new("/nonexistent-dest"),
            meta,
            SessionStats::new(0),
            None,
            ErrorLog::open(None).unwrap(),
        )
    }

    fn drain(ccpp: &mut Ccpp) -> Vec<Index> {
        let mut seen = Vec::new();
        while let Some((s, d)) = ccpp.next_pair().unwrap() {
            seen.push(
                s.map(|r| r.index)
                    .or_else(|| d.map(|r| r.index))
                    .unwrap(),
            );
        }
        seen
    }

    #[test]
    fn metadata_committed_exactly_once_per_surviving_file() {
        let dir = tempfile::tempdir().unwrap();
        let t = SessionTime::from_unix(1000);
        let pairs: Vec<Pair> = vec![
            // unchanged: dest record goes to metadata
            (Some(reg("a", 1)), Some(reg("a", 1))),
            // updated: source record goes to metadata
            (Some(reg("b", 9)), Some(reg("b", 2))),
            // deleted: nothing goes to metadata
            (None, Some(reg("c", 3))),
        ];
        let mut ccpp = make_ccpp(pairs, dir.path(), t);
        drain(&mut ccpp);
        let b = Index(vec!["b".into()]);
        let c = Index(vec!["c".into()]);
        ccpp.flag_changed(&b);
        ccpp.flag_success(&b);
        ccpp.flag_changed(&c);
        ccpp.flag_deleted(&c);
        ccpp.close().unwrap();

        let store = MetadataStore::new(dir.path());
        let recs = store.get_at_time(t, None).unwrap().unwrap();
        let names: Vec<String> = recs.iter().map(|r| r.index.to_string()).collect();
        assert_eq!(names, vec!["a", "b"]);
        let b_rec = recs.iter().find(|r| r.index.to_string() == "b").unwrap();
        assert_eq!(b_rec.mtime, Some(9), "updated row must commit the source");
    }

    #[test]
    fn changed_but_never_flagged_keeps_dest_record() {
        let dir = tempfile::tempdir().unwrap();
        let t = SessionTime::from_unix(1000);
        let pairs: Vec<Pair> = vec![(Some(reg("a", 9)), Some(reg("a", 2)))];
        let mut ccpp = make_ccpp(pairs, dir.path(), t);
        drain(&mut ccpp);
        ccpp.flag_changed(&Index(vec!["a".into()]));
        // patch never flags success (simulated error) → old metadata survives
        ccpp.close().unwrap();

        let recs = MetadataStore::new(dir.path())
            .get_at_time(t, None)
            .unwrap()
            .unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].mtime, Some(2));
    }

    #[test]
    fn eviction_order_is_insertion_order_and_parents_survive() {
        let dir = tempfile::tempdir().unwrap();
        let t = SessionTime::from_unix(1000);
        let mut d = reg("d", 1);
        d.ftype = FileType::Directory;
        d.size = None;
        let mut pairs: Vec<Pair> = vec![(Some(d.clone()), Some(d.clone()))];
        for i in 0..40 {
            let mut r = reg("x", 1);
            r.index = Index(vec!["d".into(), format!("f{:02}", i)]);
            pairs.push((Some(r.clone()), Some(r)));
        }
        let mut ccpp = make_ccpp(pairs, dir.path(), t);
        drain(&mut ccpp);
        // "d" has long been evicted (cache holds 16), but is reachable
        // through the parent cache
        let didx = Index(vec!["d".into()]);
        assert!(!ccpp.in_cache(&didx));
        let (src, _) = ccpp.get_records(&didx);
        assert!(src.is_some_and(|r| r.is_dir()));
        ccpp.close().unwrap();
    }

    #[test]
    fn update_hash_lands_in_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let t = SessionTime::from_unix(1000);
        let pairs: Vec<Pair> = vec![(Some(reg("a", 9)), None)];
        let mut ccpp = make_ccpp(pairs, dir.path(), t);
        drain(&mut ccpp);
        let a = Index(vec!["a".into()]);
        ccpp.flag_changed(&a);
        ccpp.update_hash(&a, "cafe");
        ccpp.flag_success(&a);
        ccpp.close().unwrap();

        let recs = MetadataStore::new(dir.path())
            .get_at_time(t, None)
            .unwrap()
            .unwrap();
        assert_eq!(recs[0].sha256.as_deref(), Some("cafe"));
    }
}
