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
//! Mirror metadata store — a time-indexed log of path records.
//!
//! The newest session is a full snapshot (`mirror_metadata.<t>.snapshot.gz`,
//! JSON lines with a blake3 companion); each older session is a reverse diff
//! against the next newer one. A diff holds the records that differed at the
//! older time plus `absent` markers for entries that did not yet exist.

use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::increments::{self, IncFile, IncKind, SessionTime};
use crate::record::{Index, Record};

pub const META_BASE: &str = "mirror_metadata";

pub struct MetadataStore {
    data_dir: PathBuf,
}

impl MetadataStore {
    pub fn new(data_dir: &Path) -> Self {
        MetadataStore {
            data_dir: data_dir.to_path_buf(),
        }
    }

    fn files(&self) -> Result<Vec<IncFile>> {
        increments::list_inc_files(&self.data_dir, META_BASE)
    }

    /// All session times covered by the metadata chain, ascending.
    pub fn enumerate_times(&self) -> Result<Vec<SessionTime>> {
        let mut times: Vec<SessionTime> = self.files()?.iter().map(|f| f.time).collect();
        times.dedup();
        Ok(times)
    }

    /// Open an append handle for the snapshot at `time`.
    pub fn writer(&self, time: SessionTime) -> Result<MetaWriter> {
        let name = increments::make_inc_name(META_BASE, time, IncKind::Snapshot, true);
        MetaWriter::create(self.data_dir.join(name))
    }

    /// Records at (or under `prefix` of) the snapshot at exactly time `t`,
    /// in index order. `Ok(None)` when the chain does not cover `t`.
    pub fn get_at_time(&self, t: SessionTime, prefix: Option<&Index>) -> Result<Option<Vec<Record>>> {
        let files = self.files()?;

        // Prefer a snapshot file at the exact time (mid-session there are
        // two snapshots; an aborted session leaves the older one intact).
        let snapshot = files
            .iter()
            .filter(|f| f.kind == IncKind::Snapshot && f.time >= t)
            .min_by_key(|f| f.time);
        let Some(snapshot) = snapshot else {
            return Ok(None);
        };

        let mut state = load_record_map(snapshot)?;
        if snapshot.time > t {
            // walk the reverse-diff chain down to t
            let mut diffs: Vec<&IncFile> = files
                .iter()
                .filter(|f| f.kind == IncKind::Diff && f.time >= t && f.time < snapshot.time)
                .collect();
            diffs.sort_by(|a, b| b.time.cmp(&a.time));
            if diffs.last().map(|d| d.time) != Some(t) {
                return Ok(None); // chain never reaches the requested time
            }
            for diff in diffs {
                apply_diff(&mut state, diff)?;
            }
        }

        let recs = state
            .into_values()
            .filter(|r| prefix.map_or(true, |p| p.is_prefix_of(&r.index)))
            .collect();
        Ok(Some(recs))
    }

    /// Compact the previous full snapshot into a reverse diff against the
    /// newly written one. Invoked at the end of a successful session.
    pub fn convert_newest_to_diff(&self) -> Result<()> {
        let files = self.files()?;
        let mut snapshots: Vec<&IncFile> = files
            .iter()
            .filter(|f| f.kind == IncKind::Snapshot)
            .collect();
        if snapshots.len() < 2 {
            return Ok(()); // first session, nothing to compact
        }
        snapshots.sort_by(|a, b| a.time.cmp(&b.time));
        let old = snapshots[snapshots.len() - 2];
        let new = snapshots[snapshots.len() - 1];

        let old_state = match load_record_map(old) {
            Ok(state) => state,
            Err(_) => {
                // a snapshot that cannot be read (aborted first session) can
                // never serve a restore either; drop it rather than wedge
                // every later session on it
                fs::remove_file(&old.path)?;
                let _ = fs::remove_file(companion_path(&old.path));
                return Ok(());
            }
        };
        let new_state = load_record_map(new)?;

        let mut diff_records: Vec<&Record> = Vec::new();
        let mut absent_markers: Vec<Record> = Vec::new();
        for (idx, old_rec) in &old_state {
            match new_state.get(idx) {
                Some(new_rec) if records_identical(old_rec, new_rec) => {}
                _ => diff_records.push(old_rec),
            }
        }
        for idx in new_state.keys() {
            if !old_state.contains_key(idx) {
                absent_markers.push(Record::absent(idx.clone()));
            }
        }

        let diff_name = increments::make_inc_name(META_BASE, old.time, IncKind::Diff, true);
        let mut writer = MetaWriter::create(self.data_dir.join(diff_name))?;
        let mut all: Vec<&Record> = diff_records;
        all.extend(absent_markers.iter());
        all.sort_by(|a, b| a.index.cmp(&b.index));
        for rec in all {
            writer.write(rec)?;
        }
        writer.close()?;

        fs::remove_file(&old.path)
            .with_context(|| format!("Cannot remove old snapshot {}", old.path.display()))?;
        let _ = fs::remove_file(companion_path(&old.path));
        Ok(())
    }

    /// Drop every metadata file carrying exactly time `t` (used by regress
    /// and by remove-older-than).
    pub fn remove_at_time(&self, t: SessionTime) -> Result<()> {
        for f in self.files()? {
            if f.time == t {
                fs::remove_file(&f.path)?;
                let _ = fs::remove_file(companion_path(&f.path));
            }
        }
        Ok(())
    }
}

/// Attribute-level identity, used when diffing two metadata snapshots.
fn records_identical(a: &Record, b: &Record) -> bool {
    a.equal_content(b, true)
        && a.sha256 == b.sha256
        && a.size == b.size
        && a.inode == b.inode
        && a.nlink == b.nlink
}

fn companion_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".b3");
    PathBuf::from(s)
}

fn load_record_map(file: &IncFile) -> Result<BTreeMap<Index, Record>> {
    verify_companion(file)?;
    let mut map = BTreeMap::new();
    let reader = BufReader::new(increments::open_inc_reader(file)?);
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let rec: Record = serde_json::from_str(&line)
            .with_context(|| format!("Corrupt metadata line in {}", file.path.display()))?;
        if !rec.index.is_safe() && !rec.index.is_root() {
            anyhow::bail!("unsafe path in metadata: {}", rec.index);
        }
        map.insert(rec.index.clone(), rec);
    }
    Ok(map)
}

fn apply_diff(state: &mut BTreeMap<Index, Record>, diff: &IncFile) -> Result<()> {
    for (idx, rec) in load_record_map(diff)? {
        if rec.exists() {
            state.insert(idx, rec);
        } else {
            state.remove(&idx);
        }
    }
    Ok(())
}

/// Verify the blake3 companion, when one exists, against the raw file bytes.
fn verify_companion(file: &IncFile) -> Result<()> {
    let b3 = companion_path(&file.path);
    if !b3.exists() {
        return Ok(());
    }
    let stored = fs::read_to_string(&b3)?;
    let actual = blake3::hash(&fs::read(&file.path)?);
    if actual.to_hex().as_str() != stored.trim() {
        anyhow::bail!(
            "Metadata integrity check FAILED for {}",
            file.path.display()
        );
    }
    Ok(())
}

// ─── Writer ────────────────────────────────────────────────────────────────

/// Append handle over one metadata file: gzipped JSON lines, blake3 of the
/// compressed bytes in a `.b3` companion written at close.
pub struct MetaWriter {
    path: PathBuf,
    enc: Option<GzEncoder<BufWriter<File>>>,
    pub records_written: u64,
}

impl MetaWriter {
    fn create(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let f = File::create(&path)
            .with_context(|| format!("Cannot create metadata file {}", path.display()))?;
        Ok(MetaWriter {
            path,
            enc: Some(GzEncoder::new(BufWriter::new(f), Compression::default())),
            records_written: 0,
        })
    }

    pub fn write(&mut self, rec: &Record) -> Result<()> {
        let line = serde_json::to_string(&rec.bare_clone())?;
        let enc = self.enc.as_mut().expect("writer already closed");
        enc.write_all(line.as_bytes())?;
        enc.write_all(b"\n")?;
        self.records_written += 1;
        Ok(())
    }

    pub fn close(mut self) -> Result<PathBuf> {
        if let Some(enc) = self.enc.take() {
            enc.finish()?.flush()?;
        }
        let hash = blake3::hash(&fs::read(&self.path)?);
        fs::write(companion_path(&self.path), hash.to_hex().as_str())?;
        Ok(self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FileType;

    fn rec(name: &str, mtime: i64) -> Record {
        let mut r = Record::absent(Index(vec![name.to_string()]));
        r.ftype = FileType::Regular;
        r.size = Some(1);
        r.mtime = Some(mtime);
        r.perms = Some(0o644);
        r
    }

    fn write_snapshot(store: &MetadataStore, t: SessionTime, recs: &[Record]) {
        let mut w = store.writer(t).unwrap();
        for r in recs {
            w.write(r).unwrap();
        }
        w.close().unwrap();
    }

    #[test]
    fn snapshot_roundtrip_in_index_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path());
        let t = SessionTime::from_unix(1000);
        write_snapshot(&store, t, &[rec("a", 1), rec("b", 2)]);

        let got = store.get_at_time(t, None).unwrap().unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].index.to_string(), "a");
        assert_eq!(got[1].index.to_string(), "b");
        assert_eq!(store.enumerate_times().unwrap(), vec![t]);
    }

    #[test]
    fn convert_to_diff_then_read_old_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path());
        let t1 = SessionTime::from_unix(1000);
        let t2 = SessionTime::from_unix(2000);

        // t1: {a@1, b@2}; t2: {a@9 changed, c new}, b deleted
        write_snapshot(&store, t1, &[rec("a", 1), rec("b", 2)]);
        write_snapshot(&store, t2, &[rec("a", 9), rec("c", 3)]);
        store.convert_newest_to_diff().unwrap();

        // only the newest snapshot remains a snapshot
        let snaps: Vec<_> = store
            .files()
            .unwrap()
            .into_iter()
            .filter(|f| f.kind == IncKind::Snapshot)
            .collect();
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].time, t2);

        let now = store.get_at_time(t2, None).unwrap().unwrap();
        let names: Vec<String> = now.iter().map(|r| r.index.to_string()).collect();
        assert_eq!(names, vec!["a", "c"]);

        let old = store.get_at_time(t1, None).unwrap().unwrap();
        let names: Vec<String> = old.iter().map(|r| r.index.to_string()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(old[0].mtime, Some(1));

        // a time outside the chain is not covered
        assert!(store
            .get_at_time(SessionTime::from_unix(1500), None)
            .unwrap()
            .is_none());
    }

    #[test]
    fn prefix_filter_limits_results() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path());
        let t = SessionTime::from_unix(1000);
        let mut sub = rec("x", 1);
        sub.index = Index(vec!["d".into(), "x".into()]);
        let mut d = rec("d", 1);
        d.ftype = FileType::Directory;
        d.size = None;
        write_snapshot(&store, t, &[d, sub, rec("z", 2)]);

        let got = store
            .get_at_time(t, Some(&Index(vec!["d".into()])))
            .unwrap()
            .unwrap();
        let names: Vec<String> = got.iter().map(|r| r.index.to_string()).collect();
        assert_eq!(names, vec!["d", "d/x"]);
    }

    #[test]
    fn companion_detects_tampering() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path());
        let t = SessionTime::from_unix(1000);
        write_snapshot(&store, t, &[rec("a", 1)]);

        let snap = &store.files().unwrap()[0];
        let mut bytes = fs::read(&snap.path).unwrap();
        bytes[0] ^= 0xff;
        fs::write(&snap.path, bytes).unwrap();
        assert!(store.get_at_time(t, None).is_err());
    }
}
