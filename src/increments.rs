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
//! Increment files — `<base>.<timestamp>.<kind>[.gz]` — and the reverse
//! increment creation policy.

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Local, TimeZone};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use regex::Regex;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::record::{FileType, Record};
use crate::rolling;

// ─── Session timestamps ────────────────────────────────────────────────────

/// Timestamp of one backup session, encoded into every file name the session
/// writes. Ordering compares the instant, not the textual form.
#[derive(Clone, Copy, Debug)]
pub struct SessionTime(pub DateTime<FixedOffset>);

impl SessionTime {
    pub fn now() -> Self {
        SessionTime(Local::now().fixed_offset())
    }

    pub fn from_unix(secs: i64) -> Self {
        let offset = *Local::now().offset();
        SessionTime(offset.timestamp_opt(secs, 0).single().unwrap_or_else(|| {
            FixedOffset::east_opt(0)
                .unwrap()
                .timestamp_opt(0, 0)
                .unwrap()
        }))
    }

    pub fn unix(&self) -> i64 {
        self.0.timestamp()
    }

    /// Compat encoding with `-` substituted for `:` (filesystems that reject
    /// colons).
    pub fn to_compat_string(&self) -> String {
        self.to_string().replace(':', "-")
    }

    /// Parse either the canonical or the compat encoding.
    pub fn parse(s: &str) -> Option<SessionTime> {
        if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%:z") {
            return Some(SessionTime(dt));
        }
        // compat form: restore the colons at fixed positions
        // 2024-03-01T12-30-00+01-00
        let b = s.as_bytes();
        if b.len() >= 19 {
            let mut fixed = s.to_string();
            // positions 13 and 16 are the time separators, never date dashes
            for pos in [13, 16] {
                if b.get(pos) == Some(&b'-') {
                    fixed.replace_range(pos..pos + 1, ":");
                }
            }
            if b.len() >= 25 {
                let zone_colon = b.len() - 3;
                if b.get(zone_colon) == Some(&b'-') {
                    fixed.replace_range(zone_colon..zone_colon + 1, ":");
                }
            }
            if let Ok(dt) = DateTime::parse_from_str(&fixed, "%Y-%m-%dT%H:%M:%S%:z") {
                return Some(SessionTime(dt));
            }
        }
        // bare unix seconds, used by tests and the --at option
        s.parse::<i64>().ok().map(SessionTime::from_unix)
    }
}

/// Canonical encoding: `2024-03-01T12:30:00+01:00`.
impl std::fmt::Display for SessionTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%dT%H:%M:%S%:z"))
    }
}

impl PartialEq for SessionTime {
    fn eq(&self, other: &Self) -> bool {
        self.unix() == other.unix()
    }
}
impl Eq for SessionTime {}
impl PartialOrd for SessionTime {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for SessionTime {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.unix().cmp(&other.unix())
    }
}

// ─── Increment file names ──────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IncKind {
    Snapshot,
    Diff,
    Dir,
    Missing,
    /// Bookkeeping files in the data directory (markers, statistics).
    Data,
}

impl IncKind {
    pub fn suffix(self) -> &'static str {
        match self {
            IncKind::Snapshot => "snapshot",
            IncKind::Diff => "diff",
            IncKind::Dir => "dir",
            IncKind::Missing => "missing",
            IncKind::Data => "data",
        }
    }

    fn parse(s: &str) -> Option<IncKind> {
        match s {
            "snapshot" => Some(IncKind::Snapshot),
            "diff" => Some(IncKind::Diff),
            "dir" => Some(IncKind::Dir),
            "missing" => Some(IncKind::Missing),
            "data" => Some(IncKind::Data),
            _ => None,
        }
    }
}

/// A parsed increment file sitting on disk.
#[derive(Clone, Debug)]
pub struct IncFile {
    pub path: PathBuf,
    pub base: String,
    pub time: SessionTime,
    pub kind: IncKind,
    pub gz: bool,
}

fn inc_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<base>.+)\.(?P<ts>\d{4}-\d{2}-\d{2}T\d{2}[:-]\d{2}[:-]\d{2}(?:[+-]\d{2}[:-]\d{2}|Z)?)\.(?P<kind>snapshot|diff|dir|missing|data)(?P<gz>\.gz)?$")
            .expect("increment name regex")
    })
}

/// Parse `<base>.<timestamp>.<kind>[.gz]`; `None` for ordinary files.
pub fn parse_inc_name(name: &str) -> Option<IncFile> {
    let caps = inc_name_re().captures(name)?;
    let time = SessionTime::parse(caps.name("ts")?.as_str())?;
    Some(IncFile {
        path: PathBuf::new(),
        base: caps.name("base")?.as_str().to_string(),
        time,
        kind: IncKind::parse(caps.name("kind")?.as_str())?,
        gz: caps.name("gz").is_some(),
    })
}

pub fn make_inc_name(base: &str, time: SessionTime, kind: IncKind, gz: bool) -> String {
    format!(
        "{}.{}.{}{}",
        base,
        time.to_string(),
        kind.suffix(),
        if gz { ".gz" } else { "" }
    )
}

/// All increment files in `dir` whose base equals `base`, sorted ascending
/// by timestamp. Missing directory counts as no increments.
pub fn list_inc_files(dir: &Path, base: &str) -> Result<Vec<IncFile>> {
    let mut out = Vec::new();
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(e).with_context(|| format!("listing {}", dir.display())),
    };
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(mut inc) = parse_inc_name(name) {
            if inc.base == base {
                inc.path = entry.path();
                out.push(inc);
            }
        }
    }
    out.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.path.cmp(&b.path)));
    Ok(out)
}

// ─── Reading and writing increment payloads ────────────────────────────────

pub fn open_inc_reader(inc: &IncFile) -> Result<Box<dyn Read>> {
    let f = File::open(&inc.path)
        .with_context(|| format!("Cannot open increment {}", inc.path.display()))?;
    if inc.gz {
        Ok(Box::new(GzDecoder::new(BufReader::new(f))))
    } else {
        Ok(Box::new(BufReader::new(f)))
    }
}

pub fn read_inc_bytes(inc: &IncFile) -> Result<Vec<u8>> {
    let mut r = open_inc_reader(inc)?;
    let mut buf = Vec::new();
    r.read_to_end(&mut buf)
        .with_context(|| format!("Cannot read increment {}", inc.path.display()))?;
    Ok(buf)
}

fn write_inc_bytes(path: &Path, bytes: &[u8], gz: bool) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let f = File::create(path).with_context(|| format!("Cannot write {}", path.display()))?;
    if gz {
        let mut enc = GzEncoder::new(BufWriter::new(f), Compression::default());
        enc.write_all(bytes)?;
        enc.finish()?.flush()?;
    } else {
        let mut w = BufWriter::new(f);
        w.write_all(bytes)?;
        w.flush()?;
    }
    Ok(())
}

// ─── Increment creation policy ─────────────────────────────────────────────

/// Write the reverse increment recording the *old* mirror state before it is
/// replaced by the new one.
///
/// `new_state` is the freshly patched temp file (None when the entry is
/// being deleted), `mirror` the still-unchanged mirror entry, `inc_base` the
/// increment path prefix mirroring the live tree. Returns the created file,
/// or `None` when there was no old state and no new one either.
pub fn make_increment(
    new_state: Option<&Path>,
    mirror: &Path,
    inc_base: &Path,
    time: SessionTime,
    compress: bool,
) -> Result<Option<IncFile>> {
    let new_exists = new_state.map_or(false, |p| p.symlink_metadata().is_ok());
    make_increment_inner(new_exists, new_state, mirror, inc_base, time, compress)
}

/// Variant for the directory hooks, where the new state is a diff record
/// rather than a temp file on disk.
pub fn make_dir_increment(
    diff_exists: bool,
    mirror: &Path,
    inc_base: &Path,
    time: SessionTime,
    compress: bool,
) -> Result<Option<IncFile>> {
    make_increment_inner(diff_exists, None, mirror, inc_base, time, compress)
}

fn make_increment_inner(
    new_exists: bool,
    new_state: Option<&Path>,
    mirror: &Path,
    inc_base: &Path,
    time: SessionTime,
    compress: bool,
) -> Result<Option<IncFile>> {
    let old = Record::from_path(mirror, crate::record::Index::root())?;
    let base = inc_base
        .file_name()
        .and_then(|n| n.to_str())
        .context("increment base has no file name")?
        .to_string();
    let dir = inc_base.parent().unwrap_or(Path::new(".")).to_path_buf();

    let (kind, gz, bytes): (IncKind, bool, Vec<u8>) = match old.ftype {
        FileType::Absent => {
            if !new_exists {
                return Ok(None); // deleted in the meantime on both sides
            }
            (IncKind::Missing, false, Vec::new())
        }
        FileType::Directory => (IncKind::Dir, false, Vec::new()),
        FileType::Regular => {
            match new_state {
                Some(tf) if is_regular(tf) => {
                    // reverse diff: sign the new state, delta the old over it
                    let sig = rolling::signature(BufReader::new(File::open(tf)?))?;
                    let delta = rolling::delta(&sig, BufReader::new(File::open(mirror)?))?;
                    (IncKind::Diff, compress, delta)
                }
                _ => {
                    let data = fs::read(mirror)
                        .with_context(|| format!("Cannot snapshot {}", mirror.display()))?;
                    (IncKind::Snapshot, compress, data)
                }
            }
        }
        FileType::Symlink => {
            let target = fs::read_link(mirror)?;
            (
                IncKind::Snapshot,
                false,
                target.to_string_lossy().into_owned().into_bytes(),
            )
        }
        // special files carry no content; their metadata lives in the store
        _ => (IncKind::Snapshot, false, Vec::new()),
    };

    let path = dir.join(make_inc_name(&base, time, kind, gz));
    write_inc_bytes(&path, &bytes, gz)?;
    Ok(Some(IncFile {
        path,
        base,
        time,
        kind,
        gz,
    }))
}

fn is_regular(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.file_type().is_file())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_roundtrip_both_forms() {
        let t = SessionTime::from_unix(1_700_000_000);
        let canon = t.to_string();
        let compat = t.to_compat_string();
        assert!(canon.contains(':'));
        assert!(!compat.contains(':'));
        assert_eq!(SessionTime::parse(&canon).unwrap(), t);
        assert_eq!(SessionTime::parse(&compat).unwrap(), t);
    }

    #[test]
    fn inc_names_parse_and_build() {
        let t = SessionTime::parse("2024-03-01T12:30:00+01:00").unwrap();
        let name = make_inc_name("notes.txt", t, IncKind::Diff, true);
        let inc = parse_inc_name(&name).unwrap();
        assert_eq!(inc.base, "notes.txt");
        assert_eq!(inc.kind, IncKind::Diff);
        assert!(inc.gz);
        assert_eq!(inc.time, t);

        assert!(parse_inc_name("plain_file.txt").is_none());
        assert!(parse_inc_name("current_mirror.2024-03-01T12:30:00+01:00.data").is_some());
    }

    #[test]
    fn basenames_with_dots_survive() {
        let t = SessionTime::from_unix(1000);
        let name = make_inc_name("archive.tar.gz", t, IncKind::Snapshot, true);
        let inc = parse_inc_name(&name).unwrap();
        assert_eq!(inc.base, "archive.tar.gz");
        assert_eq!(inc.kind, IncKind::Snapshot);
    }

    #[test]
    fn list_inc_files_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let t1 = SessionTime::from_unix(1000);
        let t2 = SessionTime::from_unix(2000);
        for (b, t, k) in [
            ("x", t2, IncKind::Diff),
            ("x", t1, IncKind::Snapshot),
            ("y", t1, IncKind::Missing),
        ] {
            fs::write(dir.path().join(make_inc_name(b, t, k, false)), b"").unwrap();
        }
        let incs = list_inc_files(dir.path(), "x").unwrap();
        assert_eq!(incs.len(), 2);
        assert_eq!(incs[0].time, t1);
        assert_eq!(incs[1].time, t2);
    }

    #[test]
    fn reverse_diff_increment_restores_old_content() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = dir.path().join("f");
        let temp = dir.path().join("f.tmp");
        fs::write(&mirror, b"old old old").unwrap();
        fs::write(&temp, b"the new content").unwrap();
        let t = SessionTime::from_unix(5000);

        let inc = make_increment(Some(&temp), &mirror, &dir.path().join("inc").join("f"), t, true)
            .unwrap()
            .unwrap();
        assert_eq!(inc.kind, IncKind::Diff);

        let delta = read_inc_bytes(&inc).unwrap();
        let mut out = Vec::new();
        rolling::patch(std::io::Cursor::new(b"the new content".to_vec()), &delta, &mut out)
            .unwrap();
        assert_eq!(out, b"old old old");
    }

    #[test]
    fn old_states_map_to_expected_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let t = SessionTime::from_unix(7000);
        let incdir = dir.path().join("inc");

        // absent old + new file → missing
        let tf = dir.path().join("tf");
        fs::write(&tf, b"n").unwrap();
        let inc = make_increment(Some(&tf), &dir.path().join("gone"), &incdir.join("gone"), t, false)
            .unwrap()
            .unwrap();
        assert_eq!(inc.kind, IncKind::Missing);

        // dir old → dir marker
        fs::create_dir(dir.path().join("d")).unwrap();
        let inc = make_increment(None, &dir.path().join("d"), &incdir.join("d"), t, false)
            .unwrap()
            .unwrap();
        assert_eq!(inc.kind, IncKind::Dir);

        // regular old, deleted new → snapshot with old bytes
        let f = dir.path().join("f");
        fs::write(&f, b"precious").unwrap();
        let inc = make_increment(None, &f, &incdir.join("f"), t, false)
            .unwrap()
            .unwrap();
        assert_eq!(inc.kind, IncKind::Snapshot);
        assert_eq!(read_inc_bytes(&inc).unwrap(), b"precious");

        // absent on both sides → nothing
        assert!(
            make_increment(None, &dir.path().join("nix"), &incdir.join("nix"), t, false)
                .unwrap()
                .is_none()
        );
    }
}
