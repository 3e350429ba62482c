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
//! Repository layout: the live mirror tree plus the `regressum-data`
//! directory holding markers, metadata, statistics and increments.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::errors::SessionError;
use crate::increments::{self, IncFile, IncKind, SessionTime};
use crate::meta::MetadataStore;
use crate::utils::fsync_file_and_dir;

pub const DATA_DIR: &str = "regressum-data";
pub const MARKER_BASE: &str = "current_mirror";
pub const INC_BASE: &str = "increments";

#[derive(Clone, Debug)]
pub struct Repo {
    root: PathBuf,
}

impl Repo {
    pub fn new(root: &Path) -> Self {
        Repo {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join(DATA_DIR)
    }

    /// Increment path prefix mirroring the live tree. The root's own
    /// increments sit directly in the data directory as `increments.<t>.dir`
    /// next to the `increments/` tree itself.
    pub fn inc_root(&self) -> PathBuf {
        self.data_dir().join(INC_BASE)
    }

    pub fn store(&self) -> MetadataStore {
        MetadataStore::new(&self.data_dir())
    }

    pub fn is_initialized(&self) -> bool {
        self.data_dir().is_dir()
    }

    // ── Current-mirror markers ─────────────────────────────────────────────

    /// Markers sorted ascending by time; equal timestamps tie-break
    /// alphabetically on the full filename.
    pub fn markers(&self) -> Result<Vec<IncFile>> {
        let mut m: Vec<IncFile> = increments::list_inc_files(&self.data_dir(), MARKER_BASE)?
            .into_iter()
            .filter(|f| f.kind == IncKind::Data)
            .collect();
        m.sort_by(|a, b| {
            a.time
                .cmp(&b.time)
                .then_with(|| a.path.file_name().cmp(&b.path.file_name()))
        });
        Ok(m)
    }

    /// Time of the authoritative mirror: the older marker (an aborted
    /// session leaves a newer one that regress removes).
    pub fn mirror_time(&self) -> Result<SessionTime> {
        let markers = self.markers()?;
        markers
            .first()
            .map(|m| m.time)
            .context("repository has no current_mirror marker")
    }

    /// Fail with RepositoryCorrupt if a previous session left two markers.
    pub fn check_single_marker(&self) -> Result<()> {
        if self.markers()?.len() > 1 {
            return Err(SessionError::RepositoryCorrupt(
                "two current_mirror markers found; a previous session was aborted, \
                 run `regressum regress` first"
                    .into(),
            )
            .into());
        }
        Ok(())
    }

    /// Write `current_mirror.<t>.data` containing the runner PID, fsync'd
    /// together with its directory before any mirror mutation.
    pub fn touch_marker(&self, time: SessionTime) -> Result<()> {
        let name = increments::make_inc_name(MARKER_BASE, time, IncKind::Data, false);
        let path = self.data_dir().join(name);
        let mut f = fs::File::create(&path)
            .with_context(|| format!("Cannot write marker {}", path.display()))?;
        writeln!(f, "PID {}", std::process::id())?;
        f.sync_all()?;
        drop(f);
        fsync_file_and_dir(&path)?;
        Ok(())
    }

    /// Delete the older of the two markers at the end of a session.
    pub fn remove_older_marker(&self) -> Result<()> {
        let markers = self.markers()?;
        if markers.len() != 2 {
            anyhow::bail!(
                "expected two current_mirror markers at session end, found {}",
                markers.len()
            );
        }
        fs::remove_file(&markers[0].path)
            .with_context(|| format!("Cannot remove marker {}", markers[0].path.display()))?;
        Ok(())
    }

    pub fn remove_marker_at(&self, time: SessionTime) -> Result<()> {
        for m in self.markers()? {
            if m.time == time {
                fs::remove_file(&m.path)?;
            }
        }
        Ok(())
    }

    // ── Session times ──────────────────────────────────────────────────────

    /// Union of marker, root-increment and metadata times, ascending.
    pub fn session_times(&self) -> Result<Vec<SessionTime>> {
        let mut times: Vec<SessionTime> = Vec::new();
        for m in self.markers()? {
            times.push(m.time);
        }
        for inc in increments::list_inc_files(&self.data_dir(), INC_BASE)? {
            if inc.kind != IncKind::Data {
                times.push(inc.time);
            }
        }
        times.extend(self.store().enumerate_times()?);
        times.sort();
        times.dedup();
        Ok(times)
    }

    /// The session time the restore planner resolves a requested time to:
    /// strictly between two session times, the older wins, because that is
    /// what the mirror held at the requested moment.
    pub fn resolve_restore_time(&self, requested: SessionTime) -> Result<SessionTime> {
        let times = self.session_times()?;
        anyhow::ensure!(!times.is_empty(), "repository has no sessions");
        let older = times.iter().filter(|t| **t <= requested).max();
        Ok(*older.unwrap_or(&times[0]))
    }

    pub fn session_statistics_path(&self, time: SessionTime) -> PathBuf {
        self.data_dir().join(increments::make_inc_name(
            "session_statistics",
            time,
            IncKind::Data,
            false,
        ))
    }

    pub fn file_statistics_path(&self, time: SessionTime) -> PathBuf {
        let mut name =
            increments::make_inc_name("file_statistics", time, IncKind::Data, false);
        name.push_str(".gz");
        self.data_dir().join(name)
    }

    pub fn error_log_path(&self, time: SessionTime) -> PathBuf {
        self.data_dir()
            .join(increments::make_inc_name("error_log", time, IncKind::Data, false))
    }
}
