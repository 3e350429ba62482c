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
//! `list` and `remove-older-than` — session housekeeping on a repository.

use anyhow::Result;
use colored::Colorize;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

use crate::increments::{self, SessionTime};
use crate::output::OutputCtx;
use crate::repo::Repo;
use crate::utils::fmt_time;

/// Print every session time the repository knows about, oldest first.
pub fn list(repo_root: &Path, out: &OutputCtx) -> Result<()> {
    let repo = Repo::new(repo_root);
    anyhow::ensure!(
        repo.is_initialized(),
        "{} is not a regressum repository",
        repo_root.display()
    );
    let mirror_time = repo.mirror_time()?;
    let times = repo.session_times()?;

    if out.json {
        let items: Vec<_> = times
            .iter()
            .map(|t| {
                serde_json::json!({
                    "time": t.to_string(),
                    "unix": t.unix(),
                    "is_mirror": *t == mirror_time,
                })
            })
            .collect();
        out.raw(&serde_json::to_string_pretty(&items)?);
        out.raw("\n");
        return Ok(());
    }

    out.println(&format!(
        "{} {}",
        "Sessions in".cyan().bold(),
        repo_root.display().to_string().yellow()
    ));
    for t in &times {
        let tag = if *t == mirror_time {
            "  (current mirror)".green().to_string()
        } else {
            String::new()
        };
        out.println(&format!("  {}  {}{}", t, fmt_time(t.unix()).dimmed(), tag));
    }
    Ok(())
}

/// Delete all increments and metadata diffs strictly older than `cutoff`.
/// The mirror itself and the newest metadata snapshot are never touched.
pub fn remove_older_than(repo_root: &Path, cutoff: SessionTime, out: &OutputCtx) -> Result<()> {
    let repo = Repo::new(repo_root);
    anyhow::ensure!(
        repo.is_initialized(),
        "{} is not a regressum repository",
        repo_root.display()
    );
    repo.check_single_marker()?;
    let mirror_time = repo.mirror_time()?;
    anyhow::ensure!(
        cutoff <= mirror_time,
        "cutoff {} would remove the current mirror itself",
        cutoff
    );

    let mut removed = 0usize;
    let mut visit = |path: &Path| -> Result<()> {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return Ok(());
        };
        let Some(inc) = increments::parse_inc_name(name) else {
            return Ok(());
        };
        if inc.base == crate::repo::MARKER_BASE {
            return Ok(());
        }
        if inc.time < cutoff {
            if out.dry_run {
                out.dry(&format!("remove {}", path.display()));
            } else {
                fs::remove_file(path)?;
                let mut b3 = path.as_os_str().to_os_string();
                b3.push(".b3");
                let _ = fs::remove_file(b3);
            }
            removed += 1;
        }
        Ok(())
    };

    for entry in WalkDir::new(repo.data_dir()).follow_links(false) {
        let entry = entry?;
        if entry.file_type().is_file() {
            visit(entry.path())?;
        }
    }

    out.println(&format!(
        "  {} {} file(s) older than {}",
        if out.dry_run { "Would remove" } else { "Removed" }.green().bold(),
        removed,
        cutoff.to_string().yellow()
    ));
    Ok(())
}
