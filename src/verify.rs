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
//! Mirror integrity verification — recompute SHA-256 of every mirror file
//! and compare against the newest metadata snapshot.

use anyhow::Result;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::output::OutputCtx;
use crate::repo::Repo;

pub fn verify(repo_root: &Path, out: &OutputCtx) -> Result<i32> {
    let repo = Repo::new(repo_root);
    anyhow::ensure!(
        repo.is_initialized(),
        "{} is not a regressum repository",
        repo_root.display()
    );
    repo.check_single_marker()?;
    let mirror_time = repo.mirror_time()?;

    let records = repo
        .store()
        .get_at_time(mirror_time, None)?
        .ok_or_else(|| anyhow::anyhow!("no metadata snapshot for the current mirror"))?;

    let with_hash: Vec<_> = records
        .iter()
        .filter(|r| r.is_reg() && r.sha256.is_some())
        .collect();

    out.println(&format!(
        "{} {} ({} hashed files of {})",
        "Verifying mirror:".cyan().bold(),
        repo_root.display().to_string().yellow(),
        with_hash.len(),
        records.len(),
    ));

    if with_hash.is_empty() {
        out.println("  No stored hashes — nothing to verify.");
        return Ok(0);
    }

    let total: u64 = with_hash.iter().filter_map(|r| r.size).sum();
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template(
            "  {spinner:.cyan} Verifying  [{bar:40.cyan/blue}] {bytes}/{total_bytes}  ETA {eta}",
        )
        .unwrap()
        .progress_chars("=> "),
    );

    let ok = AtomicU64::new(0);
    let bad = AtomicU64::new(0);
    let missing = AtomicU64::new(0);

    with_hash.par_iter().for_each(|rec| {
        let path = rec.index.to_path(repo.root());
        match hash_file(&path) {
            Ok(actual) => {
                if Some(actual.as_str()) == rec.sha256.as_deref() {
                    ok.fetch_add(1, Ordering::Relaxed);
                } else {
                    bad.fetch_add(1, Ordering::Relaxed);
                    pb.suspend(|| {
                        eprintln!("  {} {}", "CORRUPT".red().bold(), rec.index);
                    });
                }
            }
            Err(_) => {
                missing.fetch_add(1, Ordering::Relaxed);
                pb.suspend(|| {
                    eprintln!("  {} {}", "MISSING".red().bold(), rec.index);
                });
            }
        }
        pb.inc(rec.size.unwrap_or(0));
    });
    pb.finish_and_clear();

    let (ok, bad, missing) = (
        ok.load(Ordering::Relaxed),
        bad.load(Ordering::Relaxed),
        missing.load(Ordering::Relaxed),
    );

    if out.json {
        let result = serde_json::json!({
            "status": if bad + missing == 0 { "PASS" } else { "FAIL" },
            "ok": ok,
            "corrupt": bad,
            "missing": missing,
        });
        out.raw(&serde_json::to_string_pretty(&result).unwrap());
        out.raw("\n");
    } else {
        out.println("");
        let status = if bad + missing == 0 {
            "PASS".green().bold().to_string()
        } else {
            "FAIL".red().bold().to_string()
        };
        out.println(&format!(
            "  {}  OK: {}  CORRUPT: {}  MISSING: {}",
            status,
            ok.to_string().green(),
            bad,
            missing
        ));
    }

    Ok(if bad + missing == 0 {
        0
    } else {
        crate::errors::RET_FILE_ERR
    })
}

/// Stream-hash a file using SHA-256. No temp files.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 131072]; // 128 KiB chunks
    let file = File::open(path)
        .map_err(|e| anyhow::anyhow!("Cannot open {}: {}", path.display(), e))?;
    let mut reader = BufReader::new(file);
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
