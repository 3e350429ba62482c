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
//! Session and per-file statistics written into the data directory.

use anyhow::Result;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::increments::IncFile;
use crate::record::Record;
use crate::utils::human;

// ─── Session statistics ────────────────────────────────────────────────────

/// Counters for one backup session, flushed to
/// `session_statistics.<t>.data` as `Key Value` lines.
#[derive(Debug, Default)]
pub struct SessionStats {
    pub start_time: i64,
    pub end_time: i64,
    pub source_files: u64,
    pub source_bytes: u64,
    pub mirror_files: u64,
    pub mirror_bytes: u64,
    pub new_files: u64,
    pub deleted_files: u64,
    pub changed_files: u64,
    pub increment_files: u64,
    pub increment_bytes: u64,
    pub errors: u64,
}

impl SessionStats {
    pub fn new(start_time: i64) -> Self {
        SessionStats {
            start_time,
            ..Default::default()
        }
    }

    pub fn add_source_file(&mut self, rec: &Record) {
        self.source_files += 1;
        self.source_bytes += rec.size.unwrap_or(0);
    }

    pub fn add_mirror_file(&mut self, rec: &Record) {
        self.mirror_files += 1;
        self.mirror_bytes += rec.size.unwrap_or(0);
    }

    pub fn add_changed(&mut self, source: Option<&Record>, dest: Option<&Record>) {
        self.changed_files += 1;
        match (source, dest) {
            (Some(s), None) if s.exists() => self.new_files += 1,
            (None, Some(_)) => self.deleted_files += 1,
            (Some(s), Some(_)) if !s.exists() => self.deleted_files += 1,
            _ => {}
        }
    }

    pub fn add_increment(&mut self, inc: &IncFile) {
        self.increment_files += 1;
        self.increment_bytes += std::fs::metadata(&inc.path).map(|m| m.len()).unwrap_or(0);
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut f = BufWriter::new(File::create(path)?);
        writeln!(f, "StartTime {}", self.start_time)?;
        writeln!(f, "EndTime {}", self.end_time)?;
        writeln!(f, "ElapsedTime {}", self.end_time - self.start_time)?;
        writeln!(f, "SourceFiles {}", self.source_files)?;
        writeln!(f, "SourceFileSize {}", self.source_bytes)?;
        writeln!(f, "MirrorFiles {}", self.mirror_files)?;
        writeln!(f, "MirrorFileSize {}", self.mirror_bytes)?;
        writeln!(f, "NewFiles {}", self.new_files)?;
        writeln!(f, "DeletedFiles {}", self.deleted_files)?;
        writeln!(f, "ChangedFiles {}", self.changed_files)?;
        writeln!(f, "IncrementFiles {}", self.increment_files)?;
        writeln!(f, "IncrementFileSize {}", self.increment_bytes)?;
        writeln!(f, "Errors {}", self.errors)?;
        f.flush()?;
        Ok(())
    }

    pub fn summary(&self) -> String {
        format!(
            "{} source files ({}), {} changed, {} new, {} deleted, increments {}",
            self.source_files,
            human(self.source_bytes),
            self.changed_files,
            self.new_files,
            self.deleted_files,
            human(self.increment_bytes),
        )
    }
}

// ─── Per-file statistics ───────────────────────────────────────────────────

/// One gzipped line per processed file: changed flag, source size, increment
/// size. Written to `file_statistics.<t>.data.gz`.
pub struct FileStats {
    enc: Option<GzEncoder<BufWriter<File>>>,
    path: PathBuf,
}

impl FileStats {
    pub fn create(path: &Path) -> Result<Self> {
        let f = File::create(path)?;
        let mut enc = GzEncoder::new(BufWriter::new(f), Compression::default());
        writeln!(enc, "# Filename Changed SourceSize IncrementSize")?;
        Ok(FileStats {
            enc: Some(enc),
            path: path.to_path_buf(),
        })
    }

    pub fn update(
        &mut self,
        source: Option<&Record>,
        dest: Option<&Record>,
        changed: bool,
        inc: Option<&IncFile>,
    ) -> Result<()> {
        let index = source
            .map(|r| r.index.clone())
            .or_else(|| dest.map(|r| r.index.clone()))
            .unwrap_or_default();
        let src_size = source
            .and_then(|r| r.size)
            .map(|s| s.to_string())
            .unwrap_or_else(|| "NA".into());
        let inc_size = inc
            .and_then(|i| std::fs::metadata(&i.path).ok())
            .map(|m| m.len().to_string())
            .unwrap_or_else(|| "NA".into());
        if let Some(enc) = self.enc.as_mut() {
            writeln!(
                enc,
                "{} {} {} {}",
                index,
                if changed { 1 } else { 0 },
                src_size,
                inc_size
            )?;
        }
        Ok(())
    }

    pub fn close(mut self) -> Result<PathBuf> {
        if let Some(enc) = self.enc.take() {
            enc.finish()?.flush()?;
        }
        Ok(self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{FileType, Index};

    #[test]
    fn session_stats_classify_changes() {
        let mut s = SessionStats::new(100);
        let mut src = Record::absent(Index(vec!["a".into()]));
        src.ftype = FileType::Regular;
        src.size = Some(10);

        s.add_source_file(&src);
        s.add_changed(Some(&src), None); // new file
        s.add_changed(None, Some(&src)); // deleted file
        assert_eq!(s.source_files, 1);
        assert_eq!(s.source_bytes, 10);
        assert_eq!(s.new_files, 1);
        assert_eq!(s.deleted_files, 1);
        assert_eq!(s.changed_files, 2);
    }

    #[test]
    fn session_stats_write_key_value_lines() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = SessionStats::new(100);
        s.end_time = 160;
        s.source_files = 3;
        let p = dir.path().join("session_statistics.data");
        s.write(&p).unwrap();
        let text = std::fs::read_to_string(&p).unwrap();
        assert!(text.contains("ElapsedTime 60"));
        assert!(text.contains("SourceFiles 3"));
    }
}
