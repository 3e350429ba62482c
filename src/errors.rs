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
//! Session error kinds, the per-file error log, and the exit-code bitset.

use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;
use thiserror::Error;

// ─── Exit-code bitset ──────────────────────────────────────────────────────

pub const RET_OK: i32 = 0;
pub const RET_ERR: i32 = 1;
pub const RET_WARN: i32 = 2;
pub const RET_FILE_ERR: i32 = 4;
pub const RET_FILE_WARN: i32 = 8;

// ─── Error kinds ───────────────────────────────────────────────────────────

/// The per-file error classes a session can survive, plus the fatal ones.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot update {path}: {msg}")]
    Update { path: PathBuf, msg: String },

    #[error("cannot create special file {path}: {msg}")]
    SpecialFile { path: PathBuf, msg: String },

    #[error("cannot open {path} for reading after chmod retry: {msg}")]
    Perm { path: PathBuf, msg: String },

    #[error("cannot list directory {path}: {msg}")]
    List { path: PathBuf, msg: String },

    #[error("record stream out of order: {prev} followed by {next}")]
    StreamOrderViolation { prev: String, next: String },

    #[error("repository corrupt: {0}")]
    RepositoryCorrupt(String),

    #[error("mirror metadata missing for requested time")]
    MetadataMissing,
}

impl SessionError {
    /// Fatal errors abort the session; the rest skip a file and continue.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::StreamOrderViolation { .. } | SessionError::RepositoryCorrupt(_)
        )
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            SessionError::Update { .. } => "UpdateError",
            SessionError::SpecialFile { .. } => "SpecialFileError",
            SessionError::Perm { .. } => "PermError",
            SessionError::List { .. } => "ListError",
            SessionError::StreamOrderViolation { .. } => "StreamOrderViolation",
            SessionError::RepositoryCorrupt(_) => "RepositoryCorrupt",
            SessionError::MetadataMissing => "MetadataMissing",
        }
    }
}

// ─── Error log ─────────────────────────────────────────────────────────────

/// Structured per-file error log, one line per skipped file, written to
/// `error_log.<t>.data` inside the repository data directory. Also
/// accumulates the exit-code bits for the session.
pub struct ErrorLog {
    file: Option<File>,
    ret_code: i32,
    pub file_errors: u64,
}

impl ErrorLog {
    /// Open the error log for a session. `None` path keeps errors
    /// terminal-only (used by restore, which must not write into the repo).
    pub fn open(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => Some(File::create(p)?),
            None => None,
        };
        Ok(Self {
            file,
            ret_code: RET_OK,
            file_errors: 0,
        })
    }

    /// Record a per-file error: one structured line, FILE_ERR bit, continue.
    pub fn file_error(&mut self, kind: &str, path: &Path, msg: impl fmt::Display) {
        self.file_errors += 1;
        self.ret_code |= RET_FILE_ERR;
        let line = format!("{} {} {}", kind, path.display(), msg);
        if let Some(f) = self.file.as_mut() {
            let _ = writeln!(f, "{}", line);
        }
        eprintln!("  error: {}", line);
    }

    pub fn file_warning(&mut self, path: &Path, msg: impl fmt::Display) {
        self.ret_code |= RET_FILE_WARN;
        let line = format!("Warning {} {}", path.display(), msg);
        if let Some(f) = self.file.as_mut() {
            let _ = writeln!(f, "{}", line);
        }
        eprintln!("  warning: {}", line);
    }

    pub fn warning(&mut self, msg: impl fmt::Display) {
        self.ret_code |= RET_WARN;
        eprintln!("  warning: {}", msg);
    }

    pub fn ret_code(&self) -> i32 {
        self.ret_code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        let e = SessionError::StreamOrderViolation {
            prev: "b".into(),
            next: "a".into(),
        };
        assert!(e.is_fatal());
        let e = SessionError::Update {
            path: PathBuf::from("x"),
            msg: "nope".into(),
        };
        assert!(!e.is_fatal());
        assert_eq!(e.kind_name(), "UpdateError");
    }

    #[test]
    fn error_log_accumulates_bits() {
        let mut log = ErrorLog::open(None).unwrap();
        assert_eq!(log.ret_code(), RET_OK);
        log.file_error("UpdateError", Path::new("a/b"), "boom");
        log.warning("two markers");
        assert_eq!(log.ret_code(), RET_FILE_ERR | RET_WARN);
        assert_eq!(log.file_errors, 1);
    }
}
