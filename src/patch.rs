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
//! The patch branch — applies one diff record to the mirror and, in
//! increment mode, preserves the old state as a reverse increment first.
//!
//! Directories are the complication: their attributes can only be applied
//! after the contents are final, and a directory replaced by a non-directory
//! can only be removed after its children are gone. Both are deferred to
//! `end_process_directory`.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::cell::RefCell;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::cache::Ccpp;
use crate::config::SessionConfig;
use crate::increments::{self, SessionTime};
use crate::record::{chmod, copy_attribs, Attached, FileType, Index, Payload, Record};
use crate::reducer::Branch;
use crate::rolling;

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Sibling temp path in the same directory (and thus filesystem) as the
/// mirror entry, so the final rename is atomic.
fn temp_sibling(mirror_path: &Path) -> PathBuf {
    let n = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let name = format!(".regressum.{}.{}.tmp", std::process::id(), n);
    mirror_path.parent().unwrap_or(Path::new(".")).join(name)
}

pub struct PatchBranch {
    mirror_root: PathBuf,
    /// `Some` enables reverse-increment writing (incremental sessions).
    inc_root: Option<PathBuf>,
    ccpp: Rc<RefCell<Ccpp>>,
    cfg: SessionConfig,
    time: SessionTime,
    base_index: Index,
    base_path: PathBuf,
    dir_update: Option<Record>,
    dir_replacement: Option<PathBuf>,
}

impl PatchBranch {
    pub fn new(
        mirror_root: &Path,
        inc_root: Option<&Path>,
        ccpp: Rc<RefCell<Ccpp>>,
        cfg: SessionConfig,
        time: SessionTime,
    ) -> Self {
        PatchBranch {
            mirror_root: mirror_root.to_path_buf(),
            inc_root: inc_root.map(Path::to_path_buf),
            ccpp,
            cfg,
            time,
            base_index: Index::root(),
            base_path: mirror_root.to_path_buf(),
            dir_update: None,
            dir_replacement: None,
        }
    }

    fn inc_base(&self, index: &Index) -> Option<PathBuf> {
        self.inc_root.as_ref().map(|root| index.to_path(root))
    }

    fn update_error(&self, path: &Path, msg: impl std::fmt::Display) {
        self.ccpp
            .borrow_mut()
            .errlog
            .file_error("UpdateError", path, msg);
    }

    // ── Writing one temp file from a diff record ───────────────────────────

    /// Write the new content for `diff` into `tf`, which does not exist yet.
    /// Returns false when an UpdateError got in the way (already logged).
    fn patch_to_temp(&self, basis: Option<&Path>, diff: &Record, tf: &Path) -> Result<bool> {
        if let Some(first) = &diff.linked_to {
            if !self.hardlink_to_temp(first, diff, tf) {
                return Ok(false);
            }
        } else if diff.attached == Attached::Snapshot {
            if diff.is_special() {
                self.write_special(diff, tf);
                let _ = copy_attribs(diff, tf);
                return Ok(true); // special files are not compared
            }
            if !self.snapshot_to_temp(diff, tf) {
                return Ok(false);
            }
        } else if diff.attached == Attached::Diff {
            if !self.diff_to_temp(basis, diff, tf)? {
                return Ok(false);
            }
        }

        if tf.symlink_metadata().is_ok() && diff.linked_to.is_none() {
            if let Err(e) = copy_attribs(diff, tf) {
                self.update_error(tf, e);
                return Ok(false);
            }
        }
        Ok(self.matches_cached(diff, tf))
    }

    fn hardlink_to_temp(&self, first: &Index, diff: &Record, tf: &Path) -> bool {
        let target = first.to_path(&self.mirror_root);
        if let Err(e) = fs::hard_link(&target, tf) {
            self.update_error(tf, format!("link to {}: {}", target.display(), e));
            return false;
        }
        self.ccpp.borrow_mut().update_hardlink_hash(diff);
        true
    }

    /// Copy a full snapshot payload into the temp file. An absent diff means
    /// the entry is being deleted: nothing is written, which the caller
    /// reads as "temp missing, remove the mirror entry".
    fn snapshot_to_temp(&self, diff: &Record, tf: &Path) -> bool {
        match diff.ftype {
            FileType::Absent => true,
            FileType::Regular => {
                let Some(Payload::File(src)) = &diff.payload else {
                    self.update_error(tf, "snapshot diff without content");
                    return false;
                };
                match copy_with_hash(src, tf) {
                    Ok(sha) => {
                        self.ccpp.borrow_mut().update_hash(&diff.index, &sha);
                        true
                    }
                    Err(e) => {
                        self.update_error(tf, e);
                        false
                    }
                }
            }
            FileType::Symlink => {
                let Some(target) = &diff.symlink_target else {
                    self.update_error(tf, "symlink diff without target");
                    return false;
                };
                #[cfg(unix)]
                if let Err(e) = std::os::unix::fs::symlink(target, tf) {
                    self.update_error(tf, e);
                    return false;
                }
                true
            }
            _ => {
                self.update_error(tf, format!("unexpected snapshot type {:?}", diff.ftype));
                false
            }
        }
    }

    fn diff_to_temp(&self, basis: Option<&Path>, diff: &Record, tf: &Path) -> Result<bool> {
        let Some(Payload::Delta(delta)) = &diff.payload else {
            self.update_error(tf, "delta diff without payload");
            return Ok(false);
        };
        let Some(basis) = basis else {
            self.update_error(tf, "delta diff without basis");
            return Ok(false);
        };
        let result = (|| -> Result<String> {
            let base = BufReader::new(File::open(basis)?);
            let out = BufWriter::new(File::create(tf)?);
            rolling::patch(base, delta, out)
        })();
        match result {
            Ok(sha) => {
                self.ccpp.borrow_mut().update_hash(&diff.index, &sha);
                Ok(true)
            }
            Err(e) => {
                self.update_error(tf, e);
                Ok(false)
            }
        }
    }

    /// Recreate a fifo/socket/device node. Failure leaves an empty
    /// placeholder so the entry is at least present.
    fn write_special(&self, diff: &Record, tf: &Path) {
        if let Err(err) = crate::record::create_special(diff, tf) {
            self.ccpp
                .borrow_mut()
                .errlog
                .file_error("SpecialFileError", tf, err);
            let _ = fs::remove_file(tf);
            let _ = File::create(tf); // empty placeholder
        }
    }

    /// Final check: the temp file just written must match the source record
    /// cached at walk time, or the session would commit metadata that
    /// disagrees with the mirror.
    fn matches_cached(&self, diff: &Record, tf: &Path) -> bool {
        let Ok(tf_rec) = Record::from_path(tf, diff.index.clone()) else {
            return true;
        };
        if !tf_rec.is_reg() {
            return true;
        }
        let cached = self.ccpp.borrow().get_source_record(&diff.index);
        match cached {
            Some(src) if src.equal_loose(&tf_rec, self.cfg.is_root()) => true,
            Some(_) => {
                self.update_error(tf, "updated mirror temp file does not match source");
                false
            }
            None => true,
        }
    }

    // ── Directory helpers ──────────────────────────────────────────────────

    fn prepare_dir(&mut self, index: &Index, diff: &Record) -> Result<()> {
        self.dir_update = Some(diff.bare_clone());
        if !self.base_path.is_dir() {
            if self.base_path.symlink_metadata().is_ok() {
                fs::remove_file(&self.base_path)
                    .with_context(|| format!("removing {}", self.base_path.display()))?;
            }
            fs::create_dir(&self.base_path)
                .with_context(|| format!("mkdir {}", self.base_path.display()))?;
            self.ccpp.borrow_mut().flag_success(index);
        } else if self.ccpp.borrow().in_cache(index) {
            self.ccpp.borrow_mut().flag_success(index);
        }
        Ok(())
    }

    /// Stage a non-directory that replaces the current directory; the actual
    /// swap happens in `end_process_directory`, after the children are gone.
    fn set_dir_replacement(&mut self, diff: &Record) -> Result<bool> {
        let tf = temp_sibling(&self.base_path);
        if self.patch_to_temp(None, diff, &tf)? {
            self.dir_replacement = Some(tf);
            Ok(true)
        } else {
            if tf.symlink_metadata().is_ok() {
                let _ = fs::remove_file(&tf);
            }
            Ok(false)
        }
    }
}

impl Branch for PatchBranch {
    fn can_fast_process(&mut self, index: &Index, diff: &Record) -> bool {
        let mirror = self.ccpp.borrow().get_mirror_record(index);
        !(diff.is_dir() || mirror.map_or(false, |m| m.is_dir()))
    }

    /// Neither side is a directory: write the new state beside the mirror
    /// entry, record the old state as an increment, then rename into place.
    fn fast_process_file(&mut self, index: &Index, diff: &Record) -> Result<()> {
        let mirror_path = index.to_path(&self.mirror_root);
        let tf = temp_sibling(&mirror_path);

        if self.patch_to_temp(Some(&mirror_path), diff, &tf)? {
            if let Some(inc_base) = self.inc_base(index) {
                match increments::make_increment(
                    Some(&tf),
                    &mirror_path,
                    &inc_base,
                    self.time,
                    self.cfg.compression,
                ) {
                    Ok(Some(inc)) => {
                        // the old state must be safe before the rename
                        if let Err(e) = crate::utils::fsync_file_and_dir(&inc.path) {
                            self.update_error(&inc.path, e);
                        }
                        self.ccpp.borrow_mut().set_inc(index, inc);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        self.update_error(&mirror_path, e);
                        remove_if_present(&tf);
                        return Ok(());
                    }
                }
            }
            if tf.symlink_metadata().is_ok() {
                match fs::rename(&tf, &mirror_path) {
                    Ok(()) => self.ccpp.borrow_mut().flag_success(index),
                    Err(e) => {
                        self.update_error(&mirror_path, e);
                        remove_if_present(&tf);
                    }
                }
            } else if mirror_path.symlink_metadata().is_ok() {
                fs::remove_file(&mirror_path)
                    .with_context(|| format!("removing {}", mirror_path.display()))?;
                self.ccpp.borrow_mut().flag_deleted(index);
            }
        } else {
            remove_if_present(&tf);
        }
        Ok(())
    }

    fn start_process_directory(&mut self, index: &Index, diff: &Record) -> Result<()> {
        self.base_index = index.clone();
        self.base_path = index.to_path(&self.mirror_root);
        self.dir_update = None;
        self.dir_replacement = None;

        if diff.is_dir() {
            if let Some(inc_base) = self.inc_base(index) {
                match increments::make_dir_increment(
                    diff.exists(),
                    &self.base_path,
                    &inc_base,
                    self.time,
                    self.cfg.compression,
                ) {
                    Ok(Some(inc)) => {
                        if let Err(e) = crate::utils::fsync_file_and_dir(&inc.path) {
                            self.update_error(&inc.path, e);
                        }
                        self.ccpp.borrow_mut().set_inc(index, inc);
                    }
                    Ok(None) => {}
                    Err(e) => self.update_error(&self.base_path.clone(), e),
                }
            }
            self.prepare_dir(index, diff)?;
        } else if self.set_dir_replacement(diff)? {
            if let Some(inc_base) = self.inc_base(index) {
                let staged = self.dir_replacement.clone();
                match increments::make_increment(
                    staged.as_deref(),
                    &self.base_path,
                    &inc_base,
                    self.time,
                    self.cfg.compression,
                ) {
                    Ok(Some(inc)) => {
                        if let Err(e) = crate::utils::fsync_file_and_dir(&inc.path) {
                            self.update_error(&inc.path, e);
                        }
                        let mut ccpp = self.ccpp.borrow_mut();
                        ccpp.set_inc(index, inc);
                        ccpp.flag_success(index);
                    }
                    Ok(None) => self.ccpp.borrow_mut().flag_success(index),
                    Err(e) => self.update_error(&self.base_path.clone(), e),
                }
            } else if diff.exists() {
                self.ccpp.borrow_mut().flag_success(index);
            } else {
                self.ccpp.borrow_mut().flag_deleted(index);
            }
        }
        Ok(())
    }

    /// Directory epilogue: apply deferred attributes, or swap in the staged
    /// replacement now that the children are gone.
    fn end_process_directory(&mut self) -> Result<()> {
        if let Some(update) = self.dir_update.take() {
            if self.base_path.is_dir() {
                if let Err(e) = copy_attribs(&update, &self.base_path) {
                    self.update_error(&self.base_path.clone(), e);
                }
                let perms = update.perms.unwrap_or(0o700);
                if !self.cfg.is_root() && perms & 0o700 < 0o700 {
                    // keep the directory traversable for the rest of the
                    // session; the cache restores the real perms at close
                    if chmod(&self.base_path, 0o700 | perms).is_ok() {
                        self.ccpp.borrow_mut().push_dir_perms(
                            &self.base_index,
                            &self.base_path,
                            perms,
                        );
                    }
                }
            }
        } else if let Some(replacement) = self.dir_replacement.take() {
            if let Err(e) = fs::remove_dir(&self.base_path) {
                self.update_error(&self.base_path.clone(), e);
                remove_if_present(&replacement);
                return Ok(());
            }
            if replacement.symlink_metadata().is_ok() {
                if let Err(e) = fs::rename(&replacement, &self.base_path) {
                    self.update_error(&self.base_path.clone(), e);
                    remove_if_present(&replacement);
                }
            }
        }
        Ok(())
    }
}

fn remove_if_present(path: &Path) {
    if path.symlink_metadata().is_ok() {
        let _ = fs::remove_file(path);
    }
}

/// Stream-copy a file computing its SHA-256 on the way.
pub fn copy_with_hash(src: &Path, dest: &Path) -> Result<String> {
    let mut reader = BufReader::new(
        File::open(src).with_context(|| format!("Cannot open {}", src.display()))?,
    );
    let mut writer = BufWriter::new(
        File::create(dest).with_context(|| format!("Cannot write {}", dest.display()))?,
    );
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 131072];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        writer.write_all(&buf[..n])?;
    }
    writer.flush()?;
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_siblings_are_unique_and_in_same_dir() {
        let a = temp_sibling(Path::new("/x/y/file"));
        let b = temp_sibling(Path::new("/x/y/file"));
        assert_ne!(a, b);
        assert_eq!(a.parent(), Some(Path::new("/x/y")));
    }

    #[test]
    fn copy_with_hash_matches_sha256() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        std::fs::write(&src, b"payload bytes").unwrap();
        let sha = copy_with_hash(&src, &dst).unwrap();
        assert_eq!(std::fs::read(&dst).unwrap(), b"payload bytes");
        assert_eq!(sha, hex::encode(Sha256::digest(b"payload bytes")));
    }
}
