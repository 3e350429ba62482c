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
//! Path records — the in-memory descriptor of one filesystem object, keyed
//! by its index (tuple of path components relative to the backup root).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};

// ─── Index ─────────────────────────────────────────────────────────────────

/// Tuple of path components rooted at the backup target. The empty index is
/// the root itself. Ordering is component-wise lexicographic, which is the
/// canonical traversal order of every stream in the engine.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Index(pub Vec<String>);

impl Index {
    pub fn root() -> Self {
        Index(Vec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if `self` is a (non-strict) prefix of `other`.
    pub fn is_prefix_of(&self, other: &Index) -> bool {
        other.0.len() >= self.0.len() && other.0[..self.0.len()] == self.0[..]
    }

    pub fn parent(&self) -> Option<Index> {
        if self.0.is_empty() {
            None
        } else {
            Some(Index(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    pub fn join(&self, component: &str) -> Index {
        let mut v = self.0.clone();
        v.push(component.to_string());
        Index(v)
    }

    pub fn last(&self) -> Option<&str> {
        self.0.last().map(|s| s.as_str())
    }

    /// Resolve against a base directory. Components were produced by our own
    /// tree walk or the metadata store; reject anything that could escape.
    pub fn to_path(&self, base: &Path) -> PathBuf {
        let mut p = base.to_path_buf();
        for c in &self.0 {
            p.push(c);
        }
        p
    }

    /// True if every component is a plain file name (no separators, no `..`).
    pub fn is_safe(&self) -> bool {
        self.0
            .iter()
            .all(|c| !c.is_empty() && c != "." && c != ".." && !c.contains('/') && !c.contains('\0'))
    }

    pub fn from_rel_path(rel: &Path) -> Option<Index> {
        let mut v = Vec::new();
        for comp in rel.components() {
            match comp {
                std::path::Component::Normal(c) => v.push(c.to_str()?.to_string()),
                _ => return None,
            }
        }
        Some(Index(v))
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, ".")
        } else {
            write!(f, "{}", self.0.join("/"))
        }
    }
}

// ─── File types and payloads ───────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// Entry does not exist on this side (also: the "missing" restore state).
    Absent,
    Regular,
    Directory,
    Symlink,
    Fifo,
    Socket,
    Block,
    Char,
}

impl FileType {
    pub fn is_special(self) -> bool {
        matches!(
            self,
            FileType::Fifo | FileType::Socket | FileType::Block | FileType::Char
        )
    }
}

/// What kind of content is attached to a record travelling the diff stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Attached {
    #[default]
    None,
    Snapshot,
    Diff,
}

/// Content reference travelling with a diff record. Payloads are cheap to
/// clone; file contents are opened lazily by the consumer.
#[derive(Clone, Debug)]
pub enum Payload {
    /// Read content from this path when the record is applied.
    File(PathBuf),
    /// Rolling-checksum delta against the current mirror entry.
    Delta(Vec<u8>),
}

// ─── Record ────────────────────────────────────────────────────────────────

/// In-memory descriptor of a filesystem object: stat-like attributes plus an
/// optional attached payload for the diff stream. An `Absent` record carries
/// no attributes at all.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Record {
    pub index: Index,
    #[serde(rename = "type")]
    pub ftype: FileType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perms: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symlink_target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_major: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_minor: Option<u32>,
    /// (device, inode) of the source entry, kept so hard-link groups survive
    /// the round trip through the metadata store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inode: Option<(u64, u64)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nlink: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,

    /// Hard-link followup: this entry is a link to the group carrier.
    #[serde(skip)]
    pub linked_to: Option<Index>,
    #[serde(skip)]
    pub attached: Attached,
    #[serde(skip)]
    pub payload: Option<Payload>,
}

impl Record {
    pub fn absent(index: Index) -> Self {
        Record {
            index,
            ftype: FileType::Absent,
            size: None,
            mtime: None,
            perms: None,
            uid: None,
            gid: None,
            symlink_target: None,
            dev_major: None,
            dev_minor: None,
            inode: None,
            nlink: None,
            sha256: None,
            linked_to: None,
            attached: Attached::None,
            payload: None,
        }
    }

    /// lstat `path` into a record carrying `index`. The path itself is not
    /// remembered; payloads are attached separately where needed.
    pub fn from_path(path: &Path, index: Index) -> io::Result<Self> {
        match std::fs::symlink_metadata(path) {
            Ok(meta) => Ok(Self::from_metadata(path, index, &meta)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Record::absent(index)),
            Err(e) => Err(e),
        }
    }

    #[cfg(unix)]
    pub fn from_metadata(path: &Path, index: Index, meta: &Metadata) -> Self {
        use std::os::unix::fs::{FileTypeExt, MetadataExt};
        let ft = meta.file_type();
        let ftype = if ft.is_symlink() {
            FileType::Symlink
        } else if ft.is_dir() {
            FileType::Directory
        } else if ft.is_fifo() {
            FileType::Fifo
        } else if ft.is_socket() {
            FileType::Socket
        } else if ft.is_block_device() {
            FileType::Block
        } else if ft.is_char_device() {
            FileType::Char
        } else {
            FileType::Regular
        };
        let (dev_major, dev_minor) = if matches!(ftype, FileType::Block | FileType::Char) {
            let rdev = meta.rdev();
            (
                Some(libc::major(rdev)),
                Some(libc::minor(rdev)),
            )
        } else {
            (None, None)
        };
        let symlink_target = if ftype == FileType::Symlink {
            std::fs::read_link(path)
                .ok()
                .map(|t| t.to_string_lossy().into_owned())
        } else {
            None
        };
        Record {
            index,
            ftype,
            size: (ftype == FileType::Regular).then(|| meta.len()),
            mtime: Some(meta.mtime()),
            perms: Some(meta.mode() & 0o7777),
            uid: Some(meta.uid()),
            gid: Some(meta.gid()),
            symlink_target,
            dev_major,
            dev_minor,
            inode: Some((meta.dev(), meta.ino())),
            nlink: Some(meta.nlink()),
            sha256: None,
            linked_to: None,
            attached: Attached::None,
            payload: None,
        }
    }

    pub fn exists(&self) -> bool {
        self.ftype != FileType::Absent
    }

    pub fn is_dir(&self) -> bool {
        self.ftype == FileType::Directory
    }

    pub fn is_reg(&self) -> bool {
        self.ftype == FileType::Regular
    }

    pub fn is_special(&self) -> bool {
        self.ftype.is_special()
    }

    pub fn has_multiple_links(&self) -> bool {
        self.is_reg() && self.nlink.map_or(false, |n| n > 1)
    }

    /// A copy stripped of payload and stream-only markers, suitable for the
    /// caches and the metadata store.
    pub fn bare_clone(&self) -> Record {
        let mut r = self.clone();
        r.payload = None;
        r.attached = Attached::None;
        r.linked_to = None;
        r
    }

    /// Full change-detection equality: any difference here makes the entry
    /// "changed" for the session.
    pub fn equal_content(&self, other: &Record, compare_ownership: bool) -> bool {
        if self.ftype != other.ftype {
            return false;
        }
        if self.perms != other.perms {
            return false;
        }
        if compare_ownership && (self.uid != other.uid || self.gid != other.gid) {
            return false;
        }
        match self.ftype {
            FileType::Regular => self.size == other.size && self.mtime == other.mtime,
            FileType::Directory => self.mtime == other.mtime,
            FileType::Symlink => self.symlink_target == other.symlink_target,
            FileType::Block | FileType::Char => {
                self.dev_major == other.dev_major && self.dev_minor == other.dev_minor
            }
            _ => true,
        }
    }

    /// Loose comparison between a cached source record and a freshly written
    /// temp file: type, size, mtime (seconds), perms, ownership if root.
    /// Used as the final sanity check before a temp file replaces the mirror.
    pub fn equal_loose(&self, fs_rec: &Record, compare_ownership: bool) -> bool {
        // A hard-link followup materializes as a regular file.
        let self_type = if self.linked_to.is_some() {
            FileType::Regular
        } else {
            self.ftype
        };
        if self_type != fs_rec.ftype {
            return false;
        }
        if self.is_reg() && self.size != fs_rec.size {
            return false;
        }
        if self.is_reg() && self.mtime != fs_rec.mtime {
            return false;
        }
        if self.ftype != FileType::Symlink && self.perms != fs_rec.perms {
            return false;
        }
        if compare_ownership && (self.uid != fs_rec.uid || self.gid != fs_rec.gid) {
            return false;
        }
        true
    }
}

// ─── Applying attributes back to the filesystem ────────────────────────────

/// Copy ownership, permissions and mtime from `rec` onto `path`.
/// Ownership only sticks when running as root; failures there are ignored.
/// Directories must receive this after their contents are final, or the
/// mtime is perturbed again.
#[cfg(unix)]
pub fn copy_attribs(rec: &Record, path: &Path) -> io::Result<()> {
    use std::os::unix::ffi::OsStrExt;

    if let (Some(uid), Some(gid)) = (rec.uid, rec.gid) {
        let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "NUL in path"))?;
        unsafe {
            // Best effort: non-root lchown to a foreign owner always fails.
            let _ = libc::lchown(c_path.as_ptr(), uid, gid);
        }
    }

    if rec.ftype != FileType::Symlink {
        if let Some(perms) = rec.perms {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(perms))?;
        }
        if let Some(mtime) = rec.mtime {
            let ft = filetime::FileTime::from_unix_time(mtime, 0);
            filetime::set_file_times(path, ft, ft)?;
        }
    } else if let Some(mtime) = rec.mtime {
        let ft = filetime::FileTime::from_unix_time(mtime, 0);
        let _ = filetime::set_symlink_file_times(path, ft, ft);
    }
    Ok(())
}

#[cfg(unix)]
pub fn chmod(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

/// Recreate a fifo, socket or device node described by `rec` at `path`.
/// Device nodes need root; callers substitute a placeholder on failure.
#[cfg(unix)]
pub fn create_special(rec: &Record, path: &Path) -> io::Result<()> {
    use std::os::unix::ffi::OsStrExt;
    let mode = rec.perms.unwrap_or(0o600);
    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "NUL in path"))?;
    let res = unsafe {
        match rec.ftype {
            FileType::Fifo => libc::mkfifo(c_path.as_ptr(), mode as libc::mode_t),
            FileType::Socket => {
                libc::mknod(c_path.as_ptr(), libc::S_IFSOCK | mode as libc::mode_t, 0)
            }
            FileType::Block | FileType::Char => {
                let dev = libc::makedev(rec.dev_major.unwrap_or(0), rec.dev_minor.unwrap_or(0));
                let kind = if rec.ftype == FileType::Block {
                    libc::S_IFBLK
                } else {
                    libc::S_IFCHR
                };
                libc::mknod(c_path.as_ptr(), kind | mode as libc::mode_t, dev)
            }
            _ => return Err(io::Error::new(io::ErrorKind::InvalidInput, "not a special file")),
        }
    };
    if res != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idx(parts: &[&str]) -> Index {
        Index(parts.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn index_ordering_is_componentwise() {
        // ("a","b") sorts before ("ab",): component-wise, not joined-string.
        let a_b = idx(&["a", "b"]);
        let ab = idx(&["ab"]);
        assert!(a_b < ab);
        assert!(idx(&[]) < idx(&["a"]));
        assert!(idx(&["a"]) < idx(&["a", "a"]));
    }

    #[test]
    fn index_prefix_and_parent() {
        let p = idx(&["a", "b"]);
        assert!(idx(&["a"]).is_prefix_of(&p));
        assert!(idx(&[]).is_prefix_of(&p));
        assert!(!idx(&["b"]).is_prefix_of(&p));
        assert_eq!(p.parent(), Some(idx(&["a"])));
        assert_eq!(idx(&[]).parent(), None);
    }

    #[test]
    fn index_safety() {
        assert!(idx(&["a", "b.txt"]).is_safe());
        assert!(!idx(&[".."]).is_safe());
        assert!(!idx(&["a/b"]).is_safe());
        assert!(!idx(&[""]).is_safe());
    }

    #[test]
    fn record_roundtrips_through_json() {
        let mut r = Record::absent(idx(&["x"]));
        r.ftype = FileType::Regular;
        r.size = Some(4);
        r.mtime = Some(1234);
        r.perms = Some(0o644);
        let json = serde_json::to_string(&r).unwrap();
        let back: Record = serde_json::from_str(&json).unwrap();
        assert!(r.equal_content(&back, true));
        assert_eq!(back.index, r.index);
    }

    #[test]
    fn equal_content_detects_changes() {
        let mut a = Record::absent(idx(&["x"]));
        a.ftype = FileType::Regular;
        a.size = Some(2);
        a.mtime = Some(100);
        a.perms = Some(0o644);
        let mut b = a.clone();
        assert!(a.equal_content(&b, false));
        b.mtime = Some(101);
        assert!(!a.equal_content(&b, false));
        b = a.clone();
        b.uid = Some(1000);
        assert!(a.equal_content(&b, false));
        assert!(!a.equal_content(&b, true));
    }

    #[cfg(unix)]
    #[test]
    fn from_path_stats_a_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("hello");
        std::fs::write(&f, b"hi").unwrap();
        let r = Record::from_path(&f, idx(&["hello"])).unwrap();
        assert!(r.is_reg());
        assert_eq!(r.size, Some(2));
        assert!(r.perms.is_some());

        let gone = Record::from_path(&dir.path().join("nope"), idx(&["nope"])).unwrap();
        assert!(!gone.exists());
    }
}
