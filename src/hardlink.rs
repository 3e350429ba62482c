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
//! Hard-link tracking — groups records sharing an inode across one tree walk.
//! The first member of a group carries content; later members become links.

use std::collections::HashMap;

use crate::record::{Index, Record};

#[derive(Debug)]
struct Group {
    first: Index,
    sha256: Option<String>,
    seen: u64,
    total: u64,
}

/// Tracks `(device, inode)` groups on the source and destination sides of
/// the current walk. Entries are freed once every member has been processed.
#[derive(Debug, Default)]
pub struct HardlinkTracker {
    src: HashMap<(u64, u64), Group>,
    dest: HashMap<(u64, u64), Group>,
}

impl HardlinkTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a collated pair. Only multiply-linked regular files matter.
    pub fn add(&mut self, source: Option<&Record>, dest: Option<&Record>) {
        if let Some(rec) = source {
            Self::add_one(&mut self.src, rec);
        }
        if let Some(rec) = dest {
            Self::add_one(&mut self.dest, rec);
        }
    }

    fn add_one(map: &mut HashMap<(u64, u64), Group>, rec: &Record) {
        if !rec.has_multiple_links() {
            return;
        }
        let Some(key) = rec.inode else { return };
        map.entry(key)
            .and_modify(|g| g.seen += 1)
            .or_insert_with(|| Group {
                first: rec.index.clone(),
                sha256: None,
                seen: 1,
                total: rec.nlink.unwrap_or(1),
            });
    }

    /// True iff `rec` is a followup member of a source-side group, i.e. its
    /// inode was first seen at an earlier index.
    pub fn is_linked(&self, rec: &Record) -> bool {
        self.link_index(rec)
            .map_or(false, |first| first != rec.index)
    }

    /// The index of the group carrier for `rec`'s inode.
    pub fn link_index(&self, rec: &Record) -> Option<Index> {
        if !rec.has_multiple_links() {
            return None;
        }
        rec.inode
            .and_then(|key| self.src.get(&key))
            .map(|g| g.first.clone())
    }

    /// Equality for hard-link purposes: both sides must agree on whether the
    /// entry is a followup, and followups must point at the same carrier.
    pub fn record_eq(&self, source: Option<&Record>, dest: Option<&Record>) -> bool {
        let (Some(src), Some(dst)) = (source, dest) else {
            return source.is_none() && dest.is_none();
        };
        if !src.has_multiple_links() && !dst.has_multiple_links() {
            return true; // no hard-link constraints on either side
        }
        let src_first = src
            .inode
            .and_then(|k| self.src.get(&k))
            .map(|g| g.first.clone());
        let dst_first = dst
            .inode
            .and_then(|k| self.dest.get(&k))
            .map(|g| g.first.clone());
        src_first == dst_first
    }

    /// Remember the content hash computed for the group carrier so followup
    /// members inherit it in the metadata.
    pub fn set_sha256(&mut self, rec: &Record, sha: &str) {
        if let Some(key) = rec.inode {
            if let Some(g) = self.src.get_mut(&key) {
                g.sha256 = Some(sha.to_string());
            }
        }
    }

    pub fn sha256(&self, rec: &Record) -> Option<String> {
        rec.inode
            .and_then(|key| self.src.get(&key))
            .and_then(|g| g.sha256.clone())
    }

    /// Called when a pair leaves the cache; frees a group once all its
    /// members have passed through.
    pub fn del(&mut self, source: Option<&Record>, dest: Option<&Record>) {
        if let Some(rec) = source {
            Self::del_one(&mut self.src, rec);
        }
        if let Some(rec) = dest {
            Self::del_one(&mut self.dest, rec);
        }
    }

    fn del_one(map: &mut HashMap<(u64, u64), Group>, rec: &Record) {
        let Some(key) = rec.inode else { return };
        if let Some(g) = map.get(&key) {
            if g.seen >= g.total {
                map.remove(&key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FileType;

    fn linked_rec(parts: &[&str], ino: u64, nlink: u64) -> Record {
        let mut r = Record::absent(Index(parts.iter().map(|s| s.to_string()).collect()));
        r.ftype = FileType::Regular;
        r.size = Some(1);
        r.inode = Some((7, ino));
        r.nlink = Some(nlink);
        r
    }

    #[test]
    fn first_member_carries_followups_link() {
        let mut hl = HardlinkTracker::new();
        let x = linked_rec(&["x"], 42, 2);
        let y = linked_rec(&["y"], 42, 2);
        hl.add(Some(&x), None);
        assert!(!hl.is_linked(&x));
        hl.add(Some(&y), None);
        assert!(hl.is_linked(&y));
        assert_eq!(hl.link_index(&y), Some(x.index.clone()));
    }

    #[test]
    fn group_freed_after_all_members_seen() {
        let mut hl = HardlinkTracker::new();
        let x = linked_rec(&["x"], 9, 2);
        let y = linked_rec(&["y"], 9, 2);
        hl.add(Some(&x), None);
        hl.add(Some(&y), None);
        hl.del(Some(&x), None);
        hl.del(Some(&y), None);
        assert!(hl.src.is_empty());
    }

    #[test]
    fn record_eq_compares_group_shape() {
        let mut hl = HardlinkTracker::new();
        let sx = linked_rec(&["x"], 1, 2);
        let sy = linked_rec(&["y"], 1, 2);
        let dx = linked_rec(&["x"], 100, 2);
        let dy = linked_rec(&["y"], 100, 2);
        hl.add(Some(&sx), Some(&dx));
        hl.add(Some(&sy), Some(&dy));
        // both followups point at "x" → equal
        assert!(hl.record_eq(Some(&sy), Some(&dy)));

        // dest side linked to a different carrier → not equal
        let mut hl2 = HardlinkTracker::new();
        let dz = linked_rec(&["z"], 200, 2);
        let dy2 = linked_rec(&["y"], 200, 2);
        hl2.add(Some(&sx), Some(&dz));
        hl2.add(Some(&sy), Some(&dy2));
        assert!(!hl2.record_eq(Some(&sy), Some(&dy2)));

        // unlinked on both sides → no constraint
        let mut a = Record::absent(Index(vec!["a".into()]));
        a.ftype = FileType::Regular;
        a.nlink = Some(1);
        assert!(HardlinkTracker::new().record_eq(Some(&a), Some(&a.clone())));
    }
}
