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
//! Generic depth-first pre-order driver over an index-ordered record stream.
//!
//! Directories need work on both sides of their contents: attributes must be
//! applied only after every child is final, and a directory replaced by a
//! file can only be removed once its children are gone. The reducer keeps a
//! stack of in-progress branches parallel to the index path and calls the
//! branch hooks at the right moments.

use anyhow::Result;

use crate::record::{Index, Record};

/// Hooks for one node of the tree. Leaves are handled by a throwaway branch
/// via `fast_process_file`; directories get a pushed branch whose
/// `end_process_directory` fires when the walk leaves the subtree.
pub trait Branch {
    fn can_fast_process(&mut self, index: &Index, rec: &Record) -> bool;
    fn fast_process_file(&mut self, index: &Index, rec: &Record) -> Result<()>;
    fn start_process_directory(&mut self, index: &Index, rec: &Record) -> Result<()>;
    fn end_process_directory(&mut self) -> Result<()>;
}

pub struct TreeReducer<B, F>
where
    B: Branch,
    F: FnMut() -> B,
{
    factory: F,
    stack: Vec<(Index, B)>,
}

impl<B, F> TreeReducer<B, F>
where
    B: Branch,
    F: FnMut() -> B,
{
    pub fn new(factory: F) -> Self {
        TreeReducer {
            factory,
            stack: Vec::new(),
        }
    }

    pub fn process(&mut self, rec: &Record) -> Result<()> {
        let index = rec.index.clone();
        // leave finished subtrees
        while let Some((top, _)) = self.stack.last() {
            if top.is_prefix_of(&index) {
                break;
            }
            let (_, mut branch) = self.stack.pop().expect("checked non-empty");
            branch.end_process_directory()?;
        }

        let mut branch = (self.factory)();
        if branch.can_fast_process(&index, rec) {
            branch.fast_process_file(&index, rec)?;
        } else {
            branch.start_process_directory(&index, rec)?;
            self.stack.push((index, branch));
        }
        Ok(())
    }

    pub fn finish(&mut self) -> Result<()> {
        while let Some((_, mut branch)) = self.stack.pop() {
            branch.end_process_directory()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct LogBranch {
        log: Rc<RefCell<Vec<String>>>,
        my_index: Option<Index>,
    }

    impl Branch for LogBranch {
        fn can_fast_process(&mut self, _index: &Index, rec: &Record) -> bool {
            !rec.is_dir()
        }
        fn fast_process_file(&mut self, index: &Index, _rec: &Record) -> Result<()> {
            self.log.borrow_mut().push(format!("file {}", index));
            Ok(())
        }
        fn start_process_directory(&mut self, index: &Index, _rec: &Record) -> Result<()> {
            self.my_index = Some(index.clone());
            self.log.borrow_mut().push(format!("start {}", index));
            Ok(())
        }
        fn end_process_directory(&mut self) -> Result<()> {
            let idx = self.my_index.clone().unwrap();
            self.log.borrow_mut().push(format!("end {}", idx));
            Ok(())
        }
    }

    fn dir_rec(parts: &[&str]) -> Record {
        let mut r = Record::absent(Index(parts.iter().map(|s| s.to_string()).collect()));
        r.ftype = crate::record::FileType::Directory;
        r
    }

    fn file_rec(parts: &[&str]) -> Record {
        let mut r = Record::absent(Index(parts.iter().map(|s| s.to_string()).collect()));
        r.ftype = crate::record::FileType::Regular;
        r.size = Some(0);
        r
    }

    #[test]
    fn directories_open_and_close_around_their_contents() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let log2 = log.clone();
        let mut itr = TreeReducer::new(move || LogBranch {
            log: log2.clone(),
            my_index: None,
        });

        for rec in [
            dir_rec(&[]),
            dir_rec(&["a"]),
            file_rec(&["a", "f"]),
            dir_rec(&["a", "sub"]),
            file_rec(&["a", "sub", "g"]),
            file_rec(&["b"]),
        ] {
            itr.process(&rec).unwrap();
        }
        itr.finish().unwrap();

        assert_eq!(
            *log.borrow(),
            vec![
                "start .",
                "start a",
                "file a/f",
                "start a/sub",
                "file a/sub/g",
                "end a/sub",
                "end a",
                "file b",
                "end ."
            ]
        );
    }
}
