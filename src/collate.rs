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
//! Collation — merge two index-ordered record streams into matched pairs.

use anyhow::Result;

use crate::errors::SessionError;
use crate::record::{Index, Record};

pub type Pair = (Option<Record>, Option<Record>);

/// Merge two ascending-index record streams into `(left, right)` pairs.
/// A side with no record at the current index yields `None`. Holds at most
/// one record per side; an out-of-order input is session-fatal.
pub struct Collated<A, B>
where
    A: Iterator<Item = Record>,
    B: Iterator<Item = Record>,
{
    a: std::iter::Peekable<A>,
    b: std::iter::Peekable<B>,
    last_a: Option<Index>,
    last_b: Option<Index>,
}

impl<A, B> Collated<A, B>
where
    A: Iterator<Item = Record>,
    B: Iterator<Item = Record>,
{
    pub fn new(a: A, b: B) -> Self {
        Collated {
            a: a.peekable(),
            b: b.peekable(),
            last_a: None,
            last_b: None,
        }
    }

    fn take_a(&mut self) -> Result<Record> {
        let rec = self.a.next().expect("peeked");
        check_order(&mut self.last_a, &rec.index)?;
        Ok(rec)
    }

    fn take_b(&mut self) -> Result<Record> {
        let rec = self.b.next().expect("peeked");
        check_order(&mut self.last_b, &rec.index)?;
        Ok(rec)
    }

    /// Next pair in ascending index order, or `None` when both sides are dry.
    pub fn next_pair(&mut self) -> Result<Option<Pair>> {
        match (self.a.peek(), self.b.peek()) {
            (None, None) => Ok(None),
            (Some(_), None) => Ok(Some((Some(self.take_a()?), None))),
            (None, Some(_)) => Ok(Some((None, Some(self.take_b()?)))),
            (Some(ra), Some(rb)) => {
                if ra.index < rb.index {
                    Ok(Some((Some(self.take_a()?), None)))
                } else if ra.index > rb.index {
                    Ok(Some((None, Some(self.take_b()?))))
                } else {
                    Ok(Some((Some(self.take_a()?), Some(self.take_b()?))))
                }
            }
        }
    }
}

fn check_order(last: &mut Option<Index>, next: &Index) -> Result<()> {
    if let Some(prev) = last.as_ref() {
        if next < prev {
            return Err(SessionError::StreamOrderViolation {
                prev: prev.to_string(),
                next: next.to_string(),
            }
            .into());
        }
    }
    *last = Some(next.clone());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;

    fn rec(parts: &[&str]) -> Record {
        Record::absent(Index(parts.iter().map(|s| s.to_string()).collect()))
    }

    fn drain<A, B>(mut c: Collated<A, B>) -> Vec<(Option<String>, Option<String>)>
    where
        A: Iterator<Item = Record>,
        B: Iterator<Item = Record>,
    {
        let mut out = Vec::new();
        while let Some((a, b)) = c.next_pair().unwrap() {
            out.push((
                a.map(|r| r.index.to_string()),
                b.map(|r| r.index.to_string()),
            ));
        }
        out
    }

    #[test]
    fn collates_matching_and_one_sided() {
        let left = vec![rec(&["a"]), rec(&["b"]), rec(&["d"])];
        let right = vec![rec(&["b"]), rec(&["c"]), rec(&["d"])];
        let pairs = drain(Collated::new(left.into_iter(), right.into_iter()));
        assert_eq!(
            pairs,
            vec![
                (Some("a".into()), None),
                (Some("b".into()), Some("b".into())),
                (None, Some("c".into())),
                (Some("d".into()), Some("d".into())),
            ]
        );
    }

    #[test]
    fn empty_streams_collate_to_nothing() {
        let pairs = drain(Collated::new(std::iter::empty(), std::iter::empty()));
        assert!(pairs.is_empty());
    }

    #[test]
    fn pairs_come_out_in_ascending_index_order() {
        let left = vec![rec(&["a"]), rec(&["a", "x"]), rec(&["ab"])];
        let right = vec![rec(&["a", "y"])];
        let mut c = Collated::new(left.into_iter(), right.into_iter());
        let mut last: Option<Index> = None;
        while let Some((a, b)) = c.next_pair().unwrap() {
            let idx = a
                .as_ref()
                .map(|r| r.index.clone())
                .or_else(|| b.as_ref().map(|r| r.index.clone()))
                .unwrap();
            if let Some(prev) = &last {
                assert!(idx > *prev);
            }
            last = Some(idx);
        }
    }

    #[test]
    fn out_of_order_input_is_fatal() {
        let left = vec![rec(&["b"]), rec(&["a"])];
        let mut c = Collated::new(left.into_iter(), std::iter::empty());
        c.next_pair().unwrap();
        assert!(c.next_pair().is_err());
    }
}
