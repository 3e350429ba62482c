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
//! Rolling-checksum signature / delta / patch primitives.
//!
//! Signatures summarize a basis file block by block with an Adler-style weak
//! checksum (s1/s2 truncated to 16 bits) and a truncated blake3 strong hash.
//! A delta against a signature copies matching basis blocks and carries the
//! rest as literals; patching replays the delta over the basis. Deltas are
//! reverse-applicable here: the basis is the *newer* file, so applying the
//! delta to it yields the older state.

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom, Write};

pub const BLOCK_SIZE: usize = 2048;
const STRONG_LEN: usize = 16;

const DELTA_MAGIC: &[u8; 8] = b"rgdelta1";
const OP_END: u8 = 0;
const OP_COPY: u8 = 1;
const OP_LITERAL: u8 = 2;

// ─── Weak rolling checksum ─────────────────────────────────────────────────

/// rsync's Adler-32 variant: `s1` sums bytes, `s2` sums the running prefix
/// sums, both truncated to 16 bits after every update.
#[derive(Clone, Copy, Debug, Default)]
struct Rolling {
    s1: u32,
    s2: u32,
    len: u32,
}

impl Rolling {
    fn from_block(block: &[u8]) -> Self {
        let mut r = Rolling::default();
        for &b in block {
            r.s1 = (r.s1 + u32::from(b)) & 0xffff;
            r.s2 = (r.s2 + r.s1) & 0xffff;
        }
        r.len = block.len() as u32;
        r
    }

    /// Slide the window one byte: drop `out`, append `inc`.
    fn rotate(&mut self, out: u8, inc: u8) {
        self.s1 = self.s1.wrapping_add(u32::from(inc)).wrapping_sub(u32::from(out)) & 0xffff;
        self.s2 = self
            .s2
            .wrapping_add(self.s1)
            .wrapping_sub(self.len.wrapping_mul(u32::from(out)))
            & 0xffff;
    }

    fn digest(&self) -> u32 {
        (self.s2 << 16) | self.s1
    }
}

fn strong_hash(block: &[u8]) -> [u8; STRONG_LEN] {
    let mut out = [0u8; STRONG_LEN];
    out.copy_from_slice(&blake3::hash(block).as_bytes()[..STRONG_LEN]);
    out
}

// ─── Signature ─────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct Signature {
    pub block_len: usize,
    blocks: Vec<(u32, [u8; STRONG_LEN])>,
    by_weak: HashMap<u32, Vec<u32>>,
}

/// Rolling-checksum summary of a file, streamed in bounded memory.
pub fn signature<R: Read>(mut basis: R) -> Result<Signature> {
    let mut blocks = Vec::new();
    let mut by_weak: HashMap<u32, Vec<u32>> = HashMap::new();
    let mut buf = vec![0u8; BLOCK_SIZE];
    loop {
        let n = read_full(&mut basis, &mut buf)?;
        if n == 0 {
            break;
        }
        let block = &buf[..n];
        let weak = Rolling::from_block(block).digest();
        by_weak
            .entry(weak)
            .or_default()
            .push(blocks.len() as u32);
        blocks.push((weak, strong_hash(block)));
        if n < BLOCK_SIZE {
            break;
        }
    }
    Ok(Signature {
        block_len: BLOCK_SIZE,
        blocks,
        by_weak,
    })
}

fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = r.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

// ─── Delta ─────────────────────────────────────────────────────────────────

/// Compute a delta that rebuilds `target` out of basis blocks and literals.
/// The encoded form is what lands (gzipped) inside `.diff` increment files.
pub fn delta<R: Read>(sig: &Signature, mut target: R) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    target
        .read_to_end(&mut data)
        .context("reading delta target")?;

    let mut out = Vec::new();
    out.extend_from_slice(DELTA_MAGIC);
    out.extend_from_slice(&(sig.block_len as u32).to_le_bytes());

    let block_len = sig.block_len;
    let mut literal: Vec<u8> = Vec::new();
    // adjacent block copies coalesce into one op before being written out
    let mut pending_copy: Option<(u64, u64)> = None;
    let mut pos = 0usize;
    let mut rolling: Option<Rolling> = None;

    while pos < data.len() {
        let window_end = (pos + block_len).min(data.len());
        let window = &data[pos..window_end];
        let roll = match rolling.take() {
            Some(r) if window.len() == block_len => r,
            _ => Rolling::from_block(window),
        };

        let matched = sig
            .by_weak
            .get(&roll.digest())
            .and_then(|candidates| {
                let strong = strong_hash(window);
                candidates
                    .iter()
                    .find(|&&i| {
                        let (w, s) = sig.blocks[i as usize];
                        w == roll.digest() && s == strong
                    })
                    .copied()
            })
            // the final short block only matches the final signature block
            .filter(|&i| window.len() == block_len || i as usize == sig.blocks.len() - 1);

        if let Some(block_idx) = matched {
            flush_literal(&mut out, &mut literal);
            let offset = block_idx as u64 * block_len as u64;
            let len = window.len() as u64;
            pending_copy = match pending_copy {
                Some((o, l)) if o + l == offset => Some((o, l + len)),
                Some((o, l)) => {
                    write_copy(&mut out, o, l);
                    Some((offset, len))
                }
                None => Some((offset, len)),
            };
            pos = window_end;
            rolling = None;
        } else {
            if let Some((o, l)) = pending_copy.take() {
                write_copy(&mut out, o, l);
            }
            literal.push(data[pos]);
            if window_end < data.len() {
                let mut r = roll;
                r.rotate(data[pos], data[window_end]);
                rolling = Some(r);
            } else {
                rolling = None;
            }
            pos += 1;
        }
    }
    if let Some((o, l)) = pending_copy.take() {
        write_copy(&mut out, o, l);
    }
    flush_literal(&mut out, &mut literal);
    out.push(OP_END);
    Ok(out)
}

fn flush_literal(out: &mut Vec<u8>, literal: &mut Vec<u8>) {
    if literal.is_empty() {
        return;
    }
    out.push(OP_LITERAL);
    out.extend_from_slice(&(literal.len() as u64).to_le_bytes());
    out.extend_from_slice(literal);
    literal.clear();
}

fn write_copy(out: &mut Vec<u8>, offset: u64, len: u64) {
    out.push(OP_COPY);
    out.extend_from_slice(&offset.to_le_bytes());
    out.extend_from_slice(&len.to_le_bytes());
}

// ─── Patch ─────────────────────────────────────────────────────────────────

/// Apply `delta` over a seekable basis, writing the patched result and
/// returning its SHA-256 hex digest.
pub fn patch<B, W>(mut basis: B, delta: &[u8], mut out: W) -> Result<String>
where
    B: Read + Seek,
    W: Write,
{
    if delta.len() < 12 || &delta[..8] != DELTA_MAGIC {
        bail!("not a delta stream (bad magic)");
    }
    let mut pos = 12; // magic + block_len (informational)
    let mut hasher = Sha256::new();
    loop {
        let op = *delta
            .get(pos)
            .context("truncated delta stream")?;
        pos += 1;
        match op {
            OP_END => break,
            OP_COPY => {
                let offset = read_u64(delta, &mut pos)?;
                let len = read_u64(delta, &mut pos)?;
                basis.seek(SeekFrom::Start(offset))?;
                let mut remaining = len;
                let mut buf = vec![0u8; 65536];
                while remaining > 0 {
                    let want = remaining.min(buf.len() as u64) as usize;
                    basis.read_exact(&mut buf[..want]).context("basis too short for delta copy")?;
                    hasher.update(&buf[..want]);
                    out.write_all(&buf[..want])?;
                    remaining -= want as u64;
                }
            }
            OP_LITERAL => {
                let len = read_u64(delta, &mut pos)? as usize;
                let bytes = delta
                    .get(pos..pos + len)
                    .context("truncated delta literal")?;
                hasher.update(bytes);
                out.write_all(bytes)?;
                pos += len;
            }
            other => bail!("unknown delta opcode {other}"),
        }
    }
    out.flush()?;
    Ok(hex::encode(hasher.finalize()))
}

fn read_u64(buf: &[u8], pos: &mut usize) -> Result<u64> {
    let bytes = buf
        .get(*pos..*pos + 8)
        .context("truncated delta stream")?;
    *pos += 8;
    Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn roundtrip(basis: &[u8], target: &[u8]) -> Vec<u8> {
        let sig = signature(Cursor::new(basis)).unwrap();
        let d = delta(&sig, Cursor::new(target)).unwrap();
        let mut out = Vec::new();
        let sha = patch(Cursor::new(basis), &d, &mut out).unwrap();
        assert_eq!(sha, hex::encode(Sha256::digest(target)));
        assert_eq!(out, target);
        d
    }

    #[test]
    fn small_files_roundtrip() {
        roundtrip(b"bb", b"aa");
        roundtrip(b"", b"something");
        roundtrip(b"something", b"");
        roundtrip(b"same", b"same");
    }

    #[test]
    fn rolling_rotate_matches_fresh_block() {
        let data: Vec<u8> = (0..4096u32).map(|i| (i * 31 % 251) as u8).collect();
        let mut roll = Rolling::from_block(&data[..BLOCK_SIZE]);
        for start in 1..64 {
            roll.rotate(data[start - 1], data[start + BLOCK_SIZE - 1]);
            let fresh = Rolling::from_block(&data[start..start + BLOCK_SIZE]);
            assert_eq!(roll.digest(), fresh.digest(), "window at {start}");
        }
    }

    #[test]
    fn shared_blocks_become_copies() {
        let mut basis = vec![0u8; BLOCK_SIZE * 4];
        for (i, b) in basis.iter_mut().enumerate() {
            *b = (i % 253) as u8;
        }
        // target: same content with one block changed and a prefix inserted
        let mut target = b"inserted-prefix".to_vec();
        target.extend_from_slice(&basis);
        for b in &mut target[15 + BLOCK_SIZE..15 + 2 * BLOCK_SIZE] {
            *b = b.wrapping_add(1);
        }
        let d = roundtrip(&basis, &target);
        // delta must be much smaller than the target (blocks were reused)
        assert!(d.len() < target.len() / 2, "delta {} vs {}", d.len(), target.len());
    }

    #[test]
    fn misaligned_suffix_still_matches() {
        let basis: Vec<u8> = (0..3 * BLOCK_SIZE as u32).map(|i| (i % 239) as u8).collect();
        let mut target = vec![9u8; 7];
        target.extend_from_slice(&basis);
        roundtrip(&basis, &target);
    }

    #[test]
    fn patch_rejects_garbage() {
        let mut out = Vec::new();
        assert!(patch(Cursor::new(b"basis".to_vec()), b"nonsense", &mut out).is_err());
    }
}
