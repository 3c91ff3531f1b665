//! Diff engine: line-level differences between configuration snapshots.
//!
//! The alignment is a longest-common-subsequence diff with a canonical
//! choice among equally long alignments, so that `diff(a, b)` and
//! `diff(b, a)` are mirror images of each other:
//!
//! 1. The common prefix and suffix are kept
//! 2. Lines that occur on only one side are set aside (they can never be kept)
//! 3. Among the remaining lines, the next kept line is the LCS-optimal match
//!    on the earliest anti-diagonal, ties broken by line text
//!
//! Within each gap between kept lines, removed and added lines are paired
//! positionally into `changed` entries, followed by the surplus of one kind.

use crate::snapshot::{ConfigSnapshot, is_capture_banner};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One line-level edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum DiffOp {
    /// Line present on both sides
    Kept { line: String },
    /// Line only in the new side
    Added { line: String },
    /// Line only in the old side
    Removed { line: String },
    /// Old line replaced by new line at the same position
    Changed { from: String, to: String },
}

impl DiffOp {
    /// The same edit seen from the other side.
    pub fn swapped(&self) -> Self {
        match self {
            Self::Kept { line } => Self::Kept { line: line.clone() },
            Self::Added { line } => Self::Removed { line: line.clone() },
            Self::Removed { line } => Self::Added { line: line.clone() },
            Self::Changed { from, to } => Self::Changed {
                from: to.clone(),
                to: from.clone(),
            },
        }
    }

    pub fn is_kept(&self) -> bool {
        matches!(self, Self::Kept { .. })
    }
}

/// Diff summary statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub kept: usize,
    pub added: usize,
    pub removed: usize,
    pub changed: usize,
}

impl DiffSummary {
    /// Total number of edits
    pub fn total(&self) -> usize {
        self.added + self.removed + self.changed
    }

    /// Check if there are any edits
    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }
}

/// Ordered edit script between two line sequences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResult {
    ops: Vec<DiffOp>,
    summary: DiffSummary,
}

impl DiffResult {
    fn from_ops(ops: Vec<DiffOp>) -> Self {
        let mut summary = DiffSummary::default();
        for op in &ops {
            match op {
                DiffOp::Kept { .. } => summary.kept += 1,
                DiffOp::Added { .. } => summary.added += 1,
                DiffOp::Removed { .. } => summary.removed += 1,
                DiffOp::Changed { .. } => summary.changed += 1,
            }
        }
        Self { ops, summary }
    }

    pub fn ops(&self) -> &[DiffOp] {
        &self.ops
    }

    pub fn summary(&self) -> DiffSummary {
        self.summary
    }

    /// True when the two sides are identical.
    pub fn is_empty(&self) -> bool {
        !self.summary.has_changes()
    }

    /// Edits that are not `kept`.
    pub fn changes(&self) -> impl Iterator<Item = &DiffOp> {
        self.ops.iter().filter(|op| !op.is_kept())
    }

    /// The diff seen from the other side: added/removed and changed from/to swapped.
    pub fn swapped(&self) -> Self {
        Self::from_ops(self.ops.iter().map(DiffOp::swapped).collect())
    }
}

/// Diff two snapshots.
pub fn diff(old: &ConfigSnapshot, new: &ConfigSnapshot) -> DiffResult {
    diff_lines(old.lines(), new.lines())
}

/// Diff two line sequences.
pub fn diff_lines(old: &[String], new: &[String]) -> DiffResult {
    let prefix = old.iter().zip(new).take_while(|(a, b)| a == b).count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let old_mid = &old[prefix..old.len() - suffix];
    let new_mid = &new[prefix..new.len() - suffix];

    let mut ops = Vec::with_capacity(old.len().max(new.len()));
    ops.extend(old[..prefix].iter().map(|l| DiffOp::Kept { line: l.clone() }));

    let mut oi = 0;
    let mut ni = 0;
    for (mi, mj) in align(old_mid, new_mid) {
        push_gap(&mut ops, &old_mid[oi..mi], &new_mid[ni..mj]);
        ops.push(DiffOp::Kept {
            line: old_mid[mi].clone(),
        });
        oi = mi + 1;
        ni = mj + 1;
    }
    push_gap(&mut ops, &old_mid[oi..], &new_mid[ni..]);

    ops.extend(
        old[old.len() - suffix..]
            .iter()
            .map(|l| DiffOp::Kept { line: l.clone() }),
    );

    DiffResult::from_ops(ops)
}

fn push_gap(ops: &mut Vec<DiffOp>, removed: &[String], added: &[String]) {
    let paired = removed.len().min(added.len());
    for (from, to) in removed.iter().zip(added) {
        ops.push(DiffOp::Changed {
            from: from.clone(),
            to: to.clone(),
        });
    }
    ops.extend(
        removed[paired..]
            .iter()
            .map(|l| DiffOp::Removed { line: l.clone() }),
    );
    ops.extend(
        added[paired..]
            .iter()
            .map(|l| DiffOp::Added { line: l.clone() }),
    );
}

/// Kept index pairs of a canonical LCS alignment, in increasing order.
fn align(old: &[String], new: &[String]) -> Vec<(usize, usize)> {
    if old.is_empty() || new.is_empty() {
        return Vec::new();
    }

    // Lines unique to one side are never kept; align only the shared ones.
    let old_set: HashSet<&str> = old.iter().map(String::as_str).collect();
    let new_set: HashSet<&str> = new.iter().map(String::as_str).collect();
    let a: Vec<usize> = (0..old.len())
        .filter(|&i| new_set.contains(old[i].as_str()))
        .collect();
    let b: Vec<usize> = (0..new.len())
        .filter(|&j| old_set.contains(new[j].as_str()))
        .collect();

    let n = a.len();
    let m = b.len();
    if n == 0 || m == 0 {
        return Vec::new();
    }

    let same = |i: usize, j: usize| old[a[i]] == new[b[j]];
    let lcs = SuffixLcs::build(n, m, &same);

    let mut pairs = Vec::with_capacity(lcs.get(0, 0) as usize);
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        let target = lcs.get(i, j);
        if target == 0 {
            break;
        }
        let mut best: Option<(usize, usize)> = None;

        // Earliest anti-diagonal holding an optimal match
        let (rows_left, cols_left) = (n - i - 1, m - j - 1);
        for d in 0..=rows_left + cols_left {
            for k in d.saturating_sub(cols_left)..=d.min(rows_left) {
                let (ci, cj) = (i + k, j + d - k);
                if !same(ci, cj) || lcs.get(ci + 1, cj + 1) + 1 != target {
                    continue;
                }
                best = match best {
                    Some((bi, bj)) if old[a[bi]] <= old[a[ci]] => Some((bi, bj)),
                    _ => Some((ci, cj)),
                };
            }
            if best.is_some() {
                break;
            }
        }

        let Some((bi, bj)) = best else { break };
        pairs.push((a[bi], b[bj]));
        i = bi + 1;
        j = bj + 1;
    }
    pairs
}

const WORD_BITS: usize = 64;
/// Words covered by one stored running count
const CHUNK_WORDS: usize = 8;

/// LCS lengths of every pair of suffixes, at one bit per cell.
///
/// Moving one column right along a row lowers the length by at most one,
/// so row `i` is kept as the set of columns `j` where
/// `lcs(i, j) > lcs(i, j + 1)`. The length at `(i, j)` is the number of
/// set bits from `j` to the end of the row. A count of set bits per chunk
/// of words bounds each lookup to a few popcounts.
struct SuffixLcs {
    rows: usize,
    cols: usize,
    words: usize,
    chunks: usize,
    bits: Vec<u64>,
    /// Set bits from the first word of each chunk to the end of its row
    tails: Vec<u32>,
}

impl SuffixLcs {
    fn build(rows: usize, cols: usize, same: impl Fn(usize, usize) -> bool) -> Self {
        let words = cols.div_ceil(WORD_BITS);
        let chunks = words.div_ceil(CHUNK_WORDS);
        let mut bits = vec![0u64; rows * words];
        let mut tails = vec![0u32; rows * chunks];

        // Two rows of plain lengths; the one below starts as the empty suffix
        let mut below = vec![0u32; cols + 1];
        let mut row = vec![0u32; cols + 1];
        for i in (0..rows).rev() {
            row[cols] = 0;
            for j in (0..cols).rev() {
                row[j] = if same(i, j) {
                    below[j + 1] + 1
                } else {
                    below[j].max(row[j + 1])
                };
            }

            let packed = &mut bits[i * words..(i + 1) * words];
            for j in 0..cols {
                if row[j] > row[j + 1] {
                    packed[j / WORD_BITS] |= 1 << (j % WORD_BITS);
                }
            }
            let mut ones = 0;
            for k in (0..chunks).rev() {
                let end = ((k + 1) * CHUNK_WORDS).min(words);
                ones += packed[k * CHUNK_WORDS..end]
                    .iter()
                    .map(|w| w.count_ones())
                    .sum::<u32>();
                tails[i * chunks + k] = ones;
            }
            std::mem::swap(&mut row, &mut below);
        }

        Self {
            rows,
            cols,
            words,
            chunks,
            bits,
            tails,
        }
    }

    /// LCS length of the suffixes starting at `i` and `j`.
    fn get(&self, i: usize, j: usize) -> u32 {
        if i >= self.rows || j >= self.cols {
            return 0;
        }
        let packed = &self.bits[i * self.words..(i + 1) * self.words];
        let word = j / WORD_BITS;
        let next_chunk = word / CHUNK_WORDS + 1;

        let mut ones = (packed[word] >> (j % WORD_BITS)).count_ones();
        ones += packed[word + 1..(next_chunk * CHUNK_WORDS).min(self.words)]
            .iter()
            .map(|w| w.count_ones())
            .sum::<u32>();
        if next_chunk < self.chunks {
            ones += self.tails[i * self.chunks + next_chunk];
        }
        ones
    }

    #[cfg(test)]
    fn heap_bytes(&self) -> usize {
        self.bits.len() * size_of::<u64>() + self.tails.len() * size_of::<u32>()
    }
}

/// Render a diff as unified hunks with `context` lines around each change.
///
/// Returns an empty string when there are no changes.
pub fn unified(diff: &DiffResult, from_label: &str, to_label: &str, context: usize) -> String {
    let rows = rows(diff);
    let changed: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, (tag, _))| *tag != ' ')
        .map(|(i, _)| i)
        .collect();
    if changed.is_empty() {
        return String::new();
    }

    // Line numbers before each row, on both sides
    let mut old_before = Vec::with_capacity(rows.len() + 1);
    let mut new_before = Vec::with_capacity(rows.len() + 1);
    let (mut old_no, mut new_no) = (0usize, 0usize);
    for (tag, _) in &rows {
        old_before.push(old_no);
        new_before.push(new_no);
        if *tag != '+' {
            old_no += 1;
        }
        if *tag != '-' {
            new_no += 1;
        }
    }

    let mut out = format!("--- {from_label}\n+++ {to_label}\n");
    let mut idx = 0;
    while idx < changed.len() {
        let start = changed[idx].saturating_sub(context);
        let mut end = changed[idx] + 1;
        idx += 1;
        while idx < changed.len() && changed[idx] - end <= 2 * context {
            end = changed[idx] + 1;
            idx += 1;
        }
        let end = (end + context).min(rows.len());

        let hunk = &rows[start..end];
        let old_len = hunk.iter().filter(|(t, _)| *t != '+').count();
        let new_len = hunk.iter().filter(|(t, _)| *t != '-').count();
        out.push_str(&format!(
            "@@ -{} +{} @@\n",
            hunk_range(old_before[start], old_len),
            hunk_range(new_before[start], new_len)
        ));
        for (tag, text) in hunk {
            out.push(*tag);
            out.push_str(text);
            out.push('\n');
        }
    }
    out
}

fn hunk_range(before: usize, len: usize) -> String {
    match len {
        0 => format!("{before},0"),
        1 => format!("{}", before + 1),
        _ => format!("{},{}", before + 1, len),
    }
}

/// Flatten ops into tagged rows; each run of edits lists removals first.
fn rows(diff: &DiffResult) -> Vec<(char, &str)> {
    fn flush<'a>(
        rows: &mut Vec<(char, &'a str)>,
        minus: &mut Vec<&'a str>,
        plus: &mut Vec<&'a str>,
    ) {
        rows.extend(minus.drain(..).map(|l| ('-', l)));
        rows.extend(plus.drain(..).map(|l| ('+', l)));
    }

    let mut rows = Vec::with_capacity(diff.ops.len());
    let mut minus: Vec<&str> = Vec::new();
    let mut plus: Vec<&str> = Vec::new();

    for op in &diff.ops {
        match op {
            DiffOp::Kept { line } => {
                flush(&mut rows, &mut minus, &mut plus);
                rows.push((' ', line.as_str()));
            }
            DiffOp::Removed { line } => minus.push(line),
            DiffOp::Added { line } => plus.push(line),
            DiffOp::Changed { from, to } => {
                minus.push(from);
                plus.push(to);
            }
        }
    }
    flush(&mut rows, &mut minus, &mut plus);
    rows
}

/// Cosmetic normalization used when verifying an applied configuration.
///
/// Trailing whitespace and whitespace runs are collapsed; blank lines,
/// bare `!` separators and capture banners are dropped.
pub fn normalized_for_verify(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter(|l| !is_capture_banner(l))
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|l| !l.is_empty() && l != "!")
        .collect()
}
