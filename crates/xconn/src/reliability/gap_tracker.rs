// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Gap detection and tracking for inbound sequenced messages.
//!
//! Session-side component that detects out-of-order FIX/SoupBinTCP messages
//! and tracks which sequence numbers are still missing, so a session knows
//! when to send a ResendRequest. Automatically merges adjacent ranges to
//! minimize memory overhead.

use std::ops::Range;

use super::SeqRange;

/// Maximum number of gap ranges to track
///
/// If exceeded, oldest gaps are dropped (log warning, continue).
/// 100 ranges is sufficient for most scenarios (burst loss, reordering).
const MAX_GAP_RANGES: usize = 100;

/// Tracks gaps (missing sequence numbers) in inbound messages for a session,
/// supporting:
/// - Out-of-order packet detection
/// - Automatic range merging
/// - Bounded memory (max 100 ranges)
///
/// # Algorithm
///
/// On `on_receive(seq)`:
/// 1. If `seq == last_seen + 1` -> contiguous, no gap
/// 2. If `seq > last_seen + 1` -> gap detected: `[last_seen+1..seq)`
/// 3. If `seq <= last_seen` -> out-of-order (fill existing gap or duplicate)
///
/// # Example
///
/// ```ignore
/// let mut tracker = GapTracker::new();
///
/// tracker.on_receive(1); // last_seen = 1
/// tracker.on_receive(2); // last_seen = 2, no gap
/// tracker.on_receive(5); // last_seen = 5, gap [3..5)
/// assert_eq!(tracker.pending_gaps(), &[3..5]);
///
/// tracker.on_receive(3); // fills part of gap
/// assert_eq!(tracker.pending_gaps(), &[4..5]);
/// ```
#[derive(Debug, Clone)]
pub struct GapTracker {
    /// Highest sequence number seen so far
    ///
    /// Invariant: `last_seen >= 0` (starts at 0, first packet sets to 1+)
    last_seen: u64,

    /// List of gap ranges (missing sequences)
    ///
    /// Each range `[start..end)` represents missing sequences.
    /// Ranges are kept sorted and merged when adjacent.
    ///
    /// Capacity: max `MAX_GAP_RANGES` (100), oldest dropped if exceeded.
    gaps: Vec<Range<u64>>,
}

impl GapTracker {
    /// Create a new gap tracker
    ///
    /// Starts with `last_seen = 0` (no packets received yet).
    pub fn new() -> Self {
        Self {
            last_seen: 0,
            gaps: Vec::with_capacity(MAX_GAP_RANGES),
        }
    }

    /// Process received sequence number
    ///
    /// Updates `last_seen` and gap ranges based on received sequence.
    ///
    /// # Cases
    ///
    /// 1. **Contiguous**: `seq == last_seen + 1` -> update `last_seen`, no gap
    /// 2. **Forward jump**: `seq > last_seen + 1` -> gap `[last_seen+1..seq)`, update `last_seen`
    /// 3. **Out-of-order**: `seq <= last_seen` -> fill gap or duplicate (no update to `last_seen`)
    ///
    /// # Example
    ///
    /// ```ignore
    /// let mut tracker = GapTracker::new();
    /// tracker.on_receive(1); // last_seen = 1
    /// tracker.on_receive(3); // gap [2..3), last_seen = 3
    /// tracker.on_receive(2); // fills gap [2..3), last_seen = 3
    /// ```
    pub fn on_receive(&mut self, seq: u64) {
        if seq == 0 {
            // MsgSeqNum / sequenced-message numbering starts at 1, ignore 0
            return;
        }

        match seq.cmp(&(self.last_seen + 1)) {
            std::cmp::Ordering::Equal => {
                // Case 1: Contiguous (no gap)
                self.last_seen = seq;
            }
            std::cmp::Ordering::Greater => {
                // Case 2: Forward jump (gap detected)
                let gap = SeqRange::from_gap(self.last_seen, seq).into_range();
                self.gaps.push(gap);
                self.last_seen = seq;

                // Merge adjacent ranges and enforce capacity
                self.merge_and_compact();
            }
            std::cmp::Ordering::Less => {
                // Case 3: Out-of-order (fill gap or duplicate)
                self.mark_filled(SeqRange::from_sequence(seq));
            }
        }
    }

    /// Get current pending gaps
    ///
    /// Returns slice of gap ranges (sorted, merged).
    ///
    /// # Example
    ///
    /// ```ignore
    /// tracker.on_receive(1);
    /// tracker.on_receive(5);
    /// assert_eq!(tracker.pending_gaps(), &[2..5]);
    /// ```
    pub fn pending_gaps(&self) -> &[Range<u64>] {
        &self.gaps
    }

    /// Mark a range as filled (received out-of-order)
    ///
    /// Removes or splits gap ranges that overlap with `filled`.
    ///
    /// # Example
    ///
    /// ```ignore
    /// tracker.on_receive(1);
    /// tracker.on_receive(5); // gap [2..5)
    /// tracker.mark_filled(SeqRange::new(3, 4)); // gap becomes [2..3) + [4..5)
    /// ```
    pub fn mark_filled(&mut self, filled: SeqRange) {
        let mut updated_gaps = Vec::with_capacity(self.gaps.len());

        for gap in &self.gaps {
            if filled.end <= gap.start || filled.start >= gap.end {
                // No overlap, keep gap as-is
                updated_gaps.push(gap.clone());
            } else {
                // Overlap: split gap into [gap.start..filled.start) and [filled.end..gap.end)
                if gap.start < filled.start {
                    updated_gaps.push(gap.start..filled.start);
                }
                if filled.end < gap.end {
                    updated_gaps.push(filled.end..gap.end);
                }
            }
        }

        self.gaps = updated_gaps;
    }

    /// Mark a range as lost (counterparty declared it via SequenceReset-GapFill).
    ///
    /// Removes the range from pending gaps and updates `last_seen` to represent
    /// the highest contiguous sequence number that has been accounted for (received
    /// or declared lost).
    ///
    /// # Semantics
    ///
    /// When a gap-fill [start..end) is declared:
    /// 1. Mark sequences [start..end) as lost (remove from pending gaps)
    /// 2. Update `last_seen` to the end of the gap minus 1 (last sequence in gap)
    /// 3. This allows the session to stop requesting those sequences
    ///
    /// `last_seen` may be "downgraded" if sequences beyond the gap had already
    /// arrived; the gap-fill forces us to acknowledge only up to its end, and
    /// sequences beyond it are treated as out of order again until contiguous.
    ///
    /// # Example
    ///
    /// ```ignore
    /// tracker.on_receive(1); // last_seen = 1
    /// tracker.on_receive(5); // gap [2..5), last_seen = 5 (premature)
    /// tracker.mark_lost(SeqRange::new(2, 5)); // Mark 2-4 as lost
    /// // Result: last_seen = 4 (end of gap - 1)
    /// // Sequence 5 is now considered "next expected" even though received
    /// ```
    pub fn mark_lost(&mut self, lost: SeqRange) {
        if lost.start >= lost.end {
            return;
        }

        // Remove lost range from pending gaps
        self.mark_filled(lost.clone());

        // Update last_seen to end of lost range - 1
        // This represents "highest sequence accounted for (received OR lost)"
        if lost.end > 0 {
            self.last_seen = lost.end - 1;
        }

        self.merge_and_compact();
    }

    /// Get highest sequence number seen
    ///
    /// Returns `last_seen` value (updated by `on_receive` when seq > last_seen).
    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }

    /// Get total number of missing sequences
    ///
    /// Sums the size of all gap ranges.
    ///
    /// # Example
    ///
    /// ```ignore
    /// tracker.on_receive(1);
    /// tracker.on_receive(5); // gap [2..5) = 3 missing
    /// assert_eq!(tracker.total_missing(), 3);
    /// ```
    pub fn total_missing(&self) -> u64 {
        self.gaps.iter().map(|r| r.end - r.start).sum()
    }

    /// Merge adjacent ranges and enforce capacity limit
    ///
    /// Merges ranges like `[1..3)` + `[3..5)` -> `[1..5)`.
    /// If `gaps.len() > MAX_GAP_RANGES`, drops oldest gaps (FIFO).
    fn merge_and_compact(&mut self) {
        if self.gaps.is_empty() {
            return;
        }

        // Sort gaps by start (should already be sorted, but enforce)
        self.gaps.sort_by_key(|r| r.start);

        // Merge adjacent ranges
        let mut merged = Vec::with_capacity(self.gaps.len());
        let mut current = self.gaps[0].clone();

        for gap in &self.gaps[1..] {
            if gap.start == current.end {
                // Adjacent: merge
                current.end = gap.end;
            } else {
                // Not adjacent: push current, start new
                merged.push(current.clone());
                current = gap.clone();
            }
        }
        merged.push(current);

        self.gaps = merged;

        // Enforce capacity limit (drop oldest if needed)
        if self.gaps.len() > MAX_GAP_RANGES {
            let excess = self.gaps.len() - MAX_GAP_RANGES;
            log::debug!(
                "GapTracker: capacity exceeded, dropping {} oldest gaps (total {} -> {})",
                excess,
                self.gaps.len(),
                MAX_GAP_RANGES
            );
            self.gaps.drain(0..excess);
        }
    }
}

impl Default for GapTracker {
    fn default() -> Self {
        Self::new()
    }
}
