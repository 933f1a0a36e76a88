//! Missing block ranges and the batches used to fill them.
use std::{collections::BTreeSet, fmt, num::NonZeroU64};

use eyre::{Result, bail};
use serde::{Deserialize, Serialize};

/// Inclusive, contiguous range of block heights that is not fully processed.
///
/// A single missing height is represented with `start == stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DBGap {
    /// First missing height
    pub start: u64,
    /// Last missing height (inclusive)
    pub stop: u64,
}

impl DBGap {
    /// Create a gap, rejecting ranges where `stop < start`.
    pub fn new(start: u64, stop: u64) -> Result<Self> {
        if stop < start {
            bail!("invalid gap: stop {stop} is below start {start}");
        }
        Ok(Self { start, stop })
    }

    /// A gap covering exactly one height.
    pub const fn single(height: u64) -> Self {
        Self { start: height, stop: height }
    }

    /// Number of heights covered by the gap.
    pub const fn len(&self) -> u64 {
        self.stop - self.start + 1
    }

    /// Gaps always cover at least one height.
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Whether `height` falls inside the gap.
    pub const fn contains(&self, height: u64) -> bool {
        self.start <= height && height <= self.stop
    }

    /// Split the gap into ascending batches of at most `batch_size` heights.
    ///
    /// Batches are produced lazily so that a very long gap never materializes
    /// more than one batch at a time.
    pub const fn batches(&self, batch_size: NonZeroU64) -> Batches {
        Batches { next: Some(self.start), stop: self.stop, size: batch_size.get() }
    }
}

impl fmt::Display for DBGap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.stop)
    }
}

/// Iterator over the height batches of a [`DBGap`].
#[derive(Debug, Clone)]
pub struct Batches {
    next: Option<u64>,
    stop: u64,
    size: u64,
}

impl Iterator for Batches {
    type Item = Vec<u64>;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next?;
        let end = start.saturating_add(self.size - 1).min(self.stop);
        self.next = (end < self.stop).then(|| end + 1);
        Some((start..=end).collect())
    }
}

/// Compute the gaps inside `[start, stop]` given the heights that are present.
///
/// Heights outside the range are ignored; input order does not matter. An
/// empty range (`stop < start`) has no gaps.
pub fn gaps_in_range(start: u64, stop: u64, present: impl IntoIterator<Item = u64>) -> Vec<DBGap> {
    if stop < start {
        return Vec::new();
    }

    let present: BTreeSet<u64> =
        present.into_iter().filter(|h| (start..=stop).contains(h)).collect();

    let mut gaps = Vec::new();
    let mut cursor = start;
    for height in present {
        if height > cursor {
            gaps.push(DBGap { start: cursor, stop: height - 1 });
        }
        if height == u64::MAX {
            return gaps;
        }
        cursor = height + 1;
    }
    if cursor <= stop {
        gaps.push(DBGap { start: cursor, stop });
    }
    gaps
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size(n: u64) -> NonZeroU64 {
        NonZeroU64::new(n).unwrap()
    }

    #[test]
    fn new_rejects_inverted_range() {
        assert!(DBGap::new(5, 4).is_err());
        assert_eq!(DBGap::new(4, 4).unwrap(), DBGap::single(4));
    }

    #[test]
    fn batches_split_and_keep_order() {
        let gap = DBGap { start: 100, stop: 104 };
        let batches: Vec<_> = gap.batches(size(2)).collect();
        assert_eq!(batches, vec![vec![100, 101], vec![102, 103], vec![104]]);
    }

    #[test]
    fn batches_single_height() {
        let batches: Vec<_> = DBGap::single(100).batches(size(50)).collect();
        assert_eq!(batches, vec![vec![100]]);
    }

    #[test]
    fn batches_near_u64_max_terminate() {
        let gap = DBGap { start: u64::MAX - 2, stop: u64::MAX };
        let batches: Vec<_> = gap.batches(size(2)).collect();
        assert_eq!(batches, vec![vec![u64::MAX - 2, u64::MAX - 1], vec![u64::MAX]]);
    }

    #[test]
    fn leading_gap_below_first_present_height() {
        assert_eq!(gaps_in_range(0, 3, [3]), vec![DBGap { start: 0, stop: 2 }]);
    }

    #[test]
    fn internal_and_trailing_gaps() {
        let gaps = gaps_in_range(0, 10, [0, 1, 4, 5, 8]);
        assert_eq!(
            gaps,
            vec![
                DBGap { start: 2, stop: 3 },
                DBGap { start: 6, stop: 7 },
                DBGap { start: 9, stop: 10 }
            ]
        );
    }

    #[test]
    fn single_missing_height() {
        assert_eq!(gaps_in_range(99, 101, [99, 101]), vec![DBGap::single(100)]);
    }

    #[test]
    fn no_gaps_when_complete_and_ignores_out_of_range() {
        assert!(gaps_in_range(5, 7, [1, 5, 6, 7, 20]).is_empty());
        assert!(gaps_in_range(7, 5, []).is_empty());
    }
}
