use std::ops::RangeInclusive;

/// Inclusive block range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl BlockRange {
    pub fn len(&self) -> u64 {
        self.to - self.from + 1
    }

    pub fn blocks(&self) -> RangeInclusive<u64> {
        self.from..=self.to
    }

    /// The last `lookback` blocks up to and including `head`.
    pub fn lookback(head: u64, lookback: u64) -> Self {
        Self {
            from: head.saturating_sub(lookback),
            to: head,
        }
    }
}

/// Owns the scan cursor: the highest block fully processed.
#[derive(Debug)]
pub struct BlockRangeTracker {
    cursor: u64,
}

impl BlockRangeTracker {
    pub fn new(cursor: u64) -> Self {
        Self { cursor }
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// `[cursor + 1, head]`, or `None` when there is nothing new.
    pub fn next_range(&self, head: u64) -> Option<BlockRange> {
        if head <= self.cursor {
            return None;
        }
        Some(BlockRange {
            from: self.cursor + 1,
            to: head,
        })
    }

    /// Marks everything up to `block` as processed. Never moves backwards.
    pub fn advance(&mut self, block: u64) {
        self.cursor = self.cursor.max(block);
    }
}
