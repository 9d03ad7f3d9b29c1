//! Segment planning.
//!
//! Pure functions that decide how many ranges to open for a resource
//! and how the file splits across them. The count table is a guideline
//! for unpinned downloads; a caller-pinned count wins within the hard
//! bounds. Servers without range support (or with an unknown length)
//! always get exactly one segment.

use crate::config::{MAX_SEGMENTS, MAX_SEGMENT_SIZE, MIN_SEGMENT_SIZE};

const MIB: u64 = 1024 * 1024;

/// Initial segment count for a fresh download.
pub fn initial_segment_count(file_size: u64, supports_ranges: bool, pinned: Option<u32>) -> u32 {
    if !supports_ranges || file_size == 0 {
        return 1;
    }

    if let Some(n) = pinned {
        return n.clamp(1, MAX_SEGMENTS);
    }

    let count = match file_size {
        s if s >= 100 * MIB => 16,
        s if s >= 50 * MIB => 12,
        s if s >= 10 * MIB => 6,
        s if s >= MIB => 4,
        _ => 2,
    };
    count.min(MAX_SEGMENTS)
}

/// Planned per-segment size: `ceil(file_size / count)` clamped to the
/// segment size bounds. The actual layout trims the final segment to
/// the file end.
pub fn segment_size_for(file_size: u64, count: u32) -> u64 {
    if file_size == 0 || count == 0 {
        return 0;
    }
    let count = count as u64;
    let size = file_size.div_ceil(count);
    size.clamp(MIN_SEGMENT_SIZE, MAX_SEGMENT_SIZE)
}

/// Lay the file out as `(offset, size)` ranges. Sizes always sum to
/// `file_size`; clamping may produce fewer (or more) ranges than the
/// requested count.
pub fn split_ranges(file_size: u64, count: u32) -> Vec<(u64, u64)> {
    if file_size == 0 {
        // Unknown length: a single open-ended segment.
        return vec![(0, 0)];
    }
    if count <= 1 {
        // A single segment must cover the whole file, clamps aside.
        return vec![(0, file_size)];
    }

    let seg_size = segment_size_for(file_size, count);
    let mut ranges = Vec::new();
    let mut offset = 0u64;
    while offset < file_size {
        let this_size = seg_size.min(file_size - offset);
        ranges.push((offset, this_size));
        offset += this_size;
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MIN_SEGMENTS;

    #[test]
    fn count_table() {
        assert_eq!(initial_segment_count(200 * MIB, true, None), 16);
        assert_eq!(initial_segment_count(100 * MIB, true, None), 16);
        assert_eq!(initial_segment_count(60 * MIB, true, None), 12);
        assert_eq!(initial_segment_count(20 * MIB, true, None), 6);
        assert_eq!(initial_segment_count(2 * MIB, true, None), 4);
        assert_eq!(initial_segment_count(MIB / 2, true, None), 2);
    }

    #[test]
    fn no_ranges_or_unknown_size_means_one_segment() {
        assert_eq!(initial_segment_count(200 * MIB, false, None), 1);
        assert_eq!(initial_segment_count(0, true, None), 1);
        assert_eq!(initial_segment_count(0, false, Some(8)), 1);
    }

    #[test]
    fn pinned_count_is_bounded() {
        assert_eq!(initial_segment_count(200 * MIB, true, Some(6)), 6);
        assert_eq!(initial_segment_count(200 * MIB, true, Some(0)), 1);
        assert_eq!(initial_segment_count(200 * MIB, true, Some(1000)), MAX_SEGMENTS);
    }

    #[test]
    fn count_respects_hard_bounds_for_every_input() {
        for size in [1, MIB - 1, MIB, 10 * MIB, 50 * MIB, 100 * MIB, u64::MAX / 2] {
            let n = initial_segment_count(size, true, None);
            assert!((MIN_SEGMENTS..=MAX_SEGMENTS).contains(&n), "size {size} gave {n}");
        }
    }

    #[test]
    fn segment_size_is_clamped() {
        // Tiny file: clamp up to the minimum.
        assert_eq!(segment_size_for(1, 2), MIN_SEGMENT_SIZE);
        // Huge file over few segments: clamp down to the maximum.
        assert_eq!(segment_size_for(1_000_000_000_000, 2), MAX_SEGMENT_SIZE);
        // Comfortable middle: plain ceiling division.
        assert_eq!(segment_size_for(100_000_000, 6), 16_666_667);
    }

    #[test]
    fn six_way_split_of_100_million_bytes() {
        let ranges = split_ranges(100_000_000, 6);
        assert_eq!(ranges.len(), 6);
        for r in &ranges[..5] {
            assert_eq!(r.1, 16_666_667);
        }
        // Last segment takes the remainder.
        assert_eq!(ranges[5].1, 16_666_665);
        assert_eq!(ranges.iter().map(|r| r.1).sum::<u64>(), 100_000_000);
    }

    #[test]
    fn one_byte_file_gets_one_segment_of_size_one() {
        let count = initial_segment_count(1, true, None);
        let ranges = split_ranges(1, count);
        assert_eq!(ranges, vec![(0, 1)]);
    }

    #[test]
    fn ranges_are_contiguous_and_sum_to_total() {
        for (size, count) in [(100 * MIB, 16), (10 * MIB + 37, 6), (MIB, 4), (999, 2)] {
            let ranges = split_ranges(size, count);
            let mut expected_offset = 0;
            for (offset, len) in &ranges {
                assert_eq!(*offset, expected_offset);
                assert!(*len > 0);
                expected_offset += len;
            }
            assert_eq!(expected_offset, size);
        }
    }

    #[test]
    fn unknown_size_layout() {
        assert_eq!(split_ranges(0, 1), vec![(0, 0)]);
    }

    #[test]
    fn single_segment_covers_everything() {
        // One segment always spans the file, even past the size clamps.
        assert_eq!(split_ranges(500_000, 1), vec![(0, 500_000)]);
        assert_eq!(split_ranges(200 * MIB, 1), vec![(0, 200 * MIB)]);
    }
}
