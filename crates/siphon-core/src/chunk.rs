//! Date range chunk planning.
//!
//! A property's sync window is split into fixed-width, contiguous sub-ranges
//! so that each round of paging and each batch write stays bounded, and so
//! that independent sub-ranges can be fetched in parallel.

use chrono::Days;

use crate::models::DateRange;

/// Splits `range` into non-overlapping chunks of at most `width_days` days.
///
/// The chunks are returned in date order, cover `range` exactly and the last
/// one is clipped to `range.end`. A range no wider than `width_days` yields a
/// single chunk equal to the input. A width of zero is treated as one day.
pub fn plan_chunks(range: DateRange, width_days: u32) -> Vec<DateRange> {
    let width = u64::from(width_days.max(1));
    let total = range.days().max(0) as u64;
    let mut chunks = Vec::with_capacity(total.div_ceil(width) as usize);

    let mut start = range.start;
    while start <= range.end {
        let end = start
            .checked_add_days(Days::new(width - 1))
            .map_or(range.end, |d| d.min(range.end));
        chunks.push(DateRange { start, end });

        match end.checked_add_days(Days::new(1)) {
            Some(next) => start = next,
            None => break,
        }
    }

    chunks
}
