//! Chunk layout: how a resource is split across workers.

use crate::probe::TransferInfo;

/// Hard ceiling on parallel connections; also the sidecar record size limit.
pub(crate) const MAX_WORKERS: usize = 32;

/// No point spawning an extra connection for less than this many bytes.
const MIN_CHUNK_SIZE: i64 = 4 << 20;

/// A contiguous byte range assigned to one worker.
///
/// `start` and `end` are inclusive absolute positions; `offset` is the next
/// unfetched byte and moves from `start` to `end + 1` as the body streams in.
/// An unknown-size resource is represented by a single unbounded chunk with
/// `start = end = -1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Chunk {
    pub start: i64,
    pub offset: i64,
    pub end: i64,
}

impl Chunk {
    pub(crate) fn bounded(start: i64, end: i64) -> Self {
        Chunk {
            start,
            offset: start,
            end,
        }
    }

    pub(crate) fn unbounded() -> Self {
        Chunk {
            start: -1,
            offset: 0,
            end: -1,
        }
    }

    pub(crate) fn is_unbounded(&self) -> bool {
        self.start < 0 && self.end < 0
    }

    pub(crate) fn len(&self) -> i64 {
        self.end - self.start + 1
    }

    /// Nothing left to fetch (resumed chunks may arrive in this state).
    pub(crate) fn is_complete(&self) -> bool {
        !self.is_unbounded() && self.offset > self.end
    }
}

/// Number of workers actually worth running for this resource.
pub(crate) fn effective_concurrency(requested: usize, info: &TransferInfo) -> usize {
    if !info.supports_ranges {
        return 1;
    }
    let by_size = (info.total_size + MIN_CHUNK_SIZE - 1) / MIN_CHUNK_SIZE;
    requested
        .min(by_size.max(1) as usize)
        .clamp(1, MAX_WORKERS)
}

/// One batch of equal chunks, for sinks that accept out-of-order positional
/// writes. The last chunk absorbs the division remainder.
pub(crate) fn positional_plan(total_size: i64, workers: usize) -> Vec<Chunk> {
    if total_size <= 0 {
        return vec![Chunk::unbounded()];
    }
    let size = total_size / workers as i64;
    (0..workers as i64)
        .map(|worker| {
            let start = worker * size;
            let end = if worker == workers as i64 - 1 {
                total_size - 1
            } else {
                start + size - 1
            };
            Chunk::bounded(start, end)
        })
        .collect()
}

/// Memory-bounded layout for sinks that must receive bytes in file order.
///
/// The resource is cut into batches of at most `max_memory` bytes, each
/// batch into up to `workers` chunks of `max_memory / workers` bytes, so at
/// any time the buffered out-of-order chunks stay within the memory budget.
/// The consumer drains chunks strictly in file order.
pub(crate) fn ordered_plan(total_size: i64, workers: usize, max_memory: i64) -> Vec<Chunk> {
    if total_size <= 0 {
        return vec![Chunk::unbounded()];
    }
    let size = (max_memory / workers as i64).max(1);
    let batches = (total_size + max_memory - 1) / max_memory;
    let mut chunks = Vec::new();
    'batches: for batch in 0..batches {
        for worker in 0..workers as i64 {
            let start = batch * max_memory + worker * size;
            let end = (start + size).min(total_size) - 1;
            chunks.push(Chunk::bounded(start, end));
            if end >= total_size - 1 {
                break 'batches;
            }
        }
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn info(total_size: i64, supports_ranges: bool) -> TransferInfo {
        TransferInfo {
            total_size,
            last_modified: 0,
            etag: String::new(),
            supports_ranges,
        }
    }

    #[test_case(6, 1_000_000_000, 6 ; "large resource keeps the requested level")]
    #[test_case(6, 1_000_000, 1 ; "small resource needs one worker")]
    #[test_case(6, 20 << 20, 5 ; "medium resource caps at one worker per 4 MiB")]
    #[test_case(64, 1_000_000_000, 32 ; "requested level is capped at 32")]
    #[test_case(0, 1_000_000_000, 1 ; "requested level is floored at 1")]
    fn concurrency_follows_the_resource_size(requested: usize, total: i64, expected: usize) {
        assert_eq!(
            effective_concurrency(requested, &info(total, true)),
            expected
        );
    }

    #[test]
    fn concurrency_collapses_without_range_support() {
        assert_eq!(effective_concurrency(16, &info(1 << 30, false)), 1);
        assert_eq!(effective_concurrency(16, &info(-1, false)), 1);
    }

    #[test]
    fn positional_chunks_partition_the_resource() {
        let chunks = positional_plan(1_000_000, 6);
        assert_eq!(chunks.len(), 6);
        assert_eq!(chunks[0].start, 0);
        assert_eq!(chunks.last().unwrap().end, 999_999);
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end + 1, pair[1].start);
        }
        let total: i64 = chunks.iter().map(Chunk::len).sum();
        assert_eq!(total, 1_000_000);
    }

    #[test]
    fn last_positional_chunk_absorbs_the_remainder() {
        let chunks = positional_plan(1_000_003, 6);
        assert_eq!(chunks[0].len(), 166_667);
        assert_eq!(chunks.last().unwrap().len(), 166_668);
    }

    #[test]
    fn ordered_chunks_partition_in_file_order() {
        let chunks = ordered_plan(1_000_000, 4, 256 << 10);
        assert_eq!(chunks[0].start, 0);
        assert_eq!(chunks.last().unwrap().end, 999_999);
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end + 1, pair[1].start);
        }
        // four batches of four chunks except the short tail
        assert_eq!(chunks.len(), 16);
        assert!(chunks.iter().all(|chunk| chunk.len() <= 64 << 10));
    }

    #[test]
    fn ordered_plan_stops_at_the_last_byte() {
        let chunks = ordered_plan(100, 4, 1 << 20);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], Chunk::bounded(0, 99));
    }

    #[test]
    fn unknown_size_yields_a_single_unbounded_chunk() {
        for plan in [positional_plan(-1, 6), ordered_plan(-1, 6, 1 << 20)] {
            assert_eq!(plan, vec![Chunk::unbounded()]);
            assert!(plan[0].is_unbounded());
        }
    }
}
