use crate::error::SegmentCacheError;
use crate::list::SegmentList;
use crate::segment::{SegIdx, Segment, SegmentKind};

/// A half-open `[start, end)` byte range reported by [`Cache::ranges`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

/// Cumulative counters a caller can poll for observability. Deliberately
/// plain fields rather than an external metrics registry — this crate has no
/// opinion on how a host process exports them.
#[derive(Debug, Default, Clone, Copy)]
pub struct CacheTelemetry {
    pub bytes_written: u64,
    pub bytes_read: u64,
    pub evictions: u64,
    pub bytes_evicted: u64,
}

/// A sparse, seekable byte cache over `[0, length)` where `length` may be
/// unknown until an `Eof` write pins it down.
///
/// Holds independent read and write cursors, each a `(SegIdx, u64)` pair:
/// the segment the cursor currently sits in, plus the absolute offset within
/// it. Reads only ever consume `Filled` bytes; writes only ever land in the
/// segment the write cursor already sits in, at its exact offset (callers
/// `seek_write` first to write elsewhere).
pub struct Cache {
    list: SegmentList,
    read_cursor: SegIdx,
    read_offset: u64,
    write_cursor: SegIdx,
    write_offset: u64,
    cache_size: u64,
    chunk_size: u64,
    clock: u64,
    /// Set once `write_eof` pins the resource's total length. Distinguishes
    /// a terminal `Eof` from the initial, still-growing one: without this,
    /// the tail `Eof`'s `start` alone can't tell "nothing written yet" apart
    /// from "writes have reached here but the true end is still unknown".
    known_length: Option<u64>,
    telemetry: CacheTelemetry,
}

impl Cache {
    /// `cache_size` bounds the total bytes kept `Filled` before `write`
    /// starts evicting. `chunk_size` sizes the "hot window"
    /// `[read_offset, read_offset + chunk_size)` that GC will never evict.
    pub fn new(cache_size: u64, chunk_size: u64) -> Self {
        let list = SegmentList::new();
        let head = list.head();
        Self {
            list,
            read_cursor: head,
            read_offset: 0,
            write_cursor: head,
            write_offset: 0,
            cache_size,
            chunk_size,
            clock: 0,
            known_length: None,
            telemetry: CacheTelemetry::default(),
        }
    }

    pub fn telemetry(&self) -> CacheTelemetry {
        self.telemetry
    }

    pub fn read_offset(&self) -> u64 {
        self.read_offset
    }

    pub fn write_offset(&self) -> u64 {
        self.write_offset
    }

    pub fn seek_read(&mut self, offset: u64) -> Result<(), SegmentCacheError> {
        self.read_cursor = self.list.find_containing(offset)?;
        self.read_offset = offset;
        Ok(())
    }

    pub fn seek_write(&mut self, offset: u64) -> Result<(), SegmentCacheError> {
        if let Some(len) = self.known_length {
            if offset >= len {
                return Err(SegmentCacheError::NoSpace);
            }
        }
        let idx = self.list.find_containing(offset)?;
        if !self.list.get(idx).is_empty_like() {
            return Err(SegmentCacheError::Invariant(
                "write cursor must land on an empty or EOF segment",
            ));
        }
        self.write_cursor = idx;
        self.write_offset = offset;
        Ok(())
    }

    /// Bytes available to read right now without blocking on more data,
    /// starting at `read_offset`: the length of the contiguous run of
    /// `Filled` segments starting at the read cursor. Walks across segment
    /// boundaries, since independent writes never merge adjacent `Filled`
    /// segments.
    pub fn bytes_readable(&self, max: Option<u64>) -> u64 {
        let mut total = 0u64;
        let mut cursor = Some(self.read_cursor);
        let mut pos = self.read_offset;
        while let Some(idx) = cursor {
            let seg = self.list.get(idx);
            if !matches!(seg.kind, SegmentKind::Filled(_)) {
                break;
            }
            total += seg.end - pos;
            if let Some(m) = max {
                if total >= m {
                    return m;
                }
            }
            pos = seg.end;
            cursor = self.list.next(idx);
        }
        total
    }

    /// Bytes writable at the current write cursor without needing a reseek:
    /// the remaining length of the single `Empty`/`Eof` segment the cursor
    /// sits in (I4 guarantees this run is already maximal, so there is no
    /// need to look past it — an `Eof` segment has unbounded remaining
    /// space, reported as `u64::MAX` when `max` is `None`).
    pub fn bytes_writable(&self, max: Option<u64>) -> u64 {
        let seg = self.list.get(self.write_cursor);
        let avail = match seg.kind {
            SegmentKind::Eof if self.known_length.is_some() => 0,
            SegmentKind::Eof => u64::MAX - self.write_offset,
            _ => seg.end - self.write_offset,
        };
        match max {
            Some(m) => avail.min(m),
            None => avail,
        }
    }

    /// Copies up to `dest.len()` bytes starting at `read_offset` into
    /// `dest`, advancing the read cursor and offset. Returns the number of
    /// bytes actually copied, which is `dest.len().min(bytes_readable(None))`.
    /// Touches every segment it reads from, bumping its timestamp so
    /// multi-segment reads preserve recency order across the walk.
    pub fn read_bytes(&mut self, dest: &mut [u8]) -> u64 {
        let mut written = 0usize;
        while written < dest.len() {
            let idx = self.read_cursor;
            let seg_end = self.list.get(idx).end;
            if !matches!(self.list.get(idx).kind, SegmentKind::Filled(_)) {
                break;
            }
            let remaining_in_seg = seg_end - self.read_offset;
            let want = (dest.len() - written) as u64;
            let take = want.min(remaining_in_seg);
            let abs_start = self.read_offset;
            let abs_end = abs_start + take;

            self.clock += 1;
            let ts = self.clock;
            let node = self.list.get_mut(idx);
            node.read_into(
                &mut dest[written..written + take as usize],
                abs_start,
                abs_end,
                ts,
            );

            written += take as usize;
            self.read_offset = abs_end;
            if abs_end == seg_end {
                match self.list.next(idx) {
                    Some(n) => self.read_cursor = n,
                    None => break,
                }
            }
        }
        self.telemetry.bytes_read += written as u64;
        written as u64
    }

    /// Writes `bytes` at the write cursor's current offset. The write
    /// cursor must sit on an `Empty` or `Eof` segment with enough remaining
    /// space (`seek_write` first to relocate it). Splits the target segment
    /// at the write's left and right boundaries, fills the resulting exact
    /// span, advances the write cursor past it, then runs GC.
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), SegmentCacheError> {
        let n = bytes.len() as u64;
        if n == 0 {
            return Err(SegmentCacheError::InvalidInput(
                "write requires a non-empty buffer",
            ));
        }
        if !self.list.get(self.write_cursor).is_empty_like() {
            return Err(SegmentCacheError::NoSpace);
        }
        if self.bytes_writable(Some(n)) < n {
            return Err(SegmentCacheError::NoSpace);
        }

        let (_, cursor) = self.list.split(self.write_cursor, self.write_offset)?;
        let end = self.write_offset + n;
        let (cursor, _) = self.list.split(cursor, end)?;

        self.clock += 1;
        let ts = self.clock;
        self.list.fill(cursor, bytes.to_vec(), ts)?;

        self.write_offset = end;
        self.write_cursor = self
            .list
            .next(cursor)
            .expect("the list always terminates in Eof");
        self.telemetry.bytes_written += n;

        // The two `split`s above freed and reallocated arena slots, which can
        // silently hand the just-freed index to an unrelated new segment
        // (the free list is LIFO, and `splice` always assigns the first new
        // segment the first freed index). `read_cursor` may be holding one
        // of those stale indices, so it must be re-derived rather than
        // trusted to still name the segment it used to.
        self.read_cursor = self
            .list
            .find_containing(self.read_offset)
            .expect("every offset is covered by I1/I5");

        self.gc();
        Ok(())
    }

    /// Pins the stream's length at `start`: everything from `start` onward
    /// becomes the terminating `Eof`. Used when an upstream response proves
    /// the resource ends there. Only valid when `start` falls within the
    /// trailing empty run (nothing `Filled` may exist beyond `start`).
    pub fn write_eof(&mut self, start: u64) -> Result<(), SegmentCacheError> {
        if let Some(known) = self.known_length {
            return if known == start {
                Ok(())
            } else {
                Err(SegmentCacheError::Invariant(
                    "EOF already pinned at a different length",
                ))
            };
        }
        let idx = self.list.find_containing(start)?;
        if !self.list.get(idx).is_empty_like() {
            return Err(SegmentCacheError::Invariant(
                "EOF write target must be empty or EOF",
            ));
        }
        let (_, right) = self.list.split(idx, start)?;
        if matches!(self.list.get(right).kind, SegmentKind::Empty) {
            self.list
                .splice(right, self.list.tail(), vec![Segment::eof(start)])?;
        }
        self.known_length = Some(start);

        // Same arena-reuse hazard as `write`: the splits/splice above may
        // have handed `read_cursor`'s or `write_cursor`'s stale index to an
        // unrelated segment.
        self.read_cursor = self
            .list
            .find_containing(self.read_offset)
            .expect("every offset is covered by I1/I5");
        self.write_cursor = self
            .list
            .find_containing(self.write_offset)
            .expect("every offset is covered by I1/I5");

        Ok(())
    }

    /// Evicts `Filled` segments outside the hot window
    /// `[read_offset, read_offset + chunk_size)`, oldest timestamp first,
    /// until total filled bytes are at or under `cache_size`. Cursors
    /// pointing at an evicted segment are relocated to the resulting
    /// (merged) `Empty` segment at the same absolute offset.
    fn gc(&mut self) {
        let hot_start = self.read_offset;
        let hot_end = self.read_offset.saturating_add(self.chunk_size);

        loop {
            let filled_total = self.total_filled();
            if filled_total <= self.cache_size {
                break;
            }

            let mut victim: Option<(SegIdx, u64)> = None;
            let mut cursor = Some(self.list.head());
            while let Some(idx) = cursor {
                let seg = self.list.get(idx);
                if let SegmentKind::Filled(_) = seg.kind {
                    let overlaps_hot = seg.start < hot_end && seg.end > hot_start;
                    if !overlaps_hot {
                        let older = match victim {
                            Some((_, ts)) => seg.timestamp < ts,
                            None => true,
                        };
                        if older {
                            victim = Some((idx, seg.timestamp));
                        }
                    }
                }
                cursor = self.list.next(idx);
            }

            let Some((idx, _)) = victim else {
                // Nothing evictable outside the hot window; cache_size is
                // smaller than the working set currently being read.
                break;
            };

            let evicted_len = self.list.get(idx).len();
            let was_read_cursor = idx == self.read_cursor;
            let was_write_cursor = idx == self.write_cursor;
            let abs = self.list.get(idx).start;

            self.list.evict(idx);
            self.telemetry.evictions += 1;
            self.telemetry.bytes_evicted += evicted_len;

            if was_read_cursor {
                self.read_cursor = self
                    .list
                    .find_containing(abs)
                    .expect("evicted span is always re-coverable by the resulting empty segment");
            }
            if was_write_cursor {
                self.write_cursor = self
                    .list
                    .find_containing(abs)
                    .expect("evicted span is always re-coverable by the resulting empty segment");
            }
        }
    }

    pub(crate) fn total_filled(&self) -> u64 {
        let mut total = 0u64;
        let mut cursor = Some(self.list.head());
        while let Some(idx) = cursor {
            let seg = self.list.get(idx);
            if matches!(seg.kind, SegmentKind::Filled(_)) {
                total += seg.len();
            }
            cursor = self.list.next(idx);
        }
        total
    }

    /// Lists every `Filled` span currently cached, in ascending order.
    pub fn ranges(&self) -> Vec<ByteRange> {
        let mut out = Vec::new();
        let mut cursor = Some(self.list.head());
        while let Some(idx) = cursor {
            let seg = self.list.get(idx);
            if matches!(seg.kind, SegmentKind::Filled(_)) {
                out.push(ByteRange {
                    start: seg.start,
                    end: seg.end,
                });
            }
            cursor = self.list.next(idx);
        }
        out
    }

    /// The total known length of the resource, if `write_eof` has pinned it
    /// down yet. The write frontier advancing past unfilled space (an `Eof`
    /// segment growing as ordinary writes land) does *not* count — only an
    /// explicit `write_eof` call does.
    pub fn known_length(&self) -> Option<u64> {
        self.known_length
    }
}
