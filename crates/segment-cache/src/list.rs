use crate::error::SegmentCacheError;
use crate::segment::{SegIdx, Segment, SegmentKind};

struct Node {
    seg: Segment,
    prev: Option<SegIdx>,
    next: Option<SegIdx>,
}

enum Slot {
    Occupied(Node),
    Free(Option<usize>),
}

/// Ordered partition of `[0, tail.start)` plus a trailing `Eof`, stored as an
/// arena of [`Segment`]s addressed by stable [`SegIdx`] handles rather than
/// linked via raw pointers (see spec §9's "arena of segments" design note).
///
/// Maintains invariants I1-I5 from the specification after every public
/// operation:
/// - **I1 Coverage** — head starts at 0; segments are contiguous.
/// - **I2 Terminator** — the last segment is always `Eof`.
/// - **I3 No zero-length filled** — only `Empty`/`Eof` may have zero length.
/// - **I4 No adjacent empties** — two `Empty`/`Eof` never neighbor each other.
/// - **I5 EOF containment** — `Eof.contains(offset)` holds for every
///   `offset >= Eof.start`.
pub(crate) struct SegmentList {
    slots: Vec<Slot>,
    free_head: Option<usize>,
    head: SegIdx,
    tail: SegIdx,
}

impl SegmentList {
    pub fn new() -> Self {
        let mut slots = Vec::new();
        slots.push(Slot::Occupied(Node {
            seg: Segment::eof(0),
            prev: None,
            next: None,
        }));
        let idx = SegIdx(0);
        Self {
            slots,
            free_head: None,
            head: idx,
            tail: idx,
        }
    }

    pub fn head(&self) -> SegIdx {
        self.head
    }

    pub fn tail(&self) -> SegIdx {
        self.tail
    }

    fn node(&self, idx: SegIdx) -> &Node {
        match &self.slots[idx.0] {
            Slot::Occupied(n) => n,
            Slot::Free(_) => panic!("segment-cache: dangling SegIdx({})", idx.0),
        }
    }

    fn node_mut(&mut self, idx: SegIdx) -> &mut Node {
        match &mut self.slots[idx.0] {
            Slot::Occupied(n) => n,
            Slot::Free(_) => panic!("segment-cache: dangling SegIdx({})", idx.0),
        }
    }

    pub fn get(&self, idx: SegIdx) -> &Segment {
        &self.node(idx).seg
    }

    pub fn get_mut(&mut self, idx: SegIdx) -> &mut Segment {
        &mut self.node_mut(idx).seg
    }

    pub fn prev(&self, idx: SegIdx) -> Option<SegIdx> {
        self.node(idx).prev
    }

    pub fn next(&self, idx: SegIdx) -> Option<SegIdx> {
        self.node(idx).next
    }

    fn alloc(&mut self, node: Node) -> SegIdx {
        match self.free_head {
            Some(i) => {
                let next_free = match &self.slots[i] {
                    Slot::Free(n) => *n,
                    Slot::Occupied(_) => unreachable!(),
                };
                self.free_head = next_free;
                self.slots[i] = Slot::Occupied(node);
                SegIdx(i)
            }
            None => {
                self.slots.push(Slot::Occupied(node));
                SegIdx(self.slots.len() - 1)
            }
        }
    }

    fn dealloc(&mut self, idx: SegIdx) {
        self.slots[idx.0] = Slot::Free(self.free_head);
        self.free_head = Some(idx.0);
    }

    /// Finds the segment containing `offset`. Per I5 this always succeeds
    /// (the trailing `Eof` contains every offset at or beyond its start);
    /// the error path exists purely as a defensive backstop.
    pub fn find_containing(&self, offset: u64) -> Result<SegIdx, SegmentCacheError> {
        let mut cursor = self.head;
        loop {
            if self.get(cursor).contains(offset) {
                return Ok(cursor);
            }
            match self.next(cursor) {
                Some(n) => cursor = n,
                None => return Err(SegmentCacheError::OutOfRange { offset }),
            }
        }
    }

    /// Replaces the inclusive chain `[old_head..old_tail]` (which must be
    /// contiguous via `next` pointers) with `new_segments`. Rejects a
    /// boundary mismatch at either edge, except that the right edge may grow
    /// when both the old tail and the last new segment are `Eof` (the EOF
    /// marker advancing as previously-unknown length becomes known).
    pub(crate) fn splice(
        &mut self,
        old_head: SegIdx,
        old_tail: SegIdx,
        new_segments: Vec<Segment>,
    ) -> Result<(SegIdx, SegIdx), SegmentCacheError> {
        if new_segments.is_empty() {
            return Err(SegmentCacheError::Invariant("splice with no replacement segments"));
        }

        let head_start = self.get(old_head).start;
        let tail_end = self.get(old_tail).end;
        let tail_is_eof = matches!(self.get(old_tail).kind, SegmentKind::Eof);

        let new_first_start = new_segments.first().unwrap().start;
        let new_last = new_segments.last().unwrap();
        let new_last_is_eof = matches!(new_last.kind, SegmentKind::Eof);

        if new_first_start != head_start {
            return Err(SegmentCacheError::Invariant("splice left boundary mismatch"));
        }
        if new_last.end != tail_end && !(tail_is_eof && new_last_is_eof) {
            return Err(SegmentCacheError::Invariant("splice right boundary mismatch"));
        }

        let prev = self.node(old_head).prev;
        let next = self.node(old_tail).next;

        // Dealloc the old contiguous chain.
        let mut cur = Some(old_head);
        while let Some(c) = cur {
            let nxt = self.node(c).next;
            self.dealloc(c);
            if c == old_tail {
                break;
            }
            cur = nxt;
        }

        // Alloc the replacement chain and link it internally.
        let mut new_indices = Vec::with_capacity(new_segments.len());
        for seg in new_segments {
            new_indices.push(self.alloc(Node {
                seg,
                prev: None,
                next: None,
            }));
        }
        for (i, &idx) in new_indices.iter().enumerate() {
            let p = if i == 0 { prev } else { Some(new_indices[i - 1]) };
            let n = new_indices.get(i + 1).copied().or(next);
            let node = self.node_mut(idx);
            node.prev = p;
            node.next = n;
        }

        let new_head = new_indices[0];
        let new_tail = *new_indices.last().unwrap();

        match prev {
            Some(p) => self.node_mut(p).next = Some(new_head),
            None => self.head = new_head,
        }
        match next {
            Some(n) => self.node_mut(n).prev = Some(new_tail),
            None => self.tail = new_tail,
        }

        Ok((new_head, new_tail))
    }

    /// Splits the `Empty`/`Eof` segment at `idx` at `off`, returning
    /// `(left, right)`. A no-op split (`off` already at a boundary) returns
    /// `idx` for both halves. Splitting an `Eof` at `off > start` carves a
    /// finite `Empty` `[start, off)` and advances the `Eof` marker to
    /// `[off, off)` — the "EOF grows" case `splice` allows.
    pub(crate) fn split(
        &mut self,
        idx: SegIdx,
        off: u64,
    ) -> Result<(SegIdx, SegIdx), SegmentCacheError> {
        let seg = self.get(idx);
        if !seg.is_empty_like() {
            return Err(SegmentCacheError::Invariant("split target is not empty/EOF"));
        }
        if off < seg.start {
            return Err(SegmentCacheError::Invariant("split point precedes segment start"));
        }
        if off == seg.start {
            return Ok((idx, idx));
        }

        match &seg.kind {
            SegmentKind::Eof => {
                let start = seg.start;
                let left = Segment::empty(start, off);
                let right = Segment::eof(off);
                self.splice(idx, idx, vec![left, right])
            }
            SegmentKind::Empty => {
                if off > seg.end {
                    return Err(SegmentCacheError::Invariant("split point exceeds segment end"));
                }
                if off == seg.end {
                    return Ok((idx, idx));
                }
                let start = seg.start;
                let end = seg.end;
                let left = Segment::empty(start, off);
                let right = Segment::empty(off, end);
                self.splice(idx, idx, vec![left, right])
            }
            SegmentKind::Filled(_) => unreachable!("guarded by is_empty_like above"),
        }
    }

    /// Replaces the `Empty` segment at `idx` with a `Filled` segment of the
    /// same span. `bytes.len()` must equal the segment's length.
    pub(crate) fn fill(
        &mut self,
        idx: SegIdx,
        bytes: Vec<u8>,
        timestamp: u64,
    ) -> Result<(), SegmentCacheError> {
        let node = self.node_mut(idx);
        if !matches!(node.seg.kind, SegmentKind::Empty) {
            return Err(SegmentCacheError::Invariant("fill target is not empty"));
        }
        if node.seg.len() != bytes.len() as u64 {
            return Err(SegmentCacheError::Invariant("fill length does not match segment span"));
        }
        node.seg.kind = SegmentKind::Filled(bytes);
        node.seg.timestamp = timestamp;
        Ok(())
    }

    /// Turns the `Filled` segment at `idx` back into an `Empty` hole of the
    /// same span and merges it with any adjacent `Empty` neighbors (I4).
    /// Never merges across an `Eof` boundary, since `Eof` is never `Empty`.
    pub(crate) fn evict(&mut self, idx: SegIdx) {
        {
            let node = self.node_mut(idx);
            debug_assert!(matches!(node.seg.kind, SegmentKind::Filled(_)));
            node.seg.kind = SegmentKind::Empty;
            node.seg.timestamp = 0;
        }
        self.consolidate(idx);
    }

    /// Merges the run of adjacent `Empty` segments around `idx` (itself
    /// `Empty`) into a single `Empty` segment.
    fn consolidate(&mut self, idx: SegIdx) {
        let mut left = idx;
        while let Some(p) = self.prev(left) {
            if matches!(self.get(p).kind, SegmentKind::Empty) {
                left = p;
            } else {
                break;
            }
        }
        let mut right = idx;
        loop {
            match self.next(right) {
                Some(n) if matches!(self.get(n).kind, SegmentKind::Empty) => right = n,
                _ => break,
            }
        }
        if left == right {
            return;
        }
        let start = self.get(left).start;
        let end = self.get(right).end;
        let merged = Segment::empty(start, end);
        self.splice(left, right, vec![merged])
            .expect("consolidating an all-empty run cannot violate splice boundaries");
    }

    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        let mut cursor = Some(self.head);
        let mut prev_end: Option<u64> = None;
        let mut prev_was_empty_like = false;
        let mut saw_eof = false;
        assert_eq!(
            self.get(self.head).start,
            0,
            "I1: head must start at 0"
        );
        while let Some(idx) = cursor {
            let seg = self.get(idx);
            assert!(!saw_eof, "I2: Eof must be the last segment");
            if let Some(pe) = prev_end {
                assert_eq!(pe, seg.start, "I1: segments must be contiguous");
            }
            assert!(seg.end >= seg.start, "segment end before start");
            if matches!(seg.kind, SegmentKind::Filled(_)) {
                assert!(seg.len() > 0, "I3: filled segment must have positive length");
            }
            let is_empty_like = seg.is_empty_like();
            if is_empty_like && prev_was_empty_like {
                panic!("I4: adjacent empty/EOF segments were not consolidated");
            }
            prev_was_empty_like = is_empty_like;
            prev_end = Some(seg.end);
            if matches!(seg.kind, SegmentKind::Eof) {
                saw_eof = true;
            }
            cursor = self.next(idx);
        }
        assert!(saw_eof, "I2: list must terminate with Eof");
    }
}
