use std::collections::VecDeque;

use super::buffer_block::{BLOCK_SIZE, BufferBlock};

// A chained byte buffer: an ordered sequence of fixed-size blocks, each with
// its own read and write cursor. The head is the first block with unread
// data, the tail is the last block with writable room. Fully drained blocks
// are unlinked and parked on a free list for reuse.
//
// The buffer has two faces:
//
//  - a copying face (`write` / `read`) for callers that own their bytes, and
//  - a zero-copy face (`input_next` / `output_next` and friends) with the
//    block-at-a-time contract the message codec consumes, plus the
//    `write_view` / `commit_resv` / `unread_spans` / `commit_send` protocol
//    that keeps the cursors consistent with `read(2)` / `writev(2)` results.
//
// A drained head block is not unlinked until the next consuming call. This
// keeps `input_back_up` valid for the span most recently handed out by
// `input_next`, even when that span reached the end of its block.
//
pub struct ChainedBuffer {
    blocks: VecDeque<Box<BufferBlock>>,
    free_list: Vec<Box<BufferBlock>>,
    total_size: usize,
    consumed: u64,
    limits: Vec<usize>,
}

impl ChainedBuffer {
    pub fn new() -> Self {
        ChainedBuffer {
            blocks: VecDeque::new(),
            free_list: Vec::new(),
            total_size: 0,
            consumed: 0,
            limits: Vec::new(),
        }
    }

    /// Total unread bytes.
    ///
    #[inline]
    pub fn size(&self) -> usize {
        self.total_size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.total_size == 0
    }

    /// Monotonic count of bytes ever consumed from this buffer.
    ///
    #[inline]
    pub fn input_byte_count(&self) -> u64 {
        self.consumed
    }

    /// Byte count of the output stream face. Equals `size()`: bytes written
    /// and not yet consumed.
    ///
    #[inline]
    pub fn output_byte_count(&self) -> u64 {
        self.total_size as u64
    }

    // Appends `src`, allocating or recycling blocks on demand. Always writes
    // the whole slice.
    //
    pub fn write(&mut self, src: &[u8]) -> usize {
        let mut written = 0;
        while written < src.len() {
            if self.blocks.back().is_none_or(|block| block.full()) {
                let block = self.allocate_block();
                self.blocks.push_back(block);
            }
            let n = self.blocks.back_mut().unwrap().write(&src[written..]);
            written += n;
            self.total_size += n;
        }
        written
    }

    // Copies out up to `dst.len()` bytes, advancing the head cursor and
    // recycling drained blocks. Respects an active read limit.
    //
    pub fn read(&mut self, dst: &mut [u8]) -> usize {
        let mut read = 0;
        while read < dst.len() {
            self.retire_drained_head();
            let take = {
                let Some(head) = self.blocks.front() else {
                    break;
                };
                let mut take = head.size().min(dst.len() - read);
                if let Some(&limit) = self.limits.last() {
                    take = take.min(limit);
                }
                take
            };
            if take == 0 {
                break;
            }
            let head = self.blocks.front_mut().unwrap();
            dst[read..read + take].copy_from_slice(&head.read_view()[..take]);
            head.read_pos += take;
            read += take;
            self.account_consumed(take);
        }
        read
    }

    // Exposes the next contiguous span of unread bytes from the head block
    // and advances past it. Returns `None` when the buffer is empty or the
    // active read limit is exhausted. The drained block, if any, is kept in
    // place until the next consuming call so that `input_back_up` can rewind
    // into the span just returned.
    //
    pub fn input_next(&mut self) -> Option<&[u8]> {
        self.retire_drained_head();
        if self.total_size == 0 {
            return None;
        }
        if self.limits.last().is_some_and(|&limit| limit == 0) {
            return None;
        }
        let (start, span) = {
            let head = self.blocks.front_mut().unwrap();
            let mut span = head.size();
            if let Some(&limit) = self.limits.last() {
                span = span.min(limit);
            }
            let start = head.read_pos;
            head.read_pos += span;
            (start, span)
        };
        self.account_consumed(span);
        let head = self.blocks.front().unwrap();
        Some(&head.data[start..start + span])
    }

    // Rewinds the head cursor within the current head block by up to `count`
    // bytes, restoring size, the consumed count, and any active limits. The
    // rewind is bounded by the in-block read cursor; the codec only ever
    // backs up within the span most recently obtained from `input_next`.
    //
    pub fn input_back_up(&mut self, count: usize) {
        let Some(head) = self.blocks.front_mut() else {
            return;
        };
        let n = count.min(head.read_pos);
        head.read_pos -= n;
        self.total_size += n;
        self.consumed -= n as u64;
        for limit in &mut self.limits {
            *limit += n;
        }
    }

    // Discards up to `count` bytes, recycling drained blocks. Returns false
    // if the buffer (or the active limit) ran out first.
    //
    pub fn input_skip(&mut self, count: usize) -> bool {
        let mut remaining = count;
        while remaining > 0 {
            self.retire_drained_head();
            let take = {
                let Some(head) = self.blocks.front() else {
                    break;
                };
                let mut take = head.size().min(remaining);
                if let Some(&limit) = self.limits.last() {
                    take = take.min(limit);
                }
                take
            };
            if take == 0 {
                break;
            }
            self.blocks.front_mut().unwrap().read_pos += take;
            remaining -= take;
            self.account_consumed(take);
        }
        remaining == 0
    }

    // Hands out the writable tail span, appending a fresh block when the
    // tail is full, and optimistically advances the tail cursor by the span
    // length. Callers return unused room through `output_back_up`.
    //
    pub fn output_next(&mut self) -> Option<&mut [u8]> {
        self.ensure_tail_room();
        let (start, span) = {
            let tail = self.blocks.back_mut().unwrap();
            let start = tail.write_pos;
            let span = tail.available();
            tail.write_pos = BLOCK_SIZE;
            (start, span)
        };
        self.total_size += span;
        let tail = self.blocks.back_mut().unwrap();
        Some(&mut tail.data[start..start + span])
    }

    // Rewinds the optimistic advance of `output_next`. Bounded by the tail
    // block's unread region so the write cursor never crosses the read
    // cursor.
    //
    pub fn output_back_up(&mut self, count: usize) {
        let Some(tail) = self.blocks.back_mut() else {
            return;
        };
        let n = count.min(tail.size());
        tail.write_pos -= n;
        self.total_size -= n;
    }

    /// Establishes a bounded view of the next `limit` readable bytes. Limits
    /// nest; consuming bytes decrements every active limit.
    ///
    pub fn push_limit(&mut self, limit: usize) {
        self.limits.push(limit);
    }

    pub fn pop_limit(&mut self) {
        self.limits.pop();
    }

    // Writable tail room for a read(2) syscall. Does not advance any cursor;
    // commit the bytes actually received with `commit_resv`.
    //
    pub fn write_view(&mut self) -> &mut [u8] {
        self.ensure_tail_room();
        let tail = self.blocks.back_mut().unwrap();
        let start = tail.write_pos;
        &mut tail.data[start..]
    }

    // Advances the tail cursor over `count` bytes a syscall deposited into
    // the span returned by `write_view`.
    //
    pub fn commit_resv(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        let tail = self.blocks.back_mut().expect("commit_resv without write_view");
        debug_assert!(count <= tail.available());
        tail.write_pos += count;
        self.total_size += count;
    }

    // Unread spans across blocks, at most `max_spans` entries, for a gather
    // write. Commit the bytes the kernel accepted with `commit_send`.
    //
    pub fn unread_spans(&self, max_spans: usize) -> Vec<&[u8]> {
        self.blocks
            .iter()
            .filter(|block| !block.empty())
            .take(max_spans)
            .map(|block| block.read_view())
            .collect()
    }

    // Advances head cursors over `count` bytes a writev(2) call accepted,
    // recycling drained blocks.
    //
    pub fn commit_send(&mut self, count: usize) {
        let mut remaining = count;
        while remaining > 0 {
            self.retire_drained_head();
            let head = self
                .blocks
                .front_mut()
                .expect("commit_send beyond buffered bytes");
            let take = head.size().min(remaining);
            head.read_pos += take;
            remaining -= take;
            self.account_consumed(take);
        }
        self.retire_drained_head();
    }

    // Number of chained blocks currently holding data or room.
    //
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    fn account_consumed(&mut self, count: usize) {
        self.total_size -= count;
        self.consumed += count as u64;
        for limit in &mut self.limits {
            *limit = limit.saturating_sub(count);
        }
    }

    // Unlinks a fully drained head block onto the free list. A drained
    // singleton block is reset in place instead: it is also the tail and
    // keeps its writable room.
    //
    fn retire_drained_head(&mut self) {
        while self.blocks.len() > 1 && self.blocks.front().unwrap().empty() {
            let block = self.blocks.pop_front().unwrap();
            self.recycle_block(block);
        }
        if self.blocks.len() == 1 {
            let head = self.blocks.front_mut().unwrap();
            if head.empty() && head.write_pos > 0 {
                head.reset();
            }
        }
    }

    fn ensure_tail_room(&mut self) {
        if self.blocks.back().is_none_or(|block| block.full()) {
            let block = self.allocate_block();
            self.blocks.push_back(block);
        }
    }

    fn allocate_block(&mut self) -> Box<BufferBlock> {
        match self.free_list.pop() {
            Some(mut block) => {
                block.reset();
                block
            }
            None => BufferBlock::new(),
        }
    }

    fn recycle_block(&mut self, block: Box<BufferBlock>) {
        self.free_list.push(block);
    }
}

impl Default for ChainedBuffer {
    fn default() -> Self {
        Self::new()
    }
}
