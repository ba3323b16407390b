//! Decoded records of one fill, drained group by group.

use crate::codec::RecordCodec;
use crate::error::{PipelineError, Result};
use crate::pool::RecordPool;
use crate::record::{Owner, Record};
use std::collections::VecDeque;
use std::sync::Arc;

/// Records decoded from the frames of one fill plus a stash of records a
/// dispatch took out but could not forward.
///
/// Live records keep stream order. The stash is drained before any live
/// record, so the only reordering it can cause is at the head.
#[derive(Debug)]
pub struct ParseBuffer {
    id: u32,
    lane: usize,
    capacity: usize,
    pool: Arc<RecordPool>,
    live: VecDeque<Record>,
    stash: VecDeque<Record>,
    decoded_bytes: usize,
    is_final: bool,
}

impl ParseBuffer {
    /// `capacity` is the number of frame bytes one fill may decode into this
    /// buffer.
    pub fn new(id: u32, lane: usize, capacity: usize, pool: Arc<RecordPool>) -> Self {
        ParseBuffer {
            id,
            lane,
            capacity,
            pool,
            live: VecDeque::new(),
            stash: VecDeque::new(),
            decoded_bytes: 0,
            is_final: false,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn lane(&self) -> usize {
        self.lane
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn pool(&self) -> &Arc<RecordPool> {
        &self.pool
    }

    /// Decodes every frame into a record from the pool and appends it to the
    /// live sequence. The first malformed frame aborts decoding; records
    /// decoded before it stay in the buffer.
    pub fn decode_frames<'a, I>(&mut self, frames: I, codec: &dyn RecordCodec) -> Result<usize>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut count = 0;
        for (idx, frame) in frames.into_iter().enumerate() {
            let mut rec = self.pool.acquire();
            if let Err(source) = codec.decode(frame, &mut rec) {
                self.pool.release(rec);
                return Err(PipelineError::Decode { frame: idx, source });
            }
            rec.set_owner(Owner::Parse(self.id));
            self.live.push_back(rec);
            self.decoded_bytes += frame.len();
            count += 1;
        }
        Ok(count)
    }

    /// Appends records that were already decoded, e.g. a group held back from
    /// the previous fill. They precede any frames decoded afterwards.
    pub fn append_records<I: IntoIterator<Item = Record>>(&mut self, records: I) {
        for mut rec in records {
            rec.set_owner(Owner::Parse(self.id));
            self.decoded_bytes += rec.len();
            self.live.push_back(rec);
        }
    }

    /// Moves the trailing run of live records sharing the last group key into
    /// `out`, in stream order. Returns how many records moved.
    pub fn split_off_trailing_group(&mut self, out: &mut Vec<Record>) -> usize {
        let split = match self.live.back() {
            Some(last) => {
                let key = last.group_key();
                self.live
                    .iter()
                    .rposition(|r| r.group_key() != key)
                    .map_or(0, |p| p + 1)
            }
            None => return 0,
        };
        let moved = self.live.len() - split;
        for mut rec in self.live.drain(split..) {
            self.decoded_bytes = self.decoded_bytes.saturating_sub(rec.len());
            rec.set_owner(Owner::Dispatcher);
            out.push(rec);
        }
        moved
    }

    /// Most recently pushed-front record of the stash.
    pub fn pop_stash(&mut self) -> Option<Record> {
        let mut rec = self.stash.pop_front()?;
        rec.set_owner(Owner::Dispatcher);
        Some(rec)
    }

    pub fn push_front_stash(&mut self, mut rec: Record) {
        rec.set_owner(Owner::Parse(self.id));
        self.stash.push_front(rec);
    }

    pub fn push_back_stash(&mut self, mut rec: Record) {
        rec.set_owner(Owner::Parse(self.id));
        self.stash.push_back(rec);
    }

    /// Moves the next run of consecutive live records sharing a group key
    /// into `out`. Returns false if no live record is left.
    pub fn extract_next_group(&mut self, out: &mut Vec<Record>) -> bool {
        let mut first = match self.live.pop_front() {
            Some(rec) => rec,
            None => return false,
        };
        first.set_owner(Owner::Dispatcher);
        let start = out.len();
        out.push(first);
        while let Some(next) = self.live.front() {
            if next.group_key() != out[start].group_key() {
                break;
            }
            if let Some(mut rec) = self.live.pop_front() {
                rec.set_owner(Owner::Dispatcher);
                out.push(rec);
            }
        }
        true
    }

    pub fn return_record(&self, rec: Record) {
        self.pool.release(rec);
    }

    /// Releases every held record and clears the final flag.
    pub fn reset(&mut self) {
        for rec in self.live.drain(..).chain(self.stash.drain(..)) {
            self.pool.release(rec);
        }
        self.decoded_bytes = 0;
        self.is_final = false;
    }

    pub fn mark_final(&mut self) {
        self.is_final = true;
    }

    /// No more frames will be decoded into this buffer for its lane.
    pub fn is_final(&self) -> bool {
        self.is_final
    }

    pub fn live_len(&self) -> usize {
        self.live.len()
    }

    pub fn stash_len(&self) -> usize {
        self.stash.len()
    }

    pub fn is_drained(&self) -> bool {
        self.live.is_empty() && self.stash.is_empty()
    }

    pub fn decoded_bytes(&self) -> usize {
        self.decoded_bytes
    }

    /// Live records followed by stashed ones, for diagnostics.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.live.iter().chain(self.stash.iter())
    }
}

impl Drop for ParseBuffer {
    fn drop(&mut self) {
        self.reset();
    }
}
