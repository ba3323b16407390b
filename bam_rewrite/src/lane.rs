//! One input stream feeding parse buffers.

use crate::codec::RecordCodec;
use crate::error::{PipelineError, Result};
use crate::frame::FrameSplitter;
use crate::parse_buffer::ParseBuffer;
use crate::pool::RecordPool;
use crate::record::{Owner, Record};
use log::debug;
use std::io::Read;
use std::sync::Arc;

/// What one `fill_into` produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FillReport {
    pub bytes_read: usize,
    pub frames: usize,
    /// Records handed to the parse buffer, carried over ones included.
    pub records: usize,
    pub is_final: bool,
}

/// A frame splitter over one input plus the records held back between fills.
///
/// The last group of a fill may continue in the next one, so it is kept by
/// the lane and put in front of the next fill. A group therefore never spans
/// two parse buffers.
pub struct Lane {
    id: usize,
    splitter: FrameSplitter<Box<dyn Read + Send>>,
    codec: Arc<dyn RecordCodec>,
    pool: Arc<RecordPool>,
    carry: Vec<Record>,
}

impl Lane {
    /// `region_capacity` is the initial size of the frame region. It grows
    /// when a single frame does not fit.
    pub fn new(
        id: usize,
        source: Box<dyn Read + Send>,
        codec: Arc<dyn RecordCodec>,
        pool: Arc<RecordPool>,
        region_capacity: usize,
    ) -> Self {
        let splitter = FrameSplitter::new(source, codec.framing(), region_capacity);
        Lane {
            id,
            splitter,
            codec,
            pool,
            carry: Vec::new(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.splitter.is_finished()
    }

    /// Records held back for the next fill.
    pub fn carried(&self) -> usize {
        self.carry.len()
    }

    /// Decodes the next fill into `parse`, which must be empty. Reads on while
    /// everything decoded so far belongs to one group. The buffer is marked
    /// final when the stream ended.
    pub fn fill_into(&mut self, parse: &mut ParseBuffer) -> Result<FillReport> {
        let mut report = FillReport::default();
        if self.is_finished() {
            parse.mark_final();
            report.is_final = true;
            return Ok(report);
        }
        parse.append_records(self.carry.drain(..));

        loop {
            let fill = self.splitter.fill(parse.capacity())?;
            report.bytes_read += fill.bytes_read;
            report.frames += self.splitter.frame_count();
            parse
                .decode_frames(self.splitter.frames(), &*self.codec)
                .map_err(|e| {
                    if let PipelineError::Decode { frame, .. } = &e {
                        debug!(
                            "Lane {}: bad frame at stream offset {:?}",
                            self.id,
                            self.splitter.frame_offset(*frame)
                        );
                    }
                    e
                })?;

            if fill.reached_end {
                parse.mark_final();
                report.is_final = true;
                break;
            }
            parse.split_off_trailing_group(&mut self.carry);
            if parse.live_len() > 0 {
                break;
            }
            // Nothing but the held back group so far.
            parse.append_records(self.carry.drain(..));
        }

        for rec in self.carry.iter_mut() {
            rec.set_owner(Owner::Lane(self.id));
        }
        report.records = parse.live_len();
        debug!(
            "Lane {}: filled parse buffer {} with {} records from {} bytes ({} carried{})",
            self.id,
            parse.id(),
            report.records,
            report.bytes_read,
            self.carry.len(),
            if report.is_final { ", final" } else { "" }
        );
        Ok(report)
    }
}

impl Drop for Lane {
    fn drop(&mut self) {
        for rec in self.carry.drain(..) {
            self.pool.release(rec);
        }
    }
}
