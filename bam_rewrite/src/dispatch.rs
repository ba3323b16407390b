//! One dispatch moves the records of a parse buffer into a rewrite buffer.
//!
//! A dispatch never blocks. A full rewrite buffer ends it early: the records
//! that did not fit go to the stash of the parse buffer, which is handed back
//! for reinsertion while the rewrite buffer is handed on to be flushed. Every
//! buffer leaves a dispatch through exactly one [`HandOff`] callback.

use crate::codec::RecordCodec;
use crate::error::{DispatchFailure, PipelineError};
use crate::mate;
use crate::parse_buffer::ParseBuffer;
use crate::record::Record;
use crate::rewrite_buffer::{RewriteBuffer, ENTRY_OVERHEAD};
use crate::sorting::{self, SortOrder};
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Processing applied to the records of a group before they are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Cross populate mate fields of complementary pairs.
    FixMate,
    /// Write records as decoded.
    Passthrough,
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fix_mate" => Ok(Stage::FixMate),
            "passthrough" => Ok(Stage::Passthrough),
            _ => Err(format!("unknown stage '{}'", s)),
        }
    }
}

/// Token of a work package slot. Not `Clone`: returning it consumes it, so a
/// slot cannot be returned twice.
#[derive(Debug, PartialEq, Eq)]
pub struct PackageSlot(usize);

impl PackageSlot {
    pub fn new(id: usize) -> Self {
        PackageSlot(id)
    }

    pub fn id(&self) -> usize {
        self.0
    }
}

/// Everything one dispatch works on.
#[derive(Debug)]
pub struct WorkPackage {
    pub slot: PackageSlot,
    pub stage: Stage,
    pub parse: ParseBuffer,
    pub rewrite: RewriteBuffer,
}

/// Where buffers go after a dispatch. Called concurrently from many workers.
pub trait HandOff: Send + Sync {
    fn return_work_package(&self, slot: PackageSlot);

    /// `parse` is drained and reset, it may be filled again.
    fn return_empty_parse_buffer(&self, parse: ParseBuffer);

    /// `parse` still holds stashed or live records and must be dispatched
    /// again before it is refilled.
    fn reinsert_parse_buffer(&self, parse: ParseBuffer);

    /// `rewrite` is sorted and must be consumed, then reset.
    fn rewrite_buffer_ready_to_flush(&self, rewrite: RewriteBuffer);

    /// `rewrite` has room left for further dispatches.
    fn rewrite_buffer_ready_for_filling(&self, rewrite: RewriteBuffer);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The rewrite buffer filled up before the parse buffer was drained.
    Overflow,
    /// Every record of the parse buffer was written.
    Drained,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchStats {
    pub records_put: usize,
    pub pairs_augmented: usize,
    /// Records left in the stash at the end of the dispatch.
    pub stashed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub lane: usize,
    pub outcome: Outcome,
    pub stats: DispatchStats,
}

pub struct Dispatcher {
    codec: Arc<dyn RecordCodec>,
    sort_order: SortOrder,
}

impl Dispatcher {
    /// `codec` encodes the records written to rewrite buffers.
    pub fn new(codec: Arc<dyn RecordCodec>, sort_order: SortOrder) -> Self {
        Dispatcher { codec, sort_order }
    }

    pub fn dispatch(
        &self,
        pkg: WorkPackage,
        hand_off: &dyn HandOff,
    ) -> Result<DispatchReport, DispatchFailure> {
        let WorkPackage {
            slot,
            stage,
            mut parse,
            mut rewrite,
        } = pkg;
        let drained = match stage {
            Stage::FixMate => self.fix_mate(&mut parse, &mut rewrite),
            Stage::Passthrough => self.passthrough(&mut parse, &mut rewrite),
        };
        let result = match drained {
            Ok(stats) => Ok(self.finalize(stats, parse, rewrite, hand_off)),
            Err(error) => Err(DispatchFailure {
                error,
                parse,
                rewrite,
            }),
        };
        hand_off.return_work_package(slot);
        result
    }

    fn fix_mate(
        &self,
        parse: &mut ParseBuffer,
        rewrite: &mut RewriteBuffer,
    ) -> Result<(bool, DispatchStats), PipelineError> {
        self.drain(parse, rewrite, mate::augment_group)
    }

    fn passthrough(
        &self,
        parse: &mut ParseBuffer,
        rewrite: &mut RewriteBuffer,
    ) -> Result<(bool, DispatchStats), PipelineError> {
        self.drain(parse, rewrite, |_| false)
    }

    /// Moves stashed records, then whole groups, until the parse buffer is
    /// empty or the rewrite buffer is full. Returns whether it overflowed.
    fn drain(
        &self,
        parse: &mut ParseBuffer,
        rewrite: &mut RewriteBuffer,
        augment: fn(&mut [Record]) -> bool,
    ) -> Result<(bool, DispatchStats), PipelineError> {
        let mut stats = DispatchStats::default();
        let mut scratch = Vec::new();
        let mut overflow = false;

        while let Some(rec) = parse.pop_stash() {
            match self.put(&rec, rewrite, &mut scratch) {
                Ok(true) => {
                    parse.return_record(rec);
                    stats.records_put += 1;
                }
                Ok(false) => {
                    parse.push_front_stash(rec);
                    overflow = true;
                    break;
                }
                Err(e) => {
                    parse.push_front_stash(rec);
                    return Err(e);
                }
            }
        }

        let mut group = Vec::new();
        while !overflow && parse.extract_next_group(&mut group) {
            if augment(&mut group) {
                stats.pairs_augmented += 1;
            }
            // Keys are set up front so records left in the stash carry them.
            for rec in group.iter_mut() {
                rec.set_sort_key(sorting::sort_key(rec, self.sort_order));
            }
            let mut records = group.drain(..);
            while let Some(rec) = records.next() {
                let fitted = self.put(&rec, rewrite, &mut scratch);
                if let Ok(true) = fitted {
                    parse.return_record(rec);
                    stats.records_put += 1;
                    continue;
                }
                // Rest of the group waits in the stash, in order.
                parse.push_back_stash(rec);
                for rest in records.by_ref() {
                    parse.push_back_stash(rest);
                }
                fitted?;
                overflow = true;
            }
        }
        stats.stashed = parse.stash_len();
        Ok((overflow, stats))
    }

    /// Encodes `rec` and writes it. A record that does not even fit an empty
    /// buffer can never be written.
    fn put(
        &self,
        rec: &Record,
        rewrite: &mut RewriteBuffer,
        scratch: &mut Vec<u8>,
    ) -> Result<bool, PipelineError> {
        scratch.clear();
        self.codec.encode(rec, scratch);
        if rewrite.put(scratch, rec.sort_key()) {
            return Ok(true);
        }
        if rewrite.is_empty() {
            return Err(PipelineError::RecordTooLarge {
                size: scratch.len() + ENTRY_OVERHEAD,
                capacity: rewrite.capacity(),
            });
        }
        Ok(false)
    }

    fn finalize(
        &self,
        (overflow, stats): (bool, DispatchStats),
        mut parse: ParseBuffer,
        mut rewrite: RewriteBuffer,
        hand_off: &dyn HandOff,
    ) -> DispatchReport {
        let lane = parse.lane();
        let outcome = if overflow {
            rewrite.reorder();
            debug!(
                "Parse buffer {} overflowed rewrite buffer {} ({} records, {} stashed)",
                parse.id(),
                rewrite.id(),
                rewrite.len(),
                stats.stashed
            );
            hand_off.rewrite_buffer_ready_to_flush(rewrite);
            hand_off.reinsert_parse_buffer(parse);
            Outcome::Overflow
        } else {
            debug!(
                "Parse buffer {} drained into rewrite buffer {} ({} records put)",
                parse.id(),
                rewrite.id(),
                stats.records_put
            );
            hand_off.rewrite_buffer_ready_for_filling(rewrite);
            parse.reset();
            hand_off.return_empty_parse_buffer(parse);
            Outcome::Drained
        };
        DispatchReport {
            lane,
            outcome,
            stats,
        }
    }
}
