//! Runs fills and dispatches on a worker pool and routes buffers between them.
//!
//! Workers never touch shared queues. Every hand-off is sent as an [`Event`]
//! to the coordinator loop, which alone owns the free lists and decides what
//! runs next. Ownership of a buffer is therefore always with exactly one of:
//! a free list, a running task, or an event in flight.

use crate::codec::{BamCodec, Format, RecordCodec, SamCodec};
use crate::config::PipelineConfig;
use crate::dispatch::{
    DispatchReport, Dispatcher, HandOff, Outcome, PackageSlot, WorkPackage,
};
use crate::error::{DispatchFailure, PipelineError, Result};
use crate::lane::{FillReport, Lane};
use crate::parse_buffer::ParseBuffer;
use crate::pool::RecordPool;
use crate::reader::Input;
use crate::rewrite_buffer::RewriteBuffer;
use crate::sink::RewriteSink;
use flume::{Receiver, Sender};
use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

/// Totals of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub lanes: usize,
    pub bytes_read: u64,
    pub fills: u64,
    pub records_read: u64,
    pub records_written: u64,
    pub pairs_augmented: u64,
    pub dispatches: u64,
    pub overflows: u64,
    /// Non-empty buffers handed to the sink.
    pub flushes: u64,
    /// Lanes stopped by an error while the others went on.
    pub failed_lanes: Vec<usize>,
}

enum Event {
    Filled {
        lane: Lane,
        parse: ParseBuffer,
        result: Result<FillReport>,
    },
    Dispatched(std::result::Result<DispatchReport, DispatchFailure>),
    PackageReturned(PackageSlot),
    EmptyParse(ParseBuffer),
    Reinsert(ParseBuffer),
    Flush(RewriteBuffer),
    Fillable(RewriteBuffer),
}

/// Hand-off callbacks of a dispatch, forwarded to the coordinator.
struct ChannelHandOff {
    tx: Sender<Event>,
}

impl ChannelHandOff {
    fn send(&self, event: Event) {
        // The coordinator owns the receiver and outlives every task.
        let _ = self.tx.send(event);
    }
}

impl HandOff for ChannelHandOff {
    fn return_work_package(&self, slot: PackageSlot) {
        self.send(Event::PackageReturned(slot));
    }

    fn return_empty_parse_buffer(&self, parse: ParseBuffer) {
        self.send(Event::EmptyParse(parse));
    }

    fn reinsert_parse_buffer(&self, parse: ParseBuffer) {
        self.send(Event::Reinsert(parse));
    }

    fn rewrite_buffer_ready_to_flush(&self, rewrite: RewriteBuffer) {
        self.send(Event::Flush(rewrite));
    }

    fn rewrite_buffer_ready_for_filling(&self, rewrite: RewriteBuffer) {
        self.send(Event::Fillable(rewrite));
    }
}

enum LaneState {
    Idle(Lane),
    Filling,
    Finished,
    Failed,
}

impl LaneState {
    fn is_done(&self) -> bool {
        matches!(self, LaneState::Finished | LaneState::Failed)
    }
}

pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Pipeline { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Rewrites every input, one lane each, into buffers consumed by `sink`.
    /// All inputs must share encoding and reference dictionary.
    pub fn run(&self, inputs: Vec<Input>, sink: &mut dyn RewriteSink) -> Result<PipelineStats> {
        let first = match inputs.first() {
            Some(input) => input,
            None => {
                warn!("No input given, nothing to rewrite");
                return Ok(PipelineStats::default());
            }
        };
        let format = first.format;
        let header = first.header.clone();
        for (lane, input) in inputs.iter().enumerate().skip(1) {
            if input.format != format {
                return Err(PipelineError::InvalidHeader(format!(
                    "lane {} is {:?} while lane 0 is {:?}",
                    lane, input.format, format
                )));
            }
            if input.header.references() != header.references() {
                return Err(PipelineError::InvalidHeader(format!(
                    "lane {} has a different reference dictionary than lane 0",
                    lane
                )));
            }
        }

        let codec: Arc<dyn RecordCodec> = match format {
            Format::Bam => Arc::new(BamCodec),
            Format::Sam => Arc::new(SamCodec::new(Arc::new(header))),
        };
        let threads = self.config.effective_threads();
        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("bam-rewrite-{}", i))
            .build()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        info!(
            "Rewriting {} lane(s) of {:?} with {} threads, stage {:?}, {:?} order, {} rewrite buffers of {} bytes",
            inputs.len(),
            format,
            threads,
            self.config.stage,
            self.config.sort_order,
            self.config.rewrite_buffers,
            self.config.rewrite_buffer_capacity
        );

        let mut coordinator = Coordinator::new(&self.config, inputs, codec, workers);
        let result = coordinator.run(sink);
        let stats = coordinator.stats.clone();
        match &result {
            Ok(()) => info!(
                "Done: {} records read, {} written, {} pairs augmented, {} flushes, {} overflows, {} dispatches",
                stats.records_read,
                stats.records_written,
                stats.pairs_augmented,
                stats.flushes,
                stats.overflows,
                stats.dispatches
            ),
            Err(e) => error!("Pipeline aborted: {}", e),
        }
        result.map(|_| stats)
    }
}

/// State owned by the coordinator loop.
struct Coordinator<'a> {
    config: &'a PipelineConfig,
    workers: rayon::ThreadPool,
    dispatcher: Arc<Dispatcher>,
    tx: Sender<Event>,
    rx: Receiver<Event>,
    lanes: Vec<LaneState>,
    idle_parse: Vec<Vec<ParseBuffer>>,
    ready: VecDeque<ParseBuffer>,
    fillable: VecDeque<RewriteBuffer>,
    slots: Vec<PackageSlot>,
    fills_in_flight: usize,
    dispatches_in_flight: usize,
    fatal: Option<PipelineError>,
    stats: PipelineStats,
}

impl<'a> Coordinator<'a> {
    fn new(
        config: &'a PipelineConfig,
        inputs: Vec<Input>,
        codec: Arc<dyn RecordCodec>,
        workers: rayon::ThreadPool,
    ) -> Self {
        let (tx, rx) = flume::unbounded();
        let pool = Arc::new(RecordPool::new());
        let per_lane = config.parse_buffers_per_lane;

        let mut lanes = Vec::with_capacity(inputs.len());
        let mut idle_parse = Vec::with_capacity(inputs.len());
        for (id, input) in inputs.into_iter().enumerate() {
            lanes.push(LaneState::Idle(Lane::new(
                id,
                input.source,
                Arc::clone(&codec),
                Arc::clone(&pool),
                config.parse_buffer_capacity,
            )));
            idle_parse.push(
                (0..per_lane)
                    .map(|i| {
                        ParseBuffer::new(
                            (id * per_lane + i) as u32,
                            id,
                            config.parse_buffer_capacity,
                            Arc::clone(&pool),
                        )
                    })
                    .collect(),
            );
        }
        let fillable = (0..config.rewrite_buffers)
            .map(|i| RewriteBuffer::new(i as u32, config.rewrite_buffer_capacity))
            .collect();
        let slots = (0..config.work_packages).map(PackageSlot::new).collect();

        Coordinator {
            config,
            workers,
            dispatcher: Arc::new(Dispatcher::new(codec, config.sort_order)),
            tx,
            rx,
            stats: PipelineStats {
                lanes: lanes.len(),
                ..PipelineStats::default()
            },
            lanes,
            idle_parse,
            ready: VecDeque::new(),
            fillable,
            slots,
            fills_in_flight: 0,
            dispatches_in_flight: 0,
            fatal: None,
        }
    }

    fn run(&mut self, sink: &mut dyn RewriteSink) -> Result<()> {
        loop {
            if self.fatal.is_none() {
                self.schedule();
            }
            if self.fills_in_flight == 0 && self.dispatches_in_flight == 0 {
                // Nothing running means nothing more can be scheduled.
                break;
            }
            let event = match self.rx.recv() {
                Ok(event) => event,
                Err(_) => break,
            };
            self.handle(event, sink);
        }

        if let Some(e) = self.fatal.take() {
            let abandoned: usize = self.ready.iter().map(|p| p.live_len() + p.stash_len()).sum();
            if abandoned > 0 {
                error!(
                    "{} records left unwritten in {} parse buffers",
                    abandoned,
                    self.ready.len()
                );
            }
            return Err(e);
        }
        if !self.ready.is_empty() {
            return Err(PipelineError::Io(io::Error::new(
                io::ErrorKind::Other,
                "pipeline stalled with parse buffers left to dispatch",
            )));
        }
        self.flush_remaining(sink)?;
        sink.finish()?;
        Ok(())
    }

    /// Starts every fill and dispatch that has the buffers it needs.
    fn schedule(&mut self) {
        for lane_id in 0..self.lanes.len() {
            if !matches!(self.lanes[lane_id], LaneState::Idle(_)) {
                continue;
            }
            let parse = match self.idle_parse[lane_id].pop() {
                Some(parse) => parse,
                None => continue,
            };
            let mut lane = match std::mem::replace(&mut self.lanes[lane_id], LaneState::Filling) {
                LaneState::Idle(lane) => lane,
                _ => continue,
            };
            let tx = self.tx.clone();
            self.fills_in_flight += 1;
            self.workers.spawn(move || {
                let mut parse = parse;
                let result = lane.fill_into(&mut parse);
                let _ = tx.send(Event::Filled {
                    lane,
                    parse,
                    result,
                });
            });
        }

        while !self.ready.is_empty() && !self.fillable.is_empty() && !self.slots.is_empty() {
            let (parse, rewrite, slot) = match (
                self.ready.pop_front(),
                self.fillable.pop_front(),
                self.slots.pop(),
            ) {
                (Some(parse), Some(rewrite), Some(slot)) => (parse, rewrite, slot),
                _ => break,
            };
            let pkg = WorkPackage {
                slot,
                stage: self.config.stage,
                parse,
                rewrite,
            };
            let dispatcher = Arc::clone(&self.dispatcher);
            let hand_off = ChannelHandOff {
                tx: self.tx.clone(),
            };
            self.dispatches_in_flight += 1;
            self.workers.spawn(move || {
                let result = dispatcher.dispatch(pkg, &hand_off);
                hand_off.send(Event::Dispatched(result));
            });
        }
    }

    fn handle(&mut self, event: Event, sink: &mut dyn RewriteSink) {
        match event {
            Event::Filled {
                lane,
                parse,
                result,
            } => {
                self.fills_in_flight -= 1;
                self.filled(lane, parse, result);
            }
            Event::Dispatched(result) => {
                self.dispatches_in_flight -= 1;
                self.dispatched(result);
            }
            Event::PackageReturned(slot) => self.slots.push(slot),
            Event::EmptyParse(parse) => {
                let lane = parse.lane();
                // Buffers of a finished lane are retired.
                if !self.lanes[lane].is_done() {
                    self.idle_parse[lane].push(parse);
                }
            }
            Event::Reinsert(parse) => self.ready.push_front(parse),
            Event::Fillable(rewrite) => self.fillable.push_front(rewrite),
            Event::Flush(mut rewrite) => {
                if let Err(e) = self.consume(&mut rewrite, sink) {
                    error!("Sink failed on rewrite buffer {}: {}", rewrite.id(), e);
                    self.fail(e.into());
                }
                self.fillable.push_back(rewrite);
            }
        }
    }

    fn filled(&mut self, lane: Lane, parse: ParseBuffer, result: Result<FillReport>) {
        let lane_id = lane.id();
        if let LaneState::Failed = self.lanes[lane_id] {
            // A dispatch of this lane failed while the fill ran.
            debug!(
                "Dropping fill of failed lane {} ({} live records)",
                lane_id,
                parse.live_len()
            );
            return;
        }
        match result {
            Ok(report) => {
                self.stats.fills += 1;
                self.stats.bytes_read += report.bytes_read as u64;
                self.stats.records_read += report.records as u64;
                if report.is_final {
                    debug!("Lane {} reached end of input", lane_id);
                    self.lanes[lane_id] = LaneState::Finished;
                } else {
                    self.lanes[lane_id] = LaneState::Idle(lane);
                }
                if parse.live_len() > 0 {
                    self.ready.push_back(parse);
                } else if !report.is_final {
                    self.idle_parse[lane_id].push(parse);
                }
            }
            Err(e) => {
                error!(
                    "Lane {} failed while filling parse buffer {} ({} live records): {}",
                    lane_id,
                    parse.id(),
                    parse.live_len(),
                    e
                );
                self.lane_failed(lane_id, e);
            }
        }
    }

    fn dispatched(&mut self, result: std::result::Result<DispatchReport, DispatchFailure>) {
        match result {
            Ok(report) => {
                self.stats.dispatches += 1;
                self.stats.records_written += report.stats.records_put as u64;
                self.stats.pairs_augmented += report.stats.pairs_augmented as u64;
                if report.outcome == Outcome::Overflow {
                    self.stats.overflows += 1;
                }
            }
            Err(failure) => {
                self.stats.dispatches += 1;
                error!("Lane {} dispatch failed: {}", failure.parse.lane(), failure);
                let DispatchFailure {
                    error,
                    parse,
                    rewrite,
                } = failure;
                // What made it into the rewrite buffer is still good.
                self.fillable.push_back(rewrite);
                self.lane_failed(parse.lane(), error);
            }
        }
    }

    fn lane_failed(&mut self, lane: usize, e: PipelineError) {
        if let LaneState::Failed = self.lanes[lane] {
            debug!("Lane {} failed again: {}", lane, e);
            return;
        }
        self.lanes[lane] = LaneState::Failed;
        self.idle_parse[lane].clear();
        let e = e.in_lane(lane);
        if self.config.abort_on_lane_error {
            self.fail(e);
        } else {
            warn!("{}, continuing with the remaining lanes", e);
            self.stats.failed_lanes.push(lane);
            // Buffers already decoded are still written.
        }
    }

    /// Keeps the first fatal error. Nothing new is scheduled afterwards.
    fn fail(&mut self, e: PipelineError) {
        if self.fatal.is_none() {
            self.fatal = Some(e);
        }
    }

    fn consume(&mut self, rewrite: &mut RewriteBuffer, sink: &mut dyn RewriteSink) -> io::Result<()> {
        let result = if rewrite.is_empty() {
            Ok(())
        } else {
            debug!(
                "Flushing rewrite buffer {} ({} records, {} bytes)",
                rewrite.id(),
                rewrite.len(),
                rewrite.used_bytes()
            );
            self.stats.flushes += 1;
            sink.consume(rewrite)
        };
        rewrite.reset();
        result
    }

    /// Flushes the partly filled buffers left at end of input.
    fn flush_remaining(&mut self, sink: &mut dyn RewriteSink) -> Result<()> {
        debug_assert!(self.lanes.iter().all(LaneState::is_done));
        let mut buffers: Vec<RewriteBuffer> = self.fillable.drain(..).collect();
        for rewrite in buffers.iter_mut().filter(|r| !r.is_empty()) {
            rewrite.reorder();
            rewrite.mark_final();
            self.consume(rewrite, sink)?;
        }
        self.fillable.extend(buffers);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Stage;
    use crate::reader::Header;
    use crate::record::builder::RecordBuilder;
    use crate::sink::MemorySink;
    use std::io::Cursor;

    fn bam_input(frames: Vec<u8>) -> Input {
        Input {
            format: Format::Bam,
            header: Header::default(),
            source: Box::new(Cursor::new(frames)),
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            threads: 2,
            parse_buffer_capacity: 256,
            rewrite_buffer_capacity: 1024,
            rewrite_buffers: 2,
            work_packages: 2,
            ..PipelineConfig::default()
        }
    }

    fn stream(names: &[&str]) -> Vec<u8> {
        names
            .iter()
            .flat_map(|n| RecordBuilder::new(n).build_frame())
            .collect()
    }

    #[test]
    fn test_no_input() {
        let stats = Pipeline::new(config())
            .unwrap()
            .run(Vec::new(), &mut MemorySink::new())
            .unwrap();
        assert_eq!(stats, PipelineStats::default());
    }

    #[test]
    fn test_every_record_is_written_once() {
        let names: Vec<String> = (0..200).map(|i| format!("read{:03}", i)).collect();
        let names: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
        let mut sink = MemorySink::new();
        let stats = Pipeline::new(config())
            .unwrap()
            .run(vec![bam_input(stream(&names))], &mut sink)
            .unwrap();
        assert_eq!(stats.records_read, 200);
        assert_eq!(stats.records_written, 200);
        assert!(stats.overflows > 0);
        let mut written: Vec<Vec<u8>> = sink.records().map(|r| r.to_vec()).collect();
        written.sort();
        let mut expected: Vec<Vec<u8>> = names.iter().map(|n| RecordBuilder::new(n).build_frame()).collect();
        expected.sort();
        assert_eq!(written, expected);
        assert!(sink.runs.iter().all(|r| r.used_bytes <= 1024));
    }

    #[test]
    fn test_lanes_must_share_references() {
        let header = Header::from_sam_text("@SQ\tSN:c\tLN:5\n".to_string()).unwrap();
        let mut other = bam_input(Vec::new());
        other.header = header;
        let err = Pipeline::new(config())
            .unwrap()
            .run(vec![bam_input(Vec::new()), other], &mut MemorySink::new())
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidHeader(_)));
    }

    #[test]
    fn test_lane_error_aborts_by_default() {
        let mut broken = stream(&["a", "b"]);
        broken.truncate(broken.len() - 2);
        let err = Pipeline::new(config())
            .unwrap()
            .run(
                vec![bam_input(stream(&["x", "y"])), bam_input(broken)],
                &mut MemorySink::new(),
            )
            .unwrap_err();
        assert!(matches!(err, PipelineError::Lane { lane: 1, .. }));
        assert!(err.is_malformed_input());
    }

    #[test]
    fn test_lane_error_can_be_isolated() {
        let mut broken = stream(&["a", "b"]);
        broken.truncate(broken.len() - 2);
        let mut sink = MemorySink::new();
        let stats = Pipeline::new(PipelineConfig {
            abort_on_lane_error: false,
            stage: Stage::Passthrough,
            ..config()
        })
        .unwrap()
        .run(vec![bam_input(broken), bam_input(stream(&["x", "y"]))], &mut sink)
        .unwrap();
        assert_eq!(stats.failed_lanes, vec![0]);
        assert_eq!(sink.records().count(), 2);
    }

    #[test]
    fn test_fill_finishing_after_lane_failure_is_dropped() {
        let names: Vec<String> = (0..50).map(|i| format!("read{:02}", i)).collect();
        let names: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
        let config = PipelineConfig {
            abort_on_lane_error: false,
            ..config()
        };
        let workers = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let mut coordinator = Coordinator::new(
            &config,
            vec![bam_input(stream(&names))],
            Arc::new(BamCodec),
            workers,
        );
        let mut lane = match std::mem::replace(&mut coordinator.lanes[0], LaneState::Filling) {
            LaneState::Idle(lane) => lane,
            _ => panic!("lane not idle"),
        };
        let mut parse = coordinator.idle_parse[0].pop().unwrap();
        coordinator.fills_in_flight = 1;

        // A dispatch of the lane fails while its fill is still running.
        coordinator.lane_failed(
            0,
            PipelineError::RecordTooLarge {
                size: 2048,
                capacity: 1024,
            },
        );
        let result = lane.fill_into(&mut parse);
        assert!(result.as_ref().unwrap().records > 0);
        let mut sink = MemorySink::new();
        coordinator.handle(
            Event::Filled {
                lane,
                parse,
                result,
            },
            &mut sink,
        );

        assert!(matches!(coordinator.lanes[0], LaneState::Failed));
        assert!(coordinator.ready.is_empty());
        assert!(coordinator.idle_parse[0].is_empty());
        assert_eq!(coordinator.fills_in_flight, 0);
        assert_eq!(coordinator.stats.failed_lanes, vec![0]);

        // Nothing is left to schedule for the lane.
        coordinator.schedule();
        assert_eq!(coordinator.fills_in_flight, 0);
        coordinator.run(&mut sink).unwrap();
        assert_eq!(sink.records().count(), 0);
    }

    #[test]
    fn test_oversized_record_is_fatal() {
        let big = RecordBuilder::new("big").seq(&"A".repeat(2000)).build_frame();
        let err = Pipeline::new(config())
            .unwrap()
            .run(vec![bam_input(big)], &mut MemorySink::new())
            .unwrap_err();
        match err {
            PipelineError::Lane { lane: 0, source } => {
                assert!(matches!(*source, PipelineError::RecordTooLarge { .. }))
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
