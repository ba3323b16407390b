mod block;
mod gz;
mod util;

pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod lane;
pub mod mate;
pub mod parse_buffer;
pub mod pipeline;
pub mod pool;
pub mod reader;
pub mod rewrite_buffer;
pub mod sink;
// Sort keys put on records before they enter a rewrite buffer.
pub mod sorting;

pub mod record {
    mod alignment;
    /// Assembles BAM records from SAM level fields.
    pub mod builder;
    pub mod cigar;
    /// This module contains definition of Fields enum which is used to query
    /// BAM record fields.
    pub mod fields;
    mod flags;
    /// Module responsible for tags parsing
    pub mod tags;

    pub use alignment::{Owner, Record, Role, SlotId, SortKey};
    pub use flags::Flags;
}

pub use codec::{BamCodec, Format, RecordCodec, SamCodec};
pub use config::PipelineConfig;
pub use dispatch::{Dispatcher, HandOff, Stage, WorkPackage};
pub use error::{DecodeError, PipelineError, Result};
pub use pipeline::{Pipeline, PipelineStats};
pub use reader::{open, Header, Input};
pub use sink::{MemorySink, RewriteSink, RunWriter};
pub use sorting::SortOrder;

use std::mem;

pub const MEGA_BYTE_SIZE: usize = 1024 * 1024;
const U32_SIZE: usize = mem::size_of::<u32>();
const U16_SIZE: usize = mem::size_of::<u16>();
const U8_SIZE: usize = mem::size_of::<u8>();
const MAGIC_NUMBER: &[u8] = b"BAM\x01";
