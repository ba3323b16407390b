//! Pipeline sizing and behaviour, loadable from JSON.

use crate::dispatch::Stage;
use crate::error::ConfigError;
use crate::rewrite_buffer::ENTRY_OVERHEAD;
use crate::record::fields::FIXED_SIZE;
use crate::sorting::SortOrder;
use crate::MEGA_BYTE_SIZE;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Every field has a default, a JSON file only needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Worker threads running fills and dispatches.
    pub threads: usize,
    /// Frame bytes decoded into one parse buffer per fill.
    pub parse_buffer_capacity: usize,
    pub parse_buffers_per_lane: usize,
    /// Payload plus index bytes of one rewrite buffer.
    pub rewrite_buffer_capacity: usize,
    pub rewrite_buffers: usize,
    /// Upper bound of dispatches in flight.
    pub work_packages: usize,
    pub stage: Stage,
    pub sort_order: SortOrder,
    /// A fatal error in one lane stops every lane.
    pub abort_on_lane_error: bool,
    pub track_progress: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let threads = num_cpus::get().max(1);
        PipelineConfig {
            threads,
            parse_buffer_capacity: 4 * MEGA_BYTE_SIZE,
            parse_buffers_per_lane: 2,
            rewrite_buffer_capacity: 64 * MEGA_BYTE_SIZE,
            rewrite_buffers: 4,
            work_packages: 2 * threads,
            stage: Stage::FixMate,
            sort_order: SortOrder::Coordinate,
            abort_on_lane_error: true,
            track_progress: false,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config: PipelineConfig = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Threads actually used: at least one, at most the number of CPUs.
    pub fn effective_threads(&self) -> usize {
        self.threads.clamp(1, num_cpus::get().max(1))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("threads", self.threads),
            ("parse_buffer_capacity", self.parse_buffer_capacity),
            ("parse_buffers_per_lane", self.parse_buffers_per_lane),
            ("rewrite_buffers", self.rewrite_buffers),
            ("work_packages", self.work_packages),
        ];
        for (parameter, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidParameter {
                    parameter,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        // Room for at least one minimal record.
        let min_rewrite = ENTRY_OVERHEAD + FIXED_SIZE + 2;
        if self.rewrite_buffer_capacity < min_rewrite {
            return Err(ConfigError::InvalidParameter {
                parameter: "rewrite_buffer_capacity",
                reason: format!("must be at least {} bytes", min_rewrite),
            });
        }
        Ok(())
    }
}
