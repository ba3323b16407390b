use anyhow::{bail, Context, Result};
use bam_rewrite::{open, Input, Pipeline, PipelineConfig, RunWriter, SortOrder, Stage};
use env_logger::Env;
use log::info;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Instant;
use structopt::StructOpt;

#[derive(StructOpt)]
struct Cli {
    /// BAM or SAM files to read, plain or BGZF compressed. Each one is read by
    /// its own lane.
    #[structopt(parse(from_os_str), required = true)]
    in_paths: Vec<PathBuf>,
    /// Every flushed buffer is written to <out-prefix>.<n>.bam (or .sam).
    #[structopt(short, long, parse(from_os_str))]
    out_prefix: PathBuf,
    /// JSON file with pipeline settings. Options below override it.
    #[structopt(short, long, parse(from_os_str))]
    config: Option<PathBuf>,
    /// Number of worker threads.
    #[structopt(short, long)]
    thread_num: Option<usize>,
    /// Bytes decoded per fill of a parse buffer.
    #[structopt(long)]
    parse_buffer_capacity: Option<usize>,
    /// Bytes of one rewrite buffer, which is also the size of one output run.
    #[structopt(long)]
    rewrite_buffer_capacity: Option<usize>,
    /// fix_mate or passthrough
    #[structopt(long)]
    stage: Option<Stage>,
    /// coordinate or input
    #[structopt(long)]
    sort: Option<SortOrder>,
    /// Keep going when one input fails.
    #[structopt(long)]
    keep_going: bool,
    /// Show progress of BGZF inputs.
    #[structopt(short, long)]
    progress: bool,
}

impl Cli {
    fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)
                .with_context(|| format!("Couldn't load config {}", path.display()))?,
            None => PipelineConfig::default(),
        };
        if let Some(threads) = self.thread_num {
            config.threads = threads;
            config.work_packages = 2 * threads;
        }
        if let Some(capacity) = self.parse_buffer_capacity {
            config.parse_buffer_capacity = capacity;
        }
        if let Some(capacity) = self.rewrite_buffer_capacity {
            config.rewrite_buffer_capacity = capacity;
        }
        if let Some(stage) = self.stage {
            config.stage = stage;
        }
        if let Some(order) = self.sort {
            config.sort_order = order;
        }
        if self.keep_going {
            config.abort_on_lane_error = false;
        }
        config.track_progress |= self.progress;
        config.validate()?;
        Ok(config)
    }
}

fn open_input(path: &Path, config: &PipelineConfig) -> Result<Input> {
    let file = File::open(path).with_context(|| format!("Couldn't open {}", path.display()))?;
    let size = file.metadata()?.len();
    let track_progress = if config.track_progress {
        Some(size)
    } else {
        None
    };
    open(file, config.effective_threads(), track_progress)
        .with_context(|| format!("Couldn't read header of {}", path.display()))
}

/// Rewrites BAM/SAM inputs into sorted runs, filling in mate information.
fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Cli::from_args();
    let config = args.pipeline_config()?;

    let inputs = args
        .in_paths
        .iter()
        .map(|path| open_input(path, &config))
        .collect::<Result<Vec<_>>>()?;
    let (format, header) = match inputs.first() {
        Some(input) => (input.format, input.header.clone()),
        None => bail!("No input given"),
    };

    let now = Instant::now();
    let mut sink = RunWriter::new(&args.out_prefix, format, header);
    let stats = Pipeline::new(config)?.run(inputs, &mut sink)?;

    info!("Time elapsed: {}ms", now.elapsed().as_millis());
    println!("Records read      {}", stats.records_read);
    println!("Records written   {}", stats.records_written);
    println!("Pairs augmented   {}", stats.pairs_augmented);
    println!("Runs written      {}", sink.runs().len());
    println!("Overflows         {}", stats.overflows);
    for path in sink.runs() {
        println!("{}", path.display());
    }
    if !stats.failed_lanes.is_empty() {
        bail!("Inputs {:?} failed, see the log", stats.failed_lanes);
    }
    Ok(())
}
