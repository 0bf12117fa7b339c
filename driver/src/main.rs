use std::error::Error;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bufqueue::pipeline;
use bufqueue::reader::PseudoSink;
use bufqueue::shutdown::ShutdownSignal;
use bufqueue::writer::PseudoSource;
use bufqueue::PipelineConfig;

#[derive(clap::Parser)]
#[clap()]
struct Opts {
    #[clap(short = 'c', long = "config", default_value = "bufqueue.toml")]
    config: String,
    /// Overrides `producers` from the config file.
    #[clap(short = 'w', long = "writers")]
    writers: Option<usize>,
    /// Overrides `consumers` from the config file.
    #[clap(short = 'r', long = "readers")]
    readers: Option<usize>,
    /// Seconds to run before stopping the writers. Very large values run until a
    /// termination signal arrives.
    #[clap(long = "run-for")]
    run_for: Option<u64>,
    /// Log filter used when RUST_LOG is not set, e.g. `debug` or `bufqueue=trace`.
    #[clap(long = "log", default_value = "info")]
    log: String,
}

fn main() -> Result<(), Box<dyn Error>> {
    let opts: Opts = Opts::parse();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&opts.log));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let mut cfg = PipelineConfig::load(&opts.config)?;
    if let Some(writers) = opts.writers {
        cfg.producers = writers;
    }
    if let Some(readers) = opts.readers {
        cfg.consumers = readers;
    }
    if let Some(secs) = opts.run_for {
        cfg.run_for_secs = secs;
    }
    info!(config = ?cfg, path = %opts.config, "loaded config");

    let shutdown = ShutdownSignal::install()?;
    let running = pipeline::start(&cfg, Arc::new(PseudoSource::default()), Arc::new(PseudoSink))?;
    let report = running.run_for(cfg.run_for(), shutdown.token())?;

    println!(
        "filled {} buffers ({} source failures), processed {}, {}/{} buffers back in the pool",
        report.filled(),
        report.source_failures(),
        report.processed(),
        report.buffers_returned(),
        cfg.buffer_count,
    );
    Ok(())
}
