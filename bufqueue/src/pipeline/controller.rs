use std::io;
use std::mem;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::{BufferPool, Serialized, StopToken};
use crate::config::PipelineConfig;
use crate::errors::PipelineError;
use crate::reader::{Consumer, DataSink, ReaderStats};
use crate::writer::{DataSource, Producer, WriterStats};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Result of one worker thread, whichever role it had.
enum Stats {
    Writer(WriterStats),
    Reader(ReaderStats),
}

struct Worker {
    name: String,
    token: StopToken,
    handle: JoinHandle<Stats>,
}

impl Worker {
    fn join(self) -> Result<Stats, PipelineError> {
        let Worker { name, handle, .. } = self;
        handle.join().map_err(|_| PipelineError::WorkerPanicked(name))
    }
}

/// What the workers did, and where the buffers ended up once they all stopped.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub writers: Vec<WriterStats>,
    pub readers: Vec<ReaderStats>,
    pub buffers_empty: usize,
    pub buffers_full: usize,
}

impl PipelineReport {
    pub fn filled(&self) -> u64 {
        self.writers.iter().map(|w| w.filled).sum()
    }

    pub fn processed(&self) -> u64 {
        self.readers.iter().map(|r| r.processed).sum()
    }

    pub fn source_failures(&self) -> u64 {
        self.writers.iter().map(|w| w.source_failures).sum()
    }

    /// Buffers found back in either queue.
    pub fn buffers_returned(&self) -> usize {
        self.buffers_empty + self.buffers_full
    }

    fn collect(
        &mut self,
        joined: Result<Stats, PipelineError>,
        first_err: &mut Option<PipelineError>,
    ) {
        match joined {
            Ok(Stats::Writer(stats)) => self.writers.push(stats),
            Ok(Stats::Reader(stats)) => self.readers.push(stats),
            Err(e) => {
                warn!("{}", e);
                first_err.get_or_insert(e);
            }
        }
    }
}

pub struct RunningPipeline {
    pool: BufferPool,
    writers: Vec<Worker>,
    readers: Vec<Worker>,
}

/// Builds the buffer pool and starts the reader threads, then the writer threads.
///
/// If any thread fails to spawn, every thread already running is stopped and joined
/// before the error is returned.
pub fn start(
    cfg: &PipelineConfig,
    source: Arc<dyn DataSource>,
    sink: Arc<dyn DataSink>,
) -> Result<RunningPipeline, PipelineError> {
    start_with(cfg, source, sink, |name, f| {
        thread::Builder::new().name(name.to_string()).spawn(f)
    })
}

// `spawn` is a parameter so tests can make thread creation fail.
fn start_with<F>(
    cfg: &PipelineConfig,
    source: Arc<dyn DataSource>,
    sink: Arc<dyn DataSink>,
    mut spawn: F,
) -> Result<RunningPipeline, PipelineError>
where
    F: FnMut(&str, Box<dyn FnOnce() -> Stats + Send>) -> io::Result<JoinHandle<Stats>>,
{
    cfg.validate()?;
    let pool = BufferPool::new(cfg.buffer_count, cfg.buffer_size, cfg.pop_timeout())?;
    let source: Arc<dyn DataSource> = if cfg.serialize_source {
        Arc::new(Serialized::new(source))
    } else {
        source
    };
    let sink: Arc<dyn DataSink> = if cfg.serialize_sink {
        Arc::new(Serialized::new(sink))
    } else {
        sink
    };

    let mut running = RunningPipeline {
        pool,
        writers: Vec::with_capacity(cfg.producers),
        readers: Vec::with_capacity(cfg.consumers),
    };

    for id in 0..cfg.consumers {
        let name = format!("reader-{}", id);
        let token = StopToken::new();
        let consumer = Consumer::new(
            id,
            running.pool.empty.clone(),
            running.pool.full.clone(),
            sink.clone(),
        );
        let worker_token = token.clone();
        match spawn(&name, Box::new(move || Stats::Reader(consumer.run(&worker_token)))) {
            Ok(handle) => running.readers.push(Worker {
                name,
                token,
                handle,
            }),
            Err(source) => return Err(running.abort(name, source)),
        }
    }

    for id in 0..cfg.producers {
        let name = format!("writer-{}", id);
        let token = StopToken::new();
        let producer = Producer::new(
            id,
            running.pool.empty.clone(),
            running.pool.full.clone(),
            source.clone(),
        );
        let worker_token = token.clone();
        match spawn(&name, Box::new(move || Stats::Writer(producer.run(&worker_token)))) {
            Ok(handle) => running.writers.push(Worker {
                name,
                token,
                handle,
            }),
            Err(source) => return Err(running.abort(name, source)),
        }
    }

    info!(
        readers = cfg.consumers,
        writers = cfg.producers,
        buffers = cfg.buffer_count,
        buffer_size = cfg.buffer_size,
        "pipeline started"
    );
    Ok(running)
}

impl RunningPipeline {
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Lets the pipeline run for `interval`, or until `shutdown` is stopped, then
    /// stops it. An interval too long to express as a deadline waits for `shutdown`
    /// alone.
    pub fn run_for(
        self,
        interval: Duration,
        shutdown: &StopToken,
    ) -> Result<PipelineReport, PipelineError> {
        let deadline = Instant::now().checked_add(interval);
        while shutdown.is_running() {
            let pause = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    POLL_INTERVAL.min(deadline - now)
                }
                None => POLL_INTERVAL,
            };
            thread::sleep(pause);
        }
        if !shutdown.is_running() {
            info!("shutdown requested");
        }
        self.stop()
    }

    /// Stops the writers and waits for them, then waits for the readers to drain the
    /// full queue and time out on their own.
    pub fn stop(mut self) -> Result<PipelineReport, PipelineError> {
        let writers = mem::take(&mut self.writers);
        let readers = mem::take(&mut self.readers);
        for writer in &writers {
            writer.token.stop();
        }
        let mut report = PipelineReport::default();
        let mut first_err = None;
        for writer in writers {
            report.collect(writer.join(), &mut first_err);
        }
        info!(filled = report.filled(), "writers stopped, draining");
        for reader in readers {
            report.collect(reader.join(), &mut first_err);
        }
        report.buffers_empty = self.pool.empty.len();
        report.buffers_full = self.pool.full.len();
        info!(
            processed = report.processed(),
            buffers_returned = report.buffers_returned(),
            "pipeline stopped"
        );
        match first_err {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    fn abort(mut self, name: String, source: io::Error) -> PipelineError {
        warn!("failed to spawn {}: {}, stopping started threads", name, source);
        self.signal_stop();
        let writers = mem::take(&mut self.writers);
        let readers = mem::take(&mut self.readers);
        for worker in writers.into_iter().chain(readers) {
            if let Err(e) = worker.join() {
                warn!("{}", e);
            }
        }
        PipelineError::Spawn { name, source }
    }

    fn signal_stop(&self) {
        for worker in self.writers.iter().chain(&self.readers) {
            worker.token.stop();
        }
    }
}

// Dropping without `stop` still ends every thread, but does not wait for them.
impl Drop for RunningPipeline {
    fn drop(&mut self) {
        if !self.writers.is_empty() || !self.readers.is_empty() {
            debug!("pipeline dropped while running, stopping workers");
            self.signal_stop();
        }
    }
}
