use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::backend::Backends;
use crate::config::{ExportConfig, SourceConfig};
use crate::error::{ExportResult, PipelineError, Result};
use crate::exporter::Exporter;
use crate::format::MediaKind;
use crate::frame::Frame;
use crate::queue::{BoundedQueue, EndMarker};
use crate::source::{Source, SourceCanceller};

/// Decodes an input file and re-encodes it through an [`Exporter`].
///
/// One bridge thread per stream moves decoded frames from the source's frame
/// queue into the exporter.
pub struct Transcoder {
    source: Mutex<Source>,
    exporter: Arc<Exporter>,
    canceller: Mutex<Option<SourceCanceller>>,
    bridges: Mutex<Vec<JoinHandle<u64>>>,
}

impl Transcoder {
    pub fn new(mut source: SourceConfig, export: ExportConfig, backends: &Backends) -> Self {
        // a stream the export drops is never decoded
        source.disable_video |= export.disable_video;
        source.disable_audio |= export.disable_audio;
        Self {
            source: Mutex::new(Source::new(source, backends)),
            exporter: Arc::new(Exporter::new(export, backends)),
            canceller: Mutex::new(None),
            bridges: Mutex::new(Vec::new()),
        }
    }

    pub fn on_finished(&self, callback: impl FnOnce(ExportResult) + Send + 'static) {
        self.exporter.on_finished(callback);
    }

    pub fn exporter(&self) -> &Arc<Exporter> {
        &self.exporter
    }

    pub fn start(&self) -> Result<()> {
        let mut source = self.source.lock();
        if let Err(err) = source.open() {
            log::error!("open source failed: {}", err);
            self.exporter.fail_unstarted(&err);
            return Err(err);
        }
        if let Err(err) = self.exporter.start() {
            if let Err(e) = source.stop() {
                log::warn!("close source: {}", e);
            }
            return Err(err);
        }
        if let Err(err) = source.start() {
            log::error!("start source failed: {}", err);
            if let Err(e) = source.stop() {
                log::warn!("close source: {}", e);
            }
            self.exporter
                .abort_with(PipelineError::resource("starting source", anyhow::anyhow!("{}", err)));
            self.exporter.stop();
            return Err(err);
        }

        let canceller = source.canceller();
        let mut bridges = self.bridges.lock();
        for kind in self.exporter.config().enabled_kinds() {
            let Some(frames) = source.frame_queue(kind) else {
                log::warn!("input has no {} stream", kind);
                continue;
            };
            let bridge = Bridge {
                kind,
                frames,
                exporter: self.exporter.clone(),
                canceller: canceller.clone(),
            };
            let handle = std::thread::Builder::new()
                .name(format!("bridge-{}", kind))
                .spawn(move || bridge.run());
            match handle {
                Ok(handle) => bridges.push(handle),
                Err(e) => {
                    drop(bridges);
                    self.exporter
                        .abort_with(PipelineError::resource(format!("spawning bridge-{}", kind), e));
                    canceller.cancel();
                    *self.canceller.lock() = Some(canceller);
                    drop(source);
                    self.wait();
                    return Err(PipelineError::Aborted);
                }
            }
        }
        *self.canceller.lock() = Some(canceller);
        Ok(())
    }

    /// Block until every decoded frame went through the exporter, then
    /// finalize the output.
    pub fn wait(&self) -> ExportResult {
        let bridges: Vec<_> = self.bridges.lock().drain(..).collect();
        for bridge in bridges {
            match bridge.join() {
                Ok(frames) => log::debug!("bridge forwarded {} frames", frames),
                Err(_) => self.exporter.abort_with(PipelineError::codec(
                    "joining bridge",
                    anyhow::anyhow!("thread panicked"),
                )),
            }
        }
        if let Err(err) = self.source.lock().stop() {
            log::error!("source failed: {}", err);
            self.exporter.abort_with(err);
        }
        self.exporter.stop()
    }

    /// Abort both halves. The output is finalized with what was encoded.
    pub fn cancel(&self) -> ExportResult {
        let result = self.exporter.cancel();
        if let Some(canceller) = self.canceller.lock().as_ref() {
            canceller.cancel();
        }
        self.wait();
        result
    }
}

impl Drop for Transcoder {
    fn drop(&mut self) {
        self.cancel();
    }
}

struct Bridge {
    kind: MediaKind,
    frames: Arc<BoundedQueue<Frame>>,
    exporter: Arc<Exporter>,
    canceller: SourceCanceller,
}

impl Bridge {
    fn run(self) -> u64 {
        let mut forwarded = 0;
        let mut capped = false;
        while let Some(frame) = self.frames.get() {
            if frame.is_end_marker() {
                self.frames.release(frame);
                break;
            }
            if !capped {
                match self.exporter.submit(&frame) {
                    Ok(()) => forwarded += 1,
                    // keep draining so the decoder never stalls on a full queue
                    Err(PipelineError::DurationReached { frames }) => {
                        log::info!("{} reached duration after {} frames", self.kind, frames);
                        capped = true;
                    }
                    Err(PipelineError::Aborted) => {
                        self.frames.release(frame);
                        break;
                    }
                    Err(err) if err.is_fatal() => {
                        log::error!("{} bridge: {}", self.kind, err);
                        self.frames.release(frame);
                        self.canceller.cancel();
                        break;
                    }
                    Err(err) => log::warn!("dropping {} frame: {}", self.kind, err),
                }
            }
            self.frames.release(frame);
        }
        forwarded
    }
}

#[cfg(test)]
#[path = "transcode_test.rs"]
mod transcode_test;
