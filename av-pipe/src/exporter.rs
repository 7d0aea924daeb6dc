use std::sync::Arc;
use std::sync::atomic::Ordering;

use bytes::BytesMut;
use parking_lot::{Mutex, MutexGuard};

use crate::backend::Backends;
use crate::config::ExportConfig;
use crate::convert::{ConverterFactory, FrameConverter};
use crate::error::{ExportResult, PipelineError, Result};
use crate::format::{FrameFormat, MediaKind};
use crate::frame::{Frame, FrameView};
use crate::queue::BoundedQueue;
use crate::sink::{Sink, SinkState, StopMode};
use crate::stats::{PipelineCounters, PipelineStats, StreamCounters};
use crate::status::SharedState;

pub type ResultCallback = Box<dyn FnOnce(ExportResult) + Send>;

/// Submission side of one enabled stream.
struct Input {
    kind: MediaKind,
    target: FrameFormat,
    queue: Arc<BoundedQueue<Frame>>,
    converter: Mutex<Box<dyn FrameConverter>>,
    counters: Arc<StreamCounters>,
    /// Frames accepted before `DurationReached`; 0 is unbounded.
    budget: u64,
    /// Audio only: converted samples waiting for a full encoder frame.
    fifo: Option<Mutex<SampleFifo>>,
}

#[derive(Default)]
struct SampleFifo {
    converted: Frame,
    pending: BytesMut,
}

#[derive(Default)]
struct Lifecycle {
    started: bool,
    canceled: bool,
    result: Option<ExportResult>,
    callback: Option<ResultCallback>,
    last_error: Option<String>,
}

/// Drives one export run: validates the configuration, starts the sink,
/// converts submitted images and samples into the export format and reports
/// exactly one terminal result.
///
/// All methods take `&self`, so an exporter can be shared between a video
/// and an audio submitter behind an `Arc`.
pub struct Exporter {
    config: ExportConfig,
    converters: Arc<dyn ConverterFactory>,
    sink: Mutex<Sink>,
    shared: Arc<SharedState>,
    inputs: Mutex<Vec<Arc<Input>>>,
    lifecycle: Mutex<Lifecycle>,
    counters: Arc<PipelineCounters>,
}

impl Exporter {
    pub fn new(config: ExportConfig, backends: &Backends) -> Self {
        let counters = Arc::new(PipelineCounters::default());
        let sink = Sink::new(config.clone(), backends, counters.clone());
        let shared = sink.shared().clone();
        Self {
            config,
            converters: backends.converters.clone(),
            sink: Mutex::new(sink),
            shared,
            inputs: Mutex::new(Vec::new()),
            lifecycle: Mutex::new(Lifecycle::default()),
            counters,
        }
    }

    /// Register the callback receiving the terminal result.
    pub fn on_finished(&self, callback: impl FnOnce(ExportResult) + Send + 'static) {
        self.lifecycle.lock().callback = Some(Box::new(callback));
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    pub fn stats(&self) -> PipelineStats {
        self.counters.snapshot()
    }

    pub fn sink_state(&self) -> SinkState {
        self.sink.lock().state()
    }

    /// Terminal result, once delivered.
    pub fn result(&self) -> Option<ExportResult> {
        self.lifecycle.lock().result
    }

    /// Message of the error that failed the run.
    pub fn last_error(&self) -> Option<String> {
        self.lifecycle.lock().last_error.clone()
    }

    /// Validate the configuration, open the output and start encoding.
    ///
    /// A failure here is also reported to the callback as `Failed`.
    pub fn start(&self) -> Result<()> {
        let mut life = self.lifecycle.lock();
        if life.started || life.result.is_some() {
            return Err(PipelineError::InvalidState("exporter already started".into()));
        }
        life.started = true;
        match self.start_stages() {
            Ok(()) => {
                log::info!(
                    "export started: {} ({}x{} @ {} fps, {} ms)",
                    self.config.output.display(),
                    self.config.width,
                    self.config.height,
                    self.config.fps,
                    self.config.duration_ms
                );
                Ok(())
            }
            Err(err) => {
                log::error!("export start failed: {}", err);
                life.last_error = Some(err.to_string());
                if let Err(e) = self.sink.lock().stop(StopMode::Abort) {
                    log::warn!("teardown after failed start: {}", e);
                }
                self.finish(life, ExportResult::Failed);
                Err(err)
            }
        }
    }

    fn start_stages(&self) -> Result<()> {
        self.config.validate()?;
        let mut sink = self.sink.lock();
        sink.open()?;
        let mut inputs = Vec::new();
        for kind in self.config.enabled_kinds() {
            let queue = sink
                .queue(kind)
                .ok_or_else(|| PipelineError::InvalidState(format!("no {} output", kind)))?;
            let converter = self.converters.open_converter(kind).map_err(|e| {
                PipelineError::resource(format!("opening {} converter", kind), e)
            })?;
            inputs.push(Arc::new(Input {
                kind,
                target: self.config.export_format(kind),
                queue,
                converter: Mutex::new(converter),
                counters: self.counters.for_kind(kind).clone(),
                budget: self.config.frame_budget(kind),
                fifo: (kind == MediaKind::Audio).then(|| Mutex::new(SampleFifo::default())),
            }));
        }
        sink.start()?;
        *self.inputs.lock() = inputs;
        Ok(())
    }

    /// Submit one image in the configured submit format (RGBA by default).
    /// Blocks while the video queue is full.
    pub fn submit_frame(&self, pixels: &[u8], width: u32, height: u32) -> Result<()> {
        if pixels.is_empty() {
            return Err(PipelineError::InvalidInput("empty image buffer".into()));
        }
        if width == 0 || height == 0 {
            return Err(PipelineError::InvalidInput(format!(
                "invalid image size {}x{}",
                width, height
            )));
        }
        let format = self.config.submit_format(MediaKind::Video, width, height);
        let needed = format.buffer_size();
        if pixels.len() < needed {
            return Err(PipelineError::InvalidInput(format!(
                "image buffer holds {} bytes, {}x{} needs {}",
                pixels.len(),
                width,
                height,
                needed
            )));
        }
        let input = self.input(MediaKind::Video)?;
        self.enqueue(&input, FrameView::new(&pixels[..needed], format))
    }

    /// Submit one audio frame of interleaved samples in the export layout.
    pub fn submit_samples(&self, samples: &[u8]) -> Result<()> {
        let format = self.config.export_format(MediaKind::Audio);
        let needed = format.buffer_size();
        if samples.len() < needed {
            return Err(PipelineError::InvalidInput(format!(
                "sample buffer holds {} bytes, one frame needs {}",
                samples.len(),
                needed
            )));
        }
        let input = self.input(MediaKind::Audio)?;
        self.enqueue(&input, FrameView::new(&samples[..needed], format))
    }

    /// Submit an already decoded frame, converting it when its format differs
    /// from the export format.
    pub fn submit(&self, frame: &Frame) -> Result<()> {
        let view = frame
            .view()
            .ok_or_else(|| PipelineError::InvalidInput("frame has no format".into()))?;
        let input = self.input(view.format.kind())?;
        self.enqueue(&input, view)
    }

    fn input(&self, kind: MediaKind) -> Result<Arc<Input>> {
        if self.shared.is_aborted() {
            return Err(PipelineError::Aborted);
        }
        if let Some(input) = self.inputs.lock().iter().find(|i| i.kind == kind) {
            return Ok(input.clone());
        }
        let life = self.lifecycle.lock();
        if !life.started {
            Err(PipelineError::InvalidState("exporter not started".into()))
        } else if life.result.is_some() {
            Err(PipelineError::Aborted)
        } else {
            Err(PipelineError::InvalidInput(format!("{} is disabled", kind)))
        }
    }

    fn enqueue(&self, input: &Input, src: FrameView<'_>) -> Result<()> {
        if let Some(fifo) = &input.fifo {
            return self.enqueue_samples(input, &mut fifo.lock(), src);
        }
        self.reserve(input)?;
        let mut frame = input.queue.acquire();
        frame.reset();
        let converted = input.converter.lock().convert(src, &mut frame, input.target);
        if let Err(e) = converted {
            input.queue.release(frame);
            input.counters.frames_submitted.fetch_sub(1, Ordering::AcqRel);
            return Err(self.conversion_failed(e));
        }
        self.put(input, frame)
    }

    /// Convert audio into the export layout and cut it into encoder frames of
    /// exactly `frame_size` samples. The remainder waits for the next call.
    fn enqueue_samples(
        &self,
        input: &Input,
        fifo: &mut SampleFifo,
        src: FrameView<'_>,
    ) -> Result<()> {
        let converted = input
            .converter
            .lock()
            .convert(src, &mut fifo.converted, input.target);
        if let Err(e) = converted {
            return Err(self.conversion_failed(e));
        }
        fifo.pending.extend_from_slice(fifo.converted.data());

        let frame_bytes = input.target.buffer_size();
        while fifo.pending.len() >= frame_bytes {
            if let Err(err) = self.reserve(input) {
                fifo.pending.clear();
                return Err(err);
            }
            let chunk = fifo.pending.split_to(frame_bytes);
            let mut frame = input.queue.acquire();
            frame.reset();
            if let Err(e) = frame.copy_from(&chunk, input.target) {
                input.queue.release(frame);
                input.counters.frames_submitted.fetch_sub(1, Ordering::AcqRel);
                return Err(self.conversion_failed(e));
            }
            self.put(input, frame)?;
        }
        Ok(())
    }

    /// Queue the samples left in the audio FIFO as one short last frame.
    fn flush_samples(&self, input: &Input) -> Result<()> {
        let Some(fifo) = &input.fifo else {
            return Ok(());
        };
        let mut fifo = fifo.lock();
        let FrameFormat::Audio {
            sample,
            channels,
            sample_rate,
            ..
        } = input.target
        else {
            return Ok(());
        };
        let per_sample = sample.bytes_per_sample() * channels as usize;
        let samples = fifo.pending.len() / per_sample.max(1);
        if samples == 0 {
            return Ok(());
        }
        self.reserve(input)?;
        let format = FrameFormat::audio(sample, channels, sample_rate, samples as u32);
        let chunk = fifo.pending.split();
        let mut frame = input.queue.acquire();
        frame.reset();
        if let Err(e) = frame.copy_from(&chunk, format) {
            input.queue.release(frame);
            return Err(self.conversion_failed(e));
        }
        log::debug!("audio tail of {} samples queued", samples);
        self.put(input, frame)
    }

    /// Count one more frame against the duration budget.
    fn reserve(&self, input: &Input) -> Result<()> {
        let submitted = &input.counters.frames_submitted;
        if input.budget == 0 {
            submitted.fetch_add(1, Ordering::AcqRel);
            return Ok(());
        }
        let budget = input.budget;
        submitted
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < budget).then_some(n + 1)
            })
            .map(|_| ())
            .map_err(|_| PipelineError::DurationReached { frames: budget })
    }

    fn put(&self, input: &Input, frame: Frame) -> Result<()> {
        if !input.queue.put(frame) {
            input.counters.frames_submitted.fetch_sub(1, Ordering::AcqRel);
            return Err(PipelineError::Aborted);
        }
        Ok(())
    }

    fn conversion_failed(&self, e: anyhow::Error) -> PipelineError {
        let message = format!("{:#}", e);
        self.abort_with(PipelineError::Conversion(e));
        PipelineError::Conversion(anyhow::anyhow!(message))
    }

    /// Record `err` as the run's failure and unwind the encode threads.
    pub fn abort_with(&self, err: PipelineError) {
        self.shared.fail(err);
        for input in self.inputs.lock().iter() {
            input.queue.abort();
        }
    }

    /// Report a failure that happened before this exporter could start.
    pub(crate) fn fail_unstarted(&self, err: &PipelineError) {
        let mut life = self.lifecycle.lock();
        if life.started || life.result.is_some() {
            return;
        }
        life.last_error = Some(err.to_string());
        self.finish(life, ExportResult::Failed);
    }

    /// Drain what was submitted, finalize the output and report the result.
    /// Idempotent: later calls return the result of the first.
    pub fn stop(&self) -> ExportResult {
        let mut life = self.lifecycle.lock();
        if let Some(result) = life.result {
            return result;
        }
        if !life.started {
            log::info!("exporter stopped before start");
            return self.finish(life, ExportResult::Canceled);
        }
        let mode = if life.canceled {
            StopMode::Abort
        } else {
            StopMode::Drain
        };
        let inputs = std::mem::take(&mut *self.inputs.lock());
        if mode == StopMode::Drain && !self.shared.is_aborted() {
            for input in &inputs {
                match self.flush_samples(input) {
                    Ok(()) | Err(PipelineError::DurationReached { .. }) => {}
                    Err(err) => log::warn!("{} tail dropped: {}", input.kind, err),
                }
            }
        }
        let stopped = self.sink.lock().stop(mode);
        let result = match stopped {
            Err(err) => {
                life.last_error = Some(err.to_string());
                ExportResult::Failed
            }
            Ok(()) if life.canceled => ExportResult::Canceled,
            Ok(()) => ExportResult::Succeeded,
        };
        let stats = self.counters.snapshot();
        log::info!(
            "export {}: video {} sent / {} written, audio {} sent / {} written",
            result,
            stats.video.frames_sent,
            stats.video.packets_written,
            stats.audio.frames_sent,
            stats.audio.packets_written
        );
        self.finish(life, result)
    }

    /// Abort instead of draining. Queued frames are discarded.
    pub fn cancel(&self) -> ExportResult {
        {
            let mut life = self.lifecycle.lock();
            if let Some(result) = life.result {
                return result;
            }
            life.canceled = true;
        }
        log::info!("export canceled");
        self.shared.abort();
        for input in self.inputs.lock().iter() {
            input.queue.abort();
        }
        self.stop()
    }

    fn finish(&self, mut life: MutexGuard<'_, Lifecycle>, result: ExportResult) -> ExportResult {
        life.result = Some(result);
        let callback = life.callback.take();
        drop(life);
        if let Some(callback) = callback {
            callback(result);
        }
        result
    }
}

impl Drop for Exporter {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
#[path = "exporter_test.rs"]
mod exporter_test;
