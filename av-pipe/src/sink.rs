use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::backend::Backends;
use crate::codec::{CodecFactory, CoderStatus, Encoder};
use crate::config::ExportConfig;
use crate::container::{ContainerFactory, Muxer};
use crate::error::{PipelineError, Result};
use crate::format::MediaKind;
use crate::frame::Frame;
use crate::packet::Packet;
use crate::queue::{BoundedQueue, EndMarker};
use crate::stats::{PipelineCounters, StreamCounters};
use crate::status::SharedState;
use crate::stream::EncoderSettings;
use crate::timebase::TimeBase;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkState {
    Idle,
    Opened,
    Encoding,
    Flushing,
    Closed,
}

/// How `stop` ends input on the frame queues.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopMode {
    /// Encode everything already queued, then flush.
    Drain,
    /// Discard queued frames and flush right away.
    Abort,
}

struct Output {
    muxer: Box<dyn Muxer>,
    header_written: bool,
    write_failed: bool,
}

struct Track {
    kind: MediaKind,
    output_index: usize,
    output_time_base: TimeBase,
    queue: Arc<BoundedQueue<Frame>>,
    encoder: Option<Box<dyn Encoder>>,
    worker: Option<JoinHandle<Box<dyn Encoder>>>,
    flushing: Arc<AtomicBool>,
}

/// Encoding half of the pipeline: one encode thread per enabled stream, all
/// writing into a single output container.
pub struct Sink {
    config: ExportConfig,
    codecs: Arc<dyn CodecFactory>,
    containers: Arc<dyn ContainerFactory>,
    shared: Arc<SharedState>,
    counters: Arc<PipelineCounters>,
    output: Option<Arc<Mutex<Output>>>,
    tracks: Vec<Track>,
    state: SinkState,
}

impl Sink {
    pub fn new(config: ExportConfig, backends: &Backends, counters: Arc<PipelineCounters>) -> Self {
        Self {
            config,
            codecs: backends.codecs.clone(),
            containers: backends.containers.clone(),
            shared: Arc::new(SharedState::new("sink")),
            counters,
            output: None,
            tracks: Vec::new(),
            state: SinkState::Idle,
        }
    }

    pub fn state(&self) -> SinkState {
        // flushing once every encoder reached its flush
        if self.state == SinkState::Encoding
            && !self.tracks.is_empty()
            && self.tracks.iter().all(|t| t.flushing.load(Ordering::Acquire))
        {
            return SinkState::Flushing;
        }
        self.state
    }

    /// Whether the encoder of `kind` has started flushing.
    pub fn is_flushing(&self, kind: MediaKind) -> bool {
        self.tracks
            .iter()
            .any(|t| t.kind == kind && t.flushing.load(Ordering::Acquire))
    }

    pub fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }

    /// Frame queue feeding the encoder of `kind`.
    pub fn queue(&self, kind: MediaKind) -> Option<Arc<BoundedQueue<Frame>>> {
        self.tracks
            .iter()
            .find(|t| t.kind == kind)
            .map(|t| t.queue.clone())
    }

    /// Open the output container and one encoder per enabled stream, then
    /// write the header.
    pub fn open(&mut self) -> Result<()> {
        if self.state != SinkState::Idle {
            return Err(PipelineError::InvalidState(format!(
                "sink cannot open in state {:?}",
                self.state
            )));
        }
        let path = self.config.output.clone();
        log::info!("open output {}", path.display());
        let muxer = self
            .containers
            .open_output(&path)
            .map_err(|e| PipelineError::io(format!("opening output {}", path.display()), e))?;
        let output = Arc::new(Mutex::new(Output {
            muxer,
            header_written: false,
            write_failed: false,
        }));
        self.output = Some(output.clone());

        if let Err(err) = self.open_streams(&output) {
            self.teardown();
            self.state = SinkState::Closed;
            return Err(err);
        }
        self.state = SinkState::Opened;
        Ok(())
    }

    fn open_streams(&mut self, output: &Mutex<Output>) -> Result<()> {
        let mut out = output.lock();
        for kind in self.config.enabled_kinds() {
            let settings = EncoderSettings {
                params: self.config.codec_parameters(kind),
                time_base: self.config.time_base(kind),
                global_header: out.muxer.requires_global_header(),
            };
            let mut encoder = self.codecs.open_encoder(&settings).map_err(|e| {
                PipelineError::resource(
                    format!("opening {} encoder {}", kind, settings.params.codec()),
                    e,
                )
            })?;
            let output_index = match out.muxer.add_stream(&encoder.stream_parameters()) {
                Ok(index) => index,
                Err(e) => {
                    let _ = encoder.close();
                    return Err(PipelineError::resource(format!("adding {} stream", kind), e));
                }
            };
            self.tracks.push(Track {
                kind,
                output_index,
                output_time_base: settings.time_base,
                queue: Arc::new(BoundedQueue::new(
                    format!("{}-frames", kind),
                    self.config.queue_capacity,
                )),
                encoder: Some(encoder),
                worker: None,
                flushing: Arc::new(AtomicBool::new(false)),
            });
        }

        out.muxer
            .write_header()
            .map_err(|e| PipelineError::io("writing header", e))?;
        out.header_written = true;

        // the muxer may pick its own stream time bases on header write
        for track in &mut self.tracks {
            if let Some(time_base) = out.muxer.stream_time_base(track.output_index) {
                track.output_time_base = time_base;
            }
            log::info!(
                "output stream {}: {}, time_base {}",
                track.output_index,
                track.kind,
                track.output_time_base
            );
        }
        Ok(())
    }

    /// Start one encode thread per stream.
    pub fn start(&mut self) -> Result<()> {
        if self.state != SinkState::Opened {
            return Err(PipelineError::InvalidState(format!(
                "sink cannot start in state {:?}",
                self.state
            )));
        }
        let output = self
            .output
            .clone()
            .ok_or_else(|| PipelineError::InvalidState("output not open".into()))?;
        let queues: Vec<_> = self.tracks.iter().map(|t| t.queue.clone()).collect();
        self.state = SinkState::Encoding;

        for track in &mut self.tracks {
            let Some(encoder) = track.encoder.take() else {
                continue;
            };
            let worker = EncodeWorker {
                kind: track.kind,
                encoder,
                queue: track.queue.clone(),
                siblings: queues.clone(),
                output: output.clone(),
                output_index: track.output_index,
                output_time_base: track.output_time_base,
                frame_time_base: self.config.time_base(track.kind),
                shared: self.shared.clone(),
                counters: self.counters.for_kind(track.kind).clone(),
                flushing: track.flushing.clone(),
                next_pts: 0,
                packet: Packet::default(),
            };
            let name = format!("encode-{}", track.kind);
            let handle = std::thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker.run())
                .map_err(|e| PipelineError::resource(format!("spawning {}", name), e))?;
            track.worker = Some(handle);
        }
        Ok(())
    }

    /// End input, join the encode threads, write the trailer, release the
    /// encoders and close the output, in that order. Returns the first fatal
    /// error of the run.
    pub fn stop(&mut self, mode: StopMode) -> Result<()> {
        match self.state {
            SinkState::Closed => return Ok(()),
            SinkState::Idle => {
                self.state = SinkState::Closed;
                return Ok(());
            }
            _ => {}
        }
        log::info!("stop sink ({:?})", mode);
        self.shared.abort();
        for track in &self.tracks {
            match mode {
                StopMode::Drain => track.queue.finish(),
                StopMode::Abort => track.queue.abort(),
            }
        }
        for track in &mut self.tracks {
            if let Some(worker) = track.worker.take() {
                match worker.join() {
                    Ok(encoder) => track.encoder = Some(encoder),
                    Err(_) => self.shared.fail(PipelineError::codec(
                        format!("joining encode-{}", track.kind),
                        anyhow::anyhow!("thread panicked"),
                    )),
                }
            }
        }
        self.teardown();
        self.state = SinkState::Closed;
        match self.shared.take_failure() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn teardown(&mut self) {
        let Some(output) = self.output.take() else {
            self.close_encoders();
            return;
        };
        let mut out = output.lock();
        if out.write_failed {
            log::warn!("skip trailer after write failure");
        } else if out.header_written {
            if let Err(e) = out.muxer.write_trailer() {
                self.shared.fail(PipelineError::io("writing trailer", e));
            }
        }
        self.close_encoders();
        if let Err(e) = out.muxer.close() {
            self.shared.fail(PipelineError::io("closing output", e));
        }
        log::info!("output {} closed", self.config.output.display());
    }

    fn close_encoders(&mut self) {
        for track in &mut self.tracks {
            if let Some(mut encoder) = track.encoder.take() {
                if let Err(e) = encoder.close() {
                    log::warn!("close {} encoder: {:#}", track.kind, e);
                }
            }
        }
    }
}

impl Drop for Sink {
    fn drop(&mut self) {
        if self.state != SinkState::Closed {
            let _ = self.stop(StopMode::Abort);
        }
    }
}

/// State owned by one encode thread.
struct EncodeWorker {
    kind: MediaKind,
    encoder: Box<dyn Encoder>,
    queue: Arc<BoundedQueue<Frame>>,
    siblings: Vec<Arc<BoundedQueue<Frame>>>,
    output: Arc<Mutex<Output>>,
    output_index: usize,
    output_time_base: TimeBase,
    /// `1/fps` for video, `1/sample_rate` for audio.
    frame_time_base: TimeBase,
    shared: Arc<SharedState>,
    counters: Arc<StreamCounters>,
    flushing: Arc<AtomicBool>,
    next_pts: i64,
    packet: Packet,
}

impl EncodeWorker {
    fn run(mut self) -> Box<dyn Encoder> {
        log::info!(
            "encode {} loop started, output stream {}",
            self.kind,
            self.output_index
        );
        if let Err(err) = self.encode() {
            if err.is_fatal() {
                self.shared.fail(err);
            } else {
                log::debug!("encode {} stopped: {}", self.kind, err);
            }
            for queue in &self.siblings {
                queue.abort();
            }
        }
        let stats = self.counters.snapshot();
        log::info!(
            "encode {} loop finished, {} frames sent, {} packets written",
            self.kind,
            stats.frames_sent,
            stats.packets_written
        );
        self.encoder
    }

    fn encode(&mut self) -> Result<()> {
        loop {
            if self.receive_ready()? == CoderStatus::EndOfStream {
                return Ok(());
            }
            let Some(frame) = self.queue.get() else {
                break;
            };
            if frame.is_end_marker() {
                self.queue.release(frame);
                break;
            }
            self.send(frame)?;
        }
        self.flush()
    }

    /// Write every packet the encoder has ready. Returns the status that
    /// ended the run of packets.
    fn receive_ready(&mut self) -> Result<CoderStatus> {
        loop {
            let status = self
                .encoder
                .receive_packet(&mut self.packet)
                .map_err(|e| PipelineError::codec(format!("receiving {} packet", self.kind), e))?;
            match status {
                CoderStatus::Ok => self.write_packet()?,
                other => return Ok(other),
            }
        }
    }

    fn send(&mut self, mut frame: Frame) -> Result<()> {
        let advance = match self.kind {
            MediaKind::Video => 1,
            MediaKind::Audio => frame.nb_samples().max(1) as i64,
        };
        frame.set_time_base(self.frame_time_base);
        frame.set_pts(Some(self.next_pts));
        frame.set_duration(advance);
        frame.rescale_to(self.encoder.time_base());
        self.next_pts += advance;

        let sent = self.send_frame(&frame);
        self.queue.release(frame);
        sent?;
        self.counters.frames_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        loop {
            let status = self
                .encoder
                .send_frame(Some(frame))
                .map_err(|e| PipelineError::codec(format!("sending {} frame", self.kind), e))?;
            match status {
                CoderStatus::Ok => return Ok(()),
                CoderStatus::NeedMoreInput => {
                    let before = self.counters.packets_received.load(Ordering::Relaxed);
                    self.receive_ready()?;
                    if self.counters.packets_received.load(Ordering::Relaxed) == before {
                        return Err(PipelineError::codec(
                            format!("sending {} frame", self.kind),
                            anyhow::anyhow!("encoder refused input with no pending output"),
                        ));
                    }
                }
                CoderStatus::EndOfStream => {
                    return Err(PipelineError::codec(
                        format!("sending {} frame", self.kind),
                        anyhow::anyhow!("encoder already flushed"),
                    ));
                }
            }
        }
    }

    fn flush(&mut self) -> Result<()> {
        self.flushing.store(true, Ordering::Release);
        log::info!("encode {} flushing", self.kind);
        self.encoder
            .send_frame(None)
            .map_err(|e| PipelineError::codec(format!("flushing {} encoder", self.kind), e))?;
        if self.receive_ready()? == CoderStatus::NeedMoreInput {
            log::warn!("{} encoder asked for input while flushing", self.kind);
        }
        self.encoder.flush();
        Ok(())
    }

    fn write_packet(&mut self) -> Result<()> {
        self.counters.packets_received.fetch_add(1, Ordering::Relaxed);
        self.packet.rescale_ts(self.output_time_base);
        self.packet.set_stream_index(self.output_index);
        log::debug!("encode {} write {}", self.kind, self.packet);

        let mut out = self.output.lock();
        if out.write_failed {
            return Err(PipelineError::Aborted);
        }
        if let Err(e) = out.muxer.write_interleaved(&mut self.packet) {
            out.write_failed = true;
            return Err(PipelineError::io(format!("writing {} packet", self.kind), e));
        }
        drop(out);
        self.counters.packets_written.fetch_add(1, Ordering::Relaxed);
        self.packet.clear();
        Ok(())
    }
}

#[cfg(test)]
#[path = "sink_test.rs"]
mod sink_test;
