use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;

use crate::backend::Backends;
use crate::codec::{CodecFactory, CoderStatus, Decoder};
use crate::config::SourceConfig;
use crate::container::{ContainerFactory, Demuxer};
use crate::error::{PipelineError, Result};
use crate::format::MediaKind;
use crate::frame::Frame;
use crate::packet::Packet;
use crate::producer::Producer;
use crate::queue::{BoundedQueue, EndMarker};
use crate::status::{SharedState, StageStatus};
use crate::stream::StreamDescriptor;
use crate::timebase::TimeBase;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceState {
    Idle,
    Opened,
    Reading,
    Draining,
    Closed,
}

struct Track {
    kind: MediaKind,
    stream: StreamDescriptor,
    packets: Arc<BoundedQueue<Packet>>,
    frames: Arc<BoundedQueue<Frame>>,
    decoder: Option<Box<dyn Decoder>>,
    worker: Option<JoinHandle<Box<dyn Decoder>>>,
    ended: AtomicBool,
    current: Option<Frame>,
}

/// Decoding half of the pipeline: a demux thread feeding one decode thread
/// per selected stream.
pub struct Source {
    config: SourceConfig,
    codecs: Arc<dyn CodecFactory>,
    containers: Arc<dyn ContainerFactory>,
    shared: Arc<SharedState>,
    streams: Vec<StreamDescriptor>,
    demuxer: Option<Box<dyn Demuxer>>,
    demux_worker: Option<JoinHandle<Box<dyn Demuxer>>>,
    packets_read: Arc<AtomicU64>,
    tracks: Vec<Track>,
    state: SourceState,
}

/// Aborts a running [`Source`] from another thread.
#[derive(Clone)]
pub struct SourceCanceller {
    shared: Arc<SharedState>,
    packets: Vec<Arc<BoundedQueue<Packet>>>,
    frames: Vec<Arc<BoundedQueue<Frame>>>,
}

impl SourceCanceller {
    pub fn cancel(&self) {
        self.shared.abort();
        for queue in &self.packets {
            queue.abort();
        }
        for queue in &self.frames {
            queue.abort();
        }
    }
}

impl Source {
    pub fn new(config: SourceConfig, backends: &Backends) -> Self {
        Self {
            config,
            codecs: backends.codecs.clone(),
            containers: backends.containers.clone(),
            shared: Arc::new(SharedState::new("source")),
            streams: Vec::new(),
            demuxer: None,
            demux_worker: None,
            packets_read: Arc::new(AtomicU64::new(0)),
            tracks: Vec::new(),
            state: SourceState::Idle,
        }
    }

    pub fn state(&self) -> SourceState {
        if self.state == SourceState::Reading
            && self.shared.status().contains(StageStatus::READ_END)
        {
            return SourceState::Draining;
        }
        self.state
    }

    pub fn status(&self) -> StageStatus {
        self.shared.status()
    }

    /// Every stream of the input, selected or not.
    pub fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    /// The stream decoded for `kind`.
    pub fn selected(&self, kind: MediaKind) -> Option<&StreamDescriptor> {
        self.track(kind).map(|t| &t.stream)
    }

    pub fn packets_read(&self) -> u64 {
        self.packets_read.load(Ordering::Relaxed)
    }

    pub fn frame_queue(&self, kind: MediaKind) -> Option<Arc<BoundedQueue<Frame>>> {
        self.track(kind).map(|t| t.frames.clone())
    }

    pub fn canceller(&self) -> SourceCanceller {
        SourceCanceller {
            shared: self.shared.clone(),
            packets: self.tracks.iter().map(|t| t.packets.clone()).collect(),
            frames: self.tracks.iter().map(|t| t.frames.clone()).collect(),
        }
    }

    fn track(&self, kind: MediaKind) -> Option<&Track> {
        self.tracks.iter().find(|t| t.kind == kind)
    }

    fn track_mut(&mut self, kind: MediaKind) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|t| t.kind == kind)
    }

    /// Open the input, pick the best stream of each enabled kind and open a
    /// decoder for it.
    pub fn open(&mut self) -> Result<()> {
        if self.state != SourceState::Idle {
            return Err(PipelineError::InvalidState(format!(
                "source cannot open in state {:?}",
                self.state
            )));
        }
        self.config.validate()?;
        let path = self.config.input.clone();
        log::info!("open input {}", path.display());
        let mut demuxer = self
            .containers
            .open_input(&path)
            .map_err(|e| PipelineError::io(format!("opening input {}", path.display()), e))?;
        self.streams = demuxer.streams().to_vec();
        for stream in &self.streams {
            log::info!(
                "input stream {}: {:?}, time_base {}",
                stream.index,
                stream.params,
                stream.time_base
            );
        }

        if let Err(err) = self.open_tracks(&*demuxer) {
            self.close_decoders();
            if let Err(e) = demuxer.close() {
                log::warn!("close input: {:#}", e);
            }
            self.state = SourceState::Closed;
            return Err(err);
        }
        self.demuxer = Some(demuxer);
        self.state = SourceState::Opened;
        Ok(())
    }

    fn open_tracks(&mut self, demuxer: &dyn Demuxer) -> Result<()> {
        for kind in [MediaKind::Video, MediaKind::Audio] {
            if !self.config.is_enabled(kind) {
                continue;
            }
            let Some(index) = demuxer.best_stream(kind) else {
                log::info!("input has no {} stream", kind);
                continue;
            };
            let stream = self
                .streams
                .iter()
                .find(|s| s.index == index)
                .cloned()
                .ok_or_else(|| {
                    PipelineError::InvalidState(format!("stream {} not listed", index))
                })?;
            let decoder = self.codecs.open_decoder(&stream).map_err(|e| {
                PipelineError::resource(
                    format!("opening {} decoder {}", kind, stream.params.codec()),
                    e,
                )
            })?;
            self.tracks.push(Track {
                kind,
                packets: Arc::new(BoundedQueue::new(
                    format!("{}-packets", kind),
                    self.config.packet_queue_capacity,
                )),
                frames: Arc::new(BoundedQueue::new(
                    format!("{}-frames", kind),
                    self.config.frame_queue_capacity,
                )),
                stream,
                decoder: Some(decoder),
                worker: None,
                ended: AtomicBool::new(false),
                current: None,
            });
        }
        if self.tracks.is_empty() {
            return Err(PipelineError::InvalidInput(
                "input has no stream to decode".into(),
            ));
        }
        Ok(())
    }

    /// Start the demux thread and one decode thread per selected stream.
    pub fn start(&mut self) -> Result<()> {
        if self.state != SourceState::Opened {
            return Err(PipelineError::InvalidState(format!(
                "source cannot start in state {:?}",
                self.state
            )));
        }
        let demuxer = self
            .demuxer
            .take()
            .ok_or_else(|| PipelineError::InvalidState("input not open".into()))?;
        self.state = SourceState::Reading;
        let canceller = self.canceller();

        for track in &mut self.tracks {
            let Some(decoder) = track.decoder.take() else {
                continue;
            };
            let worker = DecodeWorker {
                kind: track.kind,
                stream_index: track.stream.index,
                decoder,
                packets: track.packets.clone(),
                frames: track.frames.clone(),
                shared: self.shared.clone(),
                canceller: canceller.clone(),
                decoded: 0,
                flushed: false,
            };
            let name = format!("decode-{}", track.kind);
            let handle = std::thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker.run())
                .map_err(|e| PipelineError::resource(format!("spawning {}", name), e))?;
            track.worker = Some(handle);
        }

        let worker = DemuxWorker {
            demuxer,
            routes: self
                .tracks
                .iter()
                .map(|t| (t.stream.index, t.packets.clone()))
                .collect(),
            shared: self.shared.clone(),
            canceller,
            packets_read: self.packets_read.clone(),
        };
        let handle = std::thread::Builder::new()
            .name("demux".into())
            .spawn(move || worker.run())
            .map_err(|e| PipelineError::resource("spawning demux", e))?;
        self.demux_worker = Some(handle);
        Ok(())
    }

    /// Let a demux thread parked at end of input read again, for an input
    /// that grew. Every stream resumes and ends with a new marker at the next
    /// end of input. Call it once the end of every stream was consumed.
    pub fn request_continue(&self) {
        for track in &self.tracks {
            track.ended.store(false, Ordering::Release);
        }
        self.shared.request_continue();
    }

    /// Next decoded frame of `kind` with a millisecond timestamp. None once
    /// the stream ended or the source was stopped.
    pub fn next_frame(&self, kind: MediaKind) -> Option<Frame> {
        let track = self.track(kind)?;
        if track.ended.load(Ordering::Acquire) {
            return None;
        }
        let frame = track.frames.get()?;
        if frame.is_end_marker() {
            track.ended.store(true, Ordering::Release);
            track.frames.release(frame);
            return None;
        }
        Some(frame)
    }

    /// Hand a frame from `next_frame` back for buffer reuse.
    pub fn release_frame(&self, kind: MediaKind, frame: Frame) {
        if let Some(track) = self.track(kind) {
            track.frames.release(frame);
        }
    }

    /// Abort every thread, join them, close the decoders and then the input.
    /// Returns the first fatal error of the run.
    pub fn stop(&mut self) -> Result<()> {
        match self.state {
            SourceState::Closed => return Ok(()),
            SourceState::Idle => {
                self.state = SourceState::Closed;
                return Ok(());
            }
            _ => {}
        }
        log::info!("stop source");
        self.canceller().cancel();

        if let Some(worker) = self.demux_worker.take() {
            match worker.join() {
                Ok(demuxer) => self.demuxer = Some(demuxer),
                Err(_) => self.shared.fail(PipelineError::io(
                    "joining demux",
                    anyhow::anyhow!("thread panicked"),
                )),
            }
        }
        for track in &mut self.tracks {
            if let Some(worker) = track.worker.take() {
                match worker.join() {
                    Ok(decoder) => track.decoder = Some(decoder),
                    Err(_) => self.shared.fail(PipelineError::codec(
                        format!("joining decode-{}", track.kind),
                        anyhow::anyhow!("thread panicked"),
                    )),
                }
            }
            if let Some(frame) = track.current.take() {
                track.frames.release(frame);
            }
        }

        self.close_decoders();
        if let Some(mut demuxer) = self.demuxer.take() {
            if let Err(e) = demuxer.close() {
                self.shared.fail(PipelineError::io("closing input", e));
            }
        }
        self.state = SourceState::Closed;
        log::info!("input closed after {} packets", self.packets_read());
        match self.shared.take_failure() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn close_decoders(&mut self) {
        for track in &mut self.tracks {
            if let Some(mut decoder) = track.decoder.take() {
                if let Err(e) = decoder.close() {
                    log::warn!("close {} decoder: {:#}", track.kind, e);
                }
            }
        }
    }
}

impl Producer for Source {
    /// Advance the video stream until the current frame covers `clock_ms`.
    /// After the stream ends the last frame keeps being returned.
    fn get_image(&mut self, clock_ms: i64) -> Result<Option<&Frame>> {
        let Some(track) = self.track_mut(MediaKind::Video) else {
            return Ok(None);
        };
        loop {
            if let Some(current) = &track.current {
                let end = current.pts().unwrap_or_default() + current.duration().max(1);
                if end > clock_ms {
                    break;
                }
            }
            if track.ended.load(Ordering::Acquire) {
                break;
            }
            match track.frames.get() {
                Some(frame) if frame.is_end_marker() => {
                    track.ended.store(true, Ordering::Release);
                    track.frames.release(frame);
                }
                Some(frame) => {
                    if let Some(old) = track.current.replace(frame) {
                        track.frames.release(old);
                    }
                }
                None => break,
            }
        }
        Ok(track.current.as_ref())
    }

    fn get_sample(&mut self) -> Result<Option<&Frame>> {
        let Some(track) = self.track_mut(MediaKind::Audio) else {
            return Ok(None);
        };
        if let Some(old) = track.current.take() {
            track.frames.release(old);
        }
        if track.ended.load(Ordering::Acquire) {
            return Ok(None);
        }
        match track.frames.get() {
            Some(frame) if frame.is_end_marker() => {
                track.ended.store(true, Ordering::Release);
                track.frames.release(frame);
                Ok(None)
            }
            Some(frame) => {
                track.current = Some(frame);
                Ok(track.current.as_ref())
            }
            None => Ok(None),
        }
    }
}

impl Drop for Source {
    fn drop(&mut self) {
        if self.state != SourceState::Closed {
            let _ = self.stop();
        }
    }
}

struct DemuxWorker {
    demuxer: Box<dyn Demuxer>,
    routes: Vec<(usize, Arc<BoundedQueue<Packet>>)>,
    shared: Arc<SharedState>,
    canceller: SourceCanceller,
    packets_read: Arc<AtomicU64>,
}

impl DemuxWorker {
    fn run(mut self) -> Box<dyn Demuxer> {
        log::info!("demux loop started, {} streams selected", self.routes.len());
        if let Err(err) = self.demux() {
            self.shared.fail(err);
        }
        // decoders and consumers must not wait on a reader that is gone
        if self.shared.is_aborted() {
            self.canceller.cancel();
        }
        log::info!(
            "demux loop finished, {} packets read",
            self.packets_read.load(Ordering::Relaxed)
        );
        self.demuxer
    }

    fn demux(&mut self) -> Result<()> {
        let mut packet = Packet::default();
        loop {
            if self.shared.is_aborted() {
                return Ok(());
            }
            let more = self
                .demuxer
                .read_packet(&mut packet)
                .map_err(|e| PipelineError::io("reading input packet", e))?;
            if !more {
                if self.shared.mark(StageStatus::READ_END) {
                    log::info!("demux reached end of input");
                    for (index, queue) in &self.routes {
                        queue.put_end_marker(*index);
                    }
                }
                if !self.shared.wait_continue() {
                    return Ok(());
                }
                for (_, queue) in &self.routes {
                    queue.rearm();
                }
                self.shared.clear(StageStatus::READ_END);
                log::info!("demux resumed");
                continue;
            }

            self.packets_read.fetch_add(1, Ordering::Relaxed);
            let index = packet.stream_index();
            let Some((_, queue)) = self.routes.iter().find(|(i, _)| *i == index) else {
                packet.clear();
                continue;
            };
            packet.rescale_ts(TimeBase::MILLIS);
            log::debug!("demux {}", packet);
            let mut spare = queue.acquire();
            spare.clear();
            let routed = std::mem::replace(&mut packet, spare);
            if !queue.put(routed) {
                if self.shared.is_aborted() {
                    return Ok(());
                }
                log::warn!("dropping packet of stream {}: queue closed", index);
            }
        }
    }
}

struct DecodeWorker {
    kind: MediaKind,
    stream_index: usize,
    decoder: Box<dyn Decoder>,
    packets: Arc<BoundedQueue<Packet>>,
    frames: Arc<BoundedQueue<Frame>>,
    shared: Arc<SharedState>,
    canceller: SourceCanceller,
    decoded: u64,
    /// Set after the end marker until the stream resumes.
    flushed: bool,
}

impl DecodeWorker {
    fn run(mut self) -> Box<dyn Decoder> {
        log::info!("decode {} loop started, stream {}", self.kind, self.stream_index);
        if let Err(err) = self.decode() {
            if err.is_fatal() {
                self.shared.fail(err);
            } else {
                log::debug!("decode {} stopped: {}", self.kind, err);
            }
            self.packets.abort();
            self.frames.abort();
        }
        if self.shared.is_aborted() {
            self.canceller.cancel();
        }
        log::info!(
            "decode {} loop finished, {} frames",
            self.kind,
            self.decoded
        );
        self.decoder
    }

    fn decode(&mut self) -> Result<()> {
        loop {
            let Some(packet) = self.packets.get() else {
                return Ok(());
            };
            if packet.is_end_marker() {
                self.packets.release(packet);
                self.finish()?;
                // park until the input grows or the source stops
                continue;
            }
            if self.flushed {
                self.resume();
            }
            let sent = self.send(&packet);
            self.packets.release(packet);
            sent?;
        }
    }

    fn send(&mut self, packet: &Packet) -> Result<()> {
        loop {
            let status = self
                .decoder
                .send_packet(Some(packet))
                .map_err(|e| PipelineError::codec(format!("sending {} packet", self.kind), e))?;
            match status {
                CoderStatus::Ok | CoderStatus::EndOfStream => {
                    self.receive_ready()?;
                    return Ok(());
                }
                CoderStatus::NeedMoreInput => {
                    if self.receive_ready()? == 0 {
                        return Err(PipelineError::codec(
                            format!("sending {} packet", self.kind),
                            anyhow::anyhow!("decoder refused input with no pending output"),
                        ));
                    }
                }
            }
        }
    }

    /// Push every frame the decoder has ready. Returns how many were pushed.
    fn receive_ready(&mut self) -> Result<usize> {
        let mut count = 0;
        while self.receive_one()? == CoderStatus::Ok {
            count += 1;
        }
        Ok(count)
    }

    fn receive_one(&mut self) -> Result<CoderStatus> {
        let mut frame = self.frames.acquire();
        frame.reset();
        let status = self
            .decoder
            .receive_frame(&mut frame)
            .map_err(|e| PipelineError::codec(format!("receiving {} frame", self.kind), e))?;
        if status != CoderStatus::Ok {
            self.frames.release(frame);
            return Ok(status);
        }
        frame.rescale_to(TimeBase::MILLIS);
        frame.set_stream_index(self.stream_index);
        self.decoded += 1;
        if !self.frames.put(frame) {
            return Err(PipelineError::Aborted);
        }
        Ok(CoderStatus::Ok)
    }

    fn finish(&mut self) -> Result<()> {
        log::info!("decode {} draining", self.kind);
        self.decoder
            .send_packet(None)
            .map_err(|e| PipelineError::codec(format!("draining {} decoder", self.kind), e))?;
        loop {
            match self.receive_one()? {
                CoderStatus::Ok => {}
                CoderStatus::EndOfStream => break,
                CoderStatus::NeedMoreInput => {
                    log::warn!("{} decoder asked for input while draining", self.kind);
                    break;
                }
            }
        }
        self.decoder.flush();
        self.shared.mark(StageStatus::decode_end(self.kind));
        self.frames.put_end_marker(self.stream_index);
        self.flushed = true;
        Ok(())
    }

    fn resume(&mut self) {
        log::info!("decode {} resumed", self.kind);
        self.frames.rearm();
        self.shared.clear(StageStatus::decode_end(self.kind));
        self.flushed = false;
    }
}

#[cfg(test)]
#[path = "source_test.rs"]
mod source_test;
