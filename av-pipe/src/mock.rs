//! In-memory codec, container and converter fakes for pipeline tests.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::backend::Backends;
use crate::codec::{CodecFactory, CoderStatus, Decoder, Encoder};
use crate::container::{ContainerFactory, Demuxer, Muxer};
use crate::convert::{ConverterFactory, FrameConverter};
use crate::format::{FrameFormat, MediaKind, PixelFormat, SampleFormat};
use crate::frame::{Frame, FrameView};
use crate::packet::Packet;
use crate::stream::{CodecParameters, EncoderSettings, StreamDescriptor};
use crate::timebase::TimeBase;

pub const VIDEO_INPUT_TB: TimeBase = TimeBase { num: 1, den: 90000 };
pub const AUDIO_INPUT_TB: TimeBase = TimeBase { num: 1, den: 44100 };
/// Time base the fake muxer assigns to video streams on header write.
pub const VIDEO_OUTPUT_TB: TimeBase = TimeBase { num: 1, den: 12800 };

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SentFrame {
    pub kind: MediaKind,
    pub pts: i64,
    pub tag: u8,
    pub nb_samples: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WrittenPacket {
    pub stream: usize,
    pub pts: Option<i64>,
    pub time_base: TimeBase,
    pub tag: u8,
}

#[derive(Default, Debug)]
pub struct MockLog {
    pub frames_sent: Vec<SentFrame>,
    pub packets_written: Vec<WrittenPacket>,
    pub encoder_flushes: Vec<MediaKind>,
    pub encoders_opened: usize,
    pub encoders_closed: usize,
    pub decoder_resets: usize,
    pub decoders_closed: usize,
    pub headers_written: usize,
    pub trailers_written: usize,
    pub muxer_closed: bool,
    pub demuxer_closed: bool,
    pub demux_eof_reads: usize,
}

impl MockLog {
    pub fn sent(&self, kind: MediaKind) -> Vec<SentFrame> {
        self.frames_sent
            .iter()
            .filter(|f| f.kind == kind)
            .copied()
            .collect()
    }

    pub fn written(&self, stream: usize) -> Vec<WrittenPacket> {
        self.packets_written
            .iter()
            .filter(|p| p.stream == stream)
            .copied()
            .collect()
    }
}

pub type SharedLog = Arc<Mutex<MockLog>>;

/// Knobs for one fake pipeline.
#[derive(Clone)]
pub struct MockSetup {
    pub log: SharedLog,
    /// Frames an encoder holds back before emitting packets.
    pub encoder_delay: usize,
    pub encode_pause: Option<Duration>,
    pub fail_encoder_open: bool,
    pub fail_write_after: Option<usize>,
    pub fail_convert: bool,
    /// The decoder of this kind fails on the packet after the given count.
    pub fail_decode_after: Option<(MediaKind, usize)>,
    pub video_packets: usize,
    pub audio_packets: usize,
    /// Video packets the input gains once its first end was read.
    pub appended_video_packets: usize,
}

impl Default for MockSetup {
    fn default() -> Self {
        Self {
            log: SharedLog::default(),
            encoder_delay: 2,
            encode_pause: None,
            fail_encoder_open: false,
            fail_write_after: None,
            fail_convert: false,
            fail_decode_after: None,
            video_packets: 10,
            audio_packets: 6,
            appended_video_packets: 0,
        }
    }
}

impl MockSetup {
    pub fn backends(&self) -> Backends {
        let setup = Arc::new(self.clone());
        Backends::new(setup.clone(), setup.clone(), setup)
    }
}

pub fn video_params() -> CodecParameters {
    CodecParameters::Video {
        codec: "h264".into(),
        pixel: Some(PixelFormat::Yuv420p),
        width: 4,
        height: 4,
        frame_rate: 25,
        bit_rate: None,
    }
}

pub fn audio_params() -> CodecParameters {
    CodecParameters::Audio {
        codec: "aac".into(),
        sample: Some(SampleFormat::S16),
        channels: 2,
        sample_rate: 44100,
        frame_size: 1024,
        bit_rate: None,
    }
}

impl CodecFactory for MockSetup {
    fn open_decoder(&self, stream: &StreamDescriptor) -> anyhow::Result<Box<dyn Decoder>> {
        let format = stream
            .params
            .frame_format()
            .ok_or_else(|| anyhow::anyhow!("stream {} has no raw format", stream.index))?;
        let fail_after = self
            .fail_decode_after
            .and_then(|(kind, after)| (kind == stream.kind()).then_some(after));
        Ok(Box::new(MockDecoder {
            index: stream.index,
            format,
            time_base: stream.time_base,
            pending: VecDeque::new(),
            draining: false,
            fail_after,
            received: 0,
            log: self.log.clone(),
        }))
    }

    fn open_encoder(&self, settings: &EncoderSettings) -> anyhow::Result<Box<dyn Encoder>> {
        if self.fail_encoder_open {
            anyhow::bail!("encoder {} not available", settings.params.codec());
        }
        self.log.lock().encoders_opened += 1;
        Ok(Box::new(MockEncoder {
            settings: settings.clone(),
            delay: self.encoder_delay,
            pause: self.encode_pause,
            pending: VecDeque::new(),
            draining: false,
            short_frame_sent: false,
            log: self.log.clone(),
        }))
    }
}

impl ContainerFactory for MockSetup {
    fn open_input(&self, path: &Path) -> anyhow::Result<Box<dyn Demuxer>> {
        if path.starts_with("/nonexistent") {
            anyhow::bail!("{}: no such file or directory", path.display());
        }
        Ok(Box::new(MockDemuxer::new(
            self.video_packets,
            self.audio_packets,
            self.appended_video_packets,
            self.log.clone(),
        )))
    }

    fn open_output(&self, path: &Path) -> anyhow::Result<Box<dyn Muxer>> {
        if path.starts_with("/nonexistent") {
            anyhow::bail!("{}: permission denied", path.display());
        }
        Ok(Box::new(MockMuxer {
            streams: Vec::new(),
            fail_write_after: self.fail_write_after,
            written: 0,
            log: self.log.clone(),
        }))
    }
}

impl ConverterFactory for MockSetup {
    fn open_converter(&self, _kind: MediaKind) -> anyhow::Result<Box<dyn FrameConverter>> {
        Ok(Box::new(MockConverter {
            fail: self.fail_convert,
        }))
    }
}

struct MockEncoder {
    settings: EncoderSettings,
    delay: usize,
    pause: Option<Duration>,
    pending: VecDeque<Packet>,
    draining: bool,
    /// Only the last audio frame may be shorter than the frame size.
    short_frame_sent: bool,
    log: SharedLog,
}

impl MockEncoder {
    fn check_frame_size(&mut self, frame: &Frame) -> anyhow::Result<()> {
        let CodecParameters::Audio { frame_size, .. } = self.settings.params else {
            return Ok(());
        };
        let samples = frame.nb_samples();
        if samples > frame_size || self.short_frame_sent {
            anyhow::bail!("invalid audio frame of {} samples, frame size {}", samples, frame_size);
        }
        self.short_frame_sent = samples < frame_size;
        Ok(())
    }
}

impl Encoder for MockEncoder {
    fn time_base(&self) -> TimeBase {
        self.settings.time_base
    }

    fn stream_parameters(&self) -> StreamDescriptor {
        StreamDescriptor::new(0, self.settings.params.clone(), self.settings.time_base)
    }

    fn send_frame(&mut self, frame: Option<&Frame>) -> anyhow::Result<CoderStatus> {
        if self.draining {
            return Ok(CoderStatus::EndOfStream);
        }
        let Some(frame) = frame else {
            self.draining = true;
            self.log.lock().encoder_flushes.push(self.settings.params.kind());
            return Ok(CoderStatus::Ok);
        };
        if self.pending.len() > self.delay {
            return Ok(CoderStatus::NeedMoreInput);
        }
        self.check_frame_size(frame)?;
        if let Some(pause) = self.pause {
            std::thread::sleep(pause);
        }
        let tag = frame.data().first().copied().unwrap_or_default();
        self.log.lock().frames_sent.push(SentFrame {
            kind: self.settings.params.kind(),
            pts: frame.pts().unwrap_or(-1),
            tag,
            nb_samples: frame.nb_samples(),
        });
        let mut packet = Packet::new(&[tag], 0, self.settings.time_base);
        packet.set_pts(frame.pts());
        packet.set_dts(frame.pts());
        packet.set_duration(frame.duration());
        self.pending.push_back(packet);
        Ok(CoderStatus::Ok)
    }

    fn receive_packet(&mut self, packet: &mut Packet) -> anyhow::Result<CoderStatus> {
        if self.pending.len() > self.delay || self.draining {
            if let Some(next) = self.pending.pop_front() {
                *packet = next;
                return Ok(CoderStatus::Ok);
            }
        }
        if self.draining {
            Ok(CoderStatus::EndOfStream)
        } else {
            Ok(CoderStatus::NeedMoreInput)
        }
    }

    fn flush(&mut self) {
        self.pending.clear();
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.log.lock().encoders_closed += 1;
        Ok(())
    }
}

struct MockDecoder {
    index: usize,
    format: FrameFormat,
    time_base: TimeBase,
    pending: VecDeque<Frame>,
    draining: bool,
    fail_after: Option<usize>,
    received: usize,
    log: SharedLog,
}

impl Decoder for MockDecoder {
    fn stream_index(&self) -> usize {
        self.index
    }

    fn send_packet(&mut self, packet: Option<&Packet>) -> anyhow::Result<CoderStatus> {
        if self.draining {
            return Ok(CoderStatus::EndOfStream);
        }
        let Some(packet) = packet else {
            self.draining = true;
            return Ok(CoderStatus::Ok);
        };
        if self.pending.len() >= 2 {
            return Ok(CoderStatus::NeedMoreInput);
        }
        if self.fail_after.is_some_and(|after| self.received >= after) {
            anyhow::bail!("corrupt packet on stream {}", self.index);
        }
        self.received += 1;
        let mut frame = Frame::new(self.format);
        if let Some(first) = frame.data_mut().first_mut() {
            *first = packet.data().first().copied().unwrap_or_default();
        }
        frame.set_stream_index(self.index);
        frame.set_time_base(self.time_base);
        frame.set_pts(packet.time_base().rescale_opt(packet.pts(), self.time_base));
        frame.set_duration(packet.time_base().rescale(packet.duration(), self.time_base));
        self.pending.push_back(frame);
        Ok(CoderStatus::Ok)
    }

    fn receive_frame(&mut self, frame: &mut Frame) -> anyhow::Result<CoderStatus> {
        if self.pending.len() > 1 || self.draining {
            if let Some(next) = self.pending.pop_front() {
                *frame = next;
                return Ok(CoderStatus::Ok);
            }
        }
        if self.draining {
            Ok(CoderStatus::EndOfStream)
        } else {
            Ok(CoderStatus::NeedMoreInput)
        }
    }

    fn flush(&mut self) {
        self.pending.clear();
        self.draining = false;
        self.log.lock().decoder_resets += 1;
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.log.lock().decoders_closed += 1;
        Ok(())
    }
}

/// Fake input: video on stream 0, audio on stream 1, and a second video
/// stream 2 that no consumer selects.
struct MockDemuxer {
    streams: Vec<StreamDescriptor>,
    packets: VecDeque<Packet>,
    /// Packets that show up after the first end of input.
    appended: VecDeque<Packet>,
    log: SharedLog,
}

impl MockDemuxer {
    fn new(video: usize, audio: usize, appended: usize, log: SharedLog) -> Self {
        let streams = vec![
            StreamDescriptor::new(0, video_params(), VIDEO_INPUT_TB),
            StreamDescriptor::new(1, audio_params(), AUDIO_INPUT_TB),
            StreamDescriptor::new(2, video_params(), VIDEO_INPUT_TB),
        ];
        let mut packets = VecDeque::new();
        for i in 0..video.max(audio) {
            if i < video {
                packets.push_back(input_packet(0, i, 3600, VIDEO_INPUT_TB));
            }
            if i < audio {
                packets.push_back(input_packet(1, i, 1024, AUDIO_INPUT_TB));
            }
            if i % 4 == 0 {
                packets.push_back(input_packet(2, i, 3600, VIDEO_INPUT_TB));
            }
        }
        let appended = (video..video + appended)
            .map(|i| input_packet(0, i, 3600, VIDEO_INPUT_TB))
            .collect();
        Self {
            streams,
            packets,
            appended,
            log,
        }
    }
}

fn input_packet(stream: usize, i: usize, duration: i64, time_base: TimeBase) -> Packet {
    let mut packet = Packet::new(&[i as u8, 0xAA], stream, time_base);
    packet.set_pts(Some(i as i64 * duration));
    packet.set_dts(Some(i as i64 * duration));
    packet.set_duration(duration);
    packet.set_key(true);
    packet
}

impl Demuxer for MockDemuxer {
    fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    fn read_packet(&mut self, packet: &mut Packet) -> anyhow::Result<bool> {
        match self.packets.pop_front() {
            Some(next) => {
                *packet = next;
                Ok(true)
            }
            None => {
                self.log.lock().demux_eof_reads += 1;
                // the file grows behind the reader
                self.packets.append(&mut self.appended);
                Ok(false)
            }
        }
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.log.lock().demuxer_closed = true;
        Ok(())
    }
}

struct MockMuxer {
    streams: Vec<StreamDescriptor>,
    fail_write_after: Option<usize>,
    written: usize,
    log: SharedLog,
}

impl Muxer for MockMuxer {
    fn requires_global_header(&self) -> bool {
        true
    }

    fn add_stream(&mut self, stream: &StreamDescriptor) -> anyhow::Result<usize> {
        let index = self.streams.len();
        let mut stream = stream.clone();
        stream.index = index;
        self.streams.push(stream);
        Ok(index)
    }

    fn write_header(&mut self) -> anyhow::Result<()> {
        self.log.lock().headers_written += 1;
        Ok(())
    }

    fn stream_time_base(&self, index: usize) -> Option<TimeBase> {
        self.streams.get(index).map(|s| match s.kind() {
            MediaKind::Video => VIDEO_OUTPUT_TB,
            MediaKind::Audio => s.time_base,
        })
    }

    fn write_interleaved(&mut self, packet: &mut Packet) -> anyhow::Result<()> {
        if let Some(limit) = self.fail_write_after {
            if self.written >= limit {
                anyhow::bail!("no space left on device");
            }
        }
        self.written += 1;
        self.log.lock().packets_written.push(WrittenPacket {
            stream: packet.stream_index(),
            pts: packet.pts(),
            time_base: packet.time_base(),
            tag: packet.data().first().copied().unwrap_or_default(),
        });
        Ok(())
    }

    fn write_trailer(&mut self) -> anyhow::Result<()> {
        self.log.lock().trailers_written += 1;
        Ok(())
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.log.lock().muxer_closed = true;
        Ok(())
    }
}

/// Sizes the destination for the target format and copies the leading bytes.
struct MockConverter {
    fail: bool,
}

impl FrameConverter for MockConverter {
    fn convert(
        &mut self,
        src: FrameView<'_>,
        dst: &mut Frame,
        target: FrameFormat,
    ) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("cannot convert {:?}", src.format);
        }
        // audio keeps its sample count, as a resampler at the same rate does
        let target = match (src.format, target) {
            (
                FrameFormat::Audio { nb_samples, .. },
                FrameFormat::Audio {
                    sample,
                    channels,
                    sample_rate,
                    ..
                },
            ) => FrameFormat::audio(sample, channels, sample_rate, nb_samples),
            _ => target,
        };
        dst.allocate(target);
        let n = src.data.len().min(dst.data().len());
        dst.data_mut()[..n].copy_from_slice(&src.data[..n]);
        Ok(())
    }
}
