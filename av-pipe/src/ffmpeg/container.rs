use std::path::Path;
use std::sync::Arc;

use ffmpeg_next::codec::Parameters;
use ffmpeg_next::format::context::{Input, Output};
use ffmpeg_next::media::Type;

use super::{NativeParameters, rational, time_base};
use crate::container::{Demuxer, Muxer};
use crate::format::MediaKind;
use crate::packet::Packet;
use crate::stream::{CodecParameters, StreamDescriptor};
use crate::timebase::TimeBase;

pub(super) struct FfmpegDemuxer {
    inner: Option<Input>,
    streams: Vec<StreamDescriptor>,
}

unsafe impl Send for FfmpegDemuxer {}

impl FfmpegDemuxer {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let input = ffmpeg_next::format::input(&path)?;
        let mut streams = Vec::new();
        for stream in input.streams() {
            let parameters = stream.parameters();
            let rate = stream.avg_frame_rate();
            let frame_rate = if rate.denominator() > 0 {
                (rate.numerator() / rate.denominator()).max(0) as u32
            } else {
                0
            };
            let Some(params) = describe(&parameters, frame_rate) else {
                log::debug!("skipping stream {} ({:?})", stream.index(), parameters.medium());
                continue;
            };
            streams.push(
                StreamDescriptor::new(stream.index(), params, time_base(stream.time_base()))
                    .with_backend(Arc::new(NativeParameters(parameters))),
            );
        }
        log::info!("input opened: {} ({} streams)", path.display(), streams.len());
        Ok(Self {
            inner: Some(input),
            streams,
        })
    }
}

/// Codec name and geometry of an input stream. Raw formats are left open;
/// the decoder reports them per frame.
fn describe(parameters: &Parameters, frame_rate: u32) -> Option<CodecParameters> {
    let codec = parameters.id().name().to_string();
    let raw = unsafe { &*parameters.as_ptr() };
    let bit_rate = (raw.bit_rate > 0).then_some(raw.bit_rate as u64);
    match parameters.medium() {
        Type::Video => Some(CodecParameters::Video {
            codec,
            pixel: None,
            width: raw.width.max(0) as u32,
            height: raw.height.max(0) as u32,
            frame_rate,
            bit_rate,
        }),
        Type::Audio => Some(CodecParameters::Audio {
            codec,
            sample: None,
            channels: raw.ch_layout.nb_channels.max(0) as u16,
            sample_rate: raw.sample_rate.max(0) as u32,
            frame_size: raw.frame_size.max(0) as u32,
            bit_rate,
        }),
        _ => None,
    }
}

impl Demuxer for FfmpegDemuxer {
    fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    fn best_stream(&self, kind: MediaKind) -> Option<usize> {
        let medium = match kind {
            MediaKind::Video => Type::Video,
            MediaKind::Audio => Type::Audio,
        };
        let index = self.inner.as_ref()?.streams().best(medium)?.index();
        self.streams
            .iter()
            .any(|s| s.index == index)
            .then_some(index)
    }

    fn read_packet(&mut self, packet: &mut Packet) -> anyhow::Result<bool> {
        let input = self
            .inner
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("input closed"))?;
        let mut native = ffmpeg_next::Packet::empty();
        loop {
            match native.read(input) {
                Ok(()) => {}
                Err(ffmpeg_next::Error::Eof) => return Ok(false),
                Err(err) => return Err(err.into()),
            }
            let index = native.stream();
            let Some(stream) = self.streams.iter().find(|s| s.index == index) else {
                continue;
            };
            packet.clear();
            packet.set_data(native.data().unwrap_or_default());
            packet.set_stream_index(index);
            packet.set_time_base(stream.time_base);
            packet.set_pts(native.pts());
            packet.set_dts(native.dts());
            packet.set_duration(native.duration());
            packet.set_key(native.is_key());
            return Ok(true);
        }
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.inner = None;
        Ok(())
    }
}

pub(super) struct FfmpegMuxer {
    inner: Option<Output>,
    global_header: bool,
    have_written_header: bool,
}

unsafe impl Send for FfmpegMuxer {}

impl FfmpegMuxer {
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        let output = ffmpeg_next::format::output(&path)?;
        let global_header = output
            .format()
            .flags()
            .contains(ffmpeg_next::format::Flags::GLOBAL_HEADER);
        Ok(Self {
            inner: Some(output),
            global_header,
            have_written_header: false,
        })
    }

    fn output(&mut self) -> anyhow::Result<&mut Output> {
        self.inner
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("output closed"))
    }
}

impl Muxer for FfmpegMuxer {
    fn requires_global_header(&self) -> bool {
        self.global_header
    }

    fn add_stream(&mut self, stream: &StreamDescriptor) -> anyhow::Result<usize> {
        let parameters = stream
            .backend::<NativeParameters>()
            .ok_or_else(|| anyhow::anyhow!("{} stream has no codec parameters", stream.kind()))?;
        let output = self.output()?;
        let mut writer_stream = output.add_stream(ffmpeg_next::encoder::find(parameters.0.id()))?;
        writer_stream.set_parameters(parameters.0.clone());
        writer_stream.set_time_base(rational(stream.time_base));
        Ok(writer_stream.index())
    }

    fn write_header(&mut self) -> anyhow::Result<()> {
        self.output()?.write_header()?;
        self.have_written_header = true;
        Ok(())
    }

    fn stream_time_base(&self, index: usize) -> Option<TimeBase> {
        let output = self.inner.as_ref()?;
        output.stream(index).map(|s| time_base(s.time_base()))
    }

    fn write_interleaved(&mut self, packet: &mut Packet) -> anyhow::Result<()> {
        let mut native = ffmpeg_next::Packet::copy(packet.data());
        native.set_stream(packet.stream_index());
        native.set_pts(packet.pts());
        native.set_dts(packet.dts());
        native.set_duration(packet.duration());
        native.set_position(-1);
        if packet.is_key() {
            native.set_flags(ffmpeg_next::packet::Flags::KEY);
        }
        native.write_interleaved(self.output()?)?;
        Ok(())
    }

    fn write_trailer(&mut self) -> anyhow::Result<()> {
        if !self.have_written_header {
            anyhow::bail!("trailer without header");
        }
        self.output()?.write_trailer()?;
        Ok(())
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.inner = None;
        Ok(())
    }
}
