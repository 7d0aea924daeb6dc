use std::sync::Arc;

use ffmpeg_next::codec::Parameters;
use ffmpeg_next::format::{Pixel, Sample};
use ffmpeg_next::{Dictionary, Rational, frame};

use super::scaler::{Resampler, Scaler, layout};
use super::{
    NativeParameters, fill_video, packed, pixel, pixel_from, rational, read_video, sample,
    sample_from, status, time_base,
};
use crate::codec::{CoderStatus, Decoder, Encoder};
use crate::format::{FrameFormat, MediaKind, PixelFormat, SampleFormat};
use crate::frame::Frame;
use crate::packet::Packet;
use crate::stream::{CodecParameters, EncoderSettings, StreamDescriptor};
use crate::timebase::TimeBase;

enum DecoderType {
    Video(ffmpeg_next::codec::decoder::Video),
    Audio(ffmpeg_next::codec::decoder::Audio),
}

pub(super) struct FfmpegDecoder {
    index: usize,
    inner: Option<DecoderType>,
    time_base: TimeBase,
    video: frame::Video,
    audio: frame::Audio,
    scaler: Option<Scaler>,
    resampler: Option<Resampler>,
}

unsafe impl Send for FfmpegDecoder {}

impl FfmpegDecoder {
    pub fn new(stream: &StreamDescriptor) -> anyhow::Result<Self> {
        let params = stream
            .backend::<NativeParameters>()
            .ok_or_else(|| anyhow::anyhow!("stream {} has no codec parameters", stream.index))?;
        let mut ctx = ffmpeg_next::codec::Context::from_parameters(params.0.clone())?;
        unsafe {
            (*ctx.as_mut_ptr()).pkt_timebase = rational(stream.time_base).into();
        }
        let inner = match stream.kind() {
            MediaKind::Video => {
                let decoder = ctx.decoder().video()?;
                if decoder.format() == Pixel::None || decoder.width() == 0 || decoder.height() == 0
                {
                    anyhow::bail!("missing codec parameters");
                }
                DecoderType::Video(decoder)
            }
            MediaKind::Audio => DecoderType::Audio(ctx.decoder().audio()?),
        };
        log::info!(
            "decoder opened: stream {} {} ({})",
            stream.index,
            stream.params.codec(),
            stream.time_base
        );
        Ok(Self {
            index: stream.index,
            inner: Some(inner),
            time_base: stream.time_base,
            video: frame::Video::empty(),
            audio: frame::Audio::empty(),
            scaler: None,
            resampler: None,
        })
    }
}

impl Decoder for FfmpegDecoder {
    fn stream_index(&self) -> usize {
        self.index
    }

    fn send_packet(&mut self, packet: Option<&Packet>) -> anyhow::Result<CoderStatus> {
        let inner = self
            .inner
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("decoder closed"))?;
        let Some(packet) = packet else {
            return status(match inner {
                DecoderType::Video(d) => d.send_eof(),
                DecoderType::Audio(d) => d.send_eof(),
            });
        };
        let mut native = ffmpeg_next::Packet::copy(packet.data());
        let from = packet.time_base();
        native.set_pts(from.rescale_opt(packet.pts(), self.time_base));
        native.set_dts(from.rescale_opt(packet.dts(), self.time_base));
        native.set_duration(from.rescale(packet.duration(), self.time_base));
        if packet.is_key() {
            native.set_flags(ffmpeg_next::packet::Flags::KEY);
        }
        status(match inner {
            DecoderType::Video(d) => d.send_packet(&native),
            DecoderType::Audio(d) => d.send_packet(&native),
        })
    }

    fn receive_frame(&mut self, frame: &mut Frame) -> anyhow::Result<CoderStatus> {
        let inner = self
            .inner
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("decoder closed"))?;
        let received = match inner {
            DecoderType::Video(d) => {
                let received = status(d.receive_frame(&mut self.video))?;
                if received == CoderStatus::Ok {
                    copy_video(&self.video, &mut self.scaler, frame)?;
                    frame.set_pts(self.video.timestamp().or(self.video.pts()));
                    frame.set_duration(self.video.packet().duration);
                }
                received
            }
            DecoderType::Audio(d) => {
                let received = status(d.receive_frame(&mut self.audio))?;
                if received == CoderStatus::Ok {
                    copy_audio(&self.audio, &mut self.resampler, frame)?;
                    frame.set_pts(self.audio.timestamp().or(self.audio.pts()));
                    frame.set_duration(self.audio.samples() as i64);
                }
                received
            }
        };
        if received == CoderStatus::Ok {
            frame.set_stream_index(self.index);
            frame.set_time_base(self.time_base);
        }
        Ok(received)
    }

    fn flush(&mut self) {
        match self.inner.as_mut() {
            Some(DecoderType::Video(d)) => d.flush(),
            Some(DecoderType::Audio(d)) => d.flush(),
            None => {}
        }
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.inner = None;
        Ok(())
    }
}

/// Images in a format the pipeline has no name for are scaled to yuv420p.
fn copy_video(
    src: &frame::Video,
    scaler: &mut Option<Scaler>,
    dst: &mut Frame,
) -> anyhow::Result<()> {
    let (width, height) = (src.width(), src.height());
    match pixel_from(src.format()) {
        Some(native) => {
            let format = FrameFormat::video(native, width, height);
            dst.allocate(format);
            read_video(src, dst.data_mut(), format);
        }
        None => {
            let format = FrameFormat::video(PixelFormat::Yuv420p, width, height);
            let mut converted = frame::Video::empty();
            Scaler::ensure(
                scaler,
                (src.format(), width, height, Pixel::YUV420P, width, height),
            )?
            .run(src, &mut converted)?;
            dst.allocate(format);
            read_video(&converted, dst.data_mut(), format);
        }
    }
    Ok(())
}

/// Planar audio is interleaved on the way out.
fn copy_audio(
    src: &frame::Audio,
    resampler: &mut Option<Resampler>,
    dst: &mut Frame,
) -> anyhow::Result<()> {
    let channels = src.channels();
    let rate = src.rate();
    match sample_from(src.format()) {
        Some(native) => {
            let format = FrameFormat::audio(native, channels, rate, src.samples() as u32);
            dst.allocate(format);
            let size = format.buffer_size();
            dst.data_mut().copy_from_slice(&src.data(0)[..size]);
        }
        None => {
            let target = packed(src.format());
            let mut converted = frame::Audio::empty();
            Resampler::ensure(
                resampler,
                (src.format(), channels, rate, sample(target), channels, rate),
            )?
            .run(src, &mut converted)?;
            let format = FrameFormat::audio(target, channels, rate, converted.samples() as u32);
            dst.allocate(format);
            let size = format.buffer_size();
            dst.data_mut().copy_from_slice(&converted.data(0)[..size]);
        }
    }
    Ok(())
}

enum EncoderType {
    Video(ffmpeg_next::codec::encoder::Video),
    Audio(ffmpeg_next::codec::encoder::Audio),
}

pub(super) struct FfmpegEncoder {
    inner: Option<EncoderType>,
    settings: EncoderSettings,
    time_base: TimeBase,
    /// Sample layout the codec was opened with.
    native_sample: Option<Sample>,
    parameters: Arc<NativeParameters>,
    resampler: Option<Resampler>,
}

unsafe impl Send for FfmpegEncoder {}

impl FfmpegEncoder {
    pub fn new(settings: &EncoderSettings) -> anyhow::Result<Self> {
        let name = settings.params.codec();
        let codec = ffmpeg_next::encoder::find_by_name(name)
            .ok_or(anyhow::anyhow!("codec not found: {}", name))?;
        let mut ctx = ffmpeg_next::codec::Context::new_with_codec(codec);
        if settings.global_header {
            ctx.set_flags(ffmpeg_next::codec::Flags::GLOBAL_HEADER);
        }

        let (inner, native_sample) = match settings.params {
            CodecParameters::Video {
                pixel: format,
                width,
                height,
                frame_rate,
                bit_rate,
                ..
            } => {
                let mut encoder = ctx.encoder().video()?;
                encoder.set_width(width);
                encoder.set_height(height);
                encoder.set_format(pixel(format.unwrap_or(PixelFormat::Yuv420p)));
                encoder.set_frame_rate(Some(Rational::new(frame_rate as i32, 1)));
                encoder.set_time_base(rational(settings.time_base));
                if let Some(bit_rate) = bit_rate {
                    encoder.set_bit_rate(bit_rate as usize);
                }
                let mut opts = Dictionary::new();
                if name == "libx264" {
                    opts.set("preset", "ultrafast");
                    opts.set("tune", "zerolatency");
                }
                (EncoderType::Video(encoder.open_with(opts)?), None)
            }
            CodecParameters::Audio {
                sample: format,
                channels,
                sample_rate,
                bit_rate,
                ..
            } => {
                let wanted = sample(format.unwrap_or(SampleFormat::S16));
                let supported: Vec<Sample> = codec
                    .audio()?
                    .formats()
                    .map(|formats| formats.collect())
                    .unwrap_or_default();
                let native = if supported.is_empty() || supported.contains(&wanted) {
                    wanted
                } else {
                    supported[0]
                };
                let mut encoder = ctx.encoder().audio()?;
                encoder.set_rate(sample_rate as i32);
                encoder.set_channel_layout(layout(channels));
                encoder.set_format(native);
                encoder.set_time_base(rational(settings.time_base));
                if let Some(bit_rate) = bit_rate {
                    encoder.set_bit_rate(bit_rate as usize);
                }
                (
                    EncoderType::Audio(encoder.open_with(Dictionary::new())?),
                    Some(native),
                )
            }
        };

        let (native_time_base, parameters) = unsafe {
            let ctx = match &inner {
                EncoderType::Video(e) => e.as_ptr(),
                EncoderType::Audio(e) => e.as_ptr(),
            };
            let mut parameters = Parameters::new();
            let ret = ffmpeg_next::ffi::avcodec_parameters_from_context(parameters.as_mut_ptr(), ctx);
            if ret < 0 {
                return Err(ffmpeg_next::Error::from(ret).into());
            }
            (Rational::from((*ctx).time_base), parameters)
        };
        log::info!(
            "encoder opened successfully: {} ({})",
            name,
            time_base(native_time_base)
        );
        Ok(Self {
            inner: Some(inner),
            settings: settings.clone(),
            time_base: time_base(native_time_base),
            native_sample,
            parameters: Arc::new(NativeParameters(parameters)),
            resampler: None,
        })
    }
}

impl Encoder for FfmpegEncoder {
    fn time_base(&self) -> TimeBase {
        self.time_base
    }

    fn stream_parameters(&self) -> StreamDescriptor {
        StreamDescriptor::new(0, self.settings.params.clone(), self.time_base)
            .with_backend(self.parameters.clone())
    }

    fn send_frame(&mut self, frame: Option<&Frame>) -> anyhow::Result<CoderStatus> {
        let inner = self
            .inner
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("encoder closed"))?;
        let Some(frame) = frame else {
            return status(match inner {
                EncoderType::Video(e) => e.send_eof(),
                EncoderType::Audio(e) => e.send_eof(),
            });
        };
        let format = frame
            .format()
            .ok_or_else(|| anyhow::anyhow!("frame has no format"))?;
        match (inner, format) {
            (
                EncoderType::Video(encoder),
                FrameFormat::Video {
                    pixel: p,
                    width,
                    height,
                },
            ) => {
                let mut native = frame::Video::new(pixel(p), width, height);
                fill_video(&mut native, frame.data(), format);
                native.set_pts(frame.pts());
                status(encoder.send_frame(&native))
            }
            (
                EncoderType::Audio(encoder),
                FrameFormat::Audio {
                    sample: s,
                    channels,
                    sample_rate,
                    nb_samples,
                },
            ) => {
                let mut native = frame::Audio::new(sample(s), nb_samples as usize, layout(channels));
                native.set_rate(sample_rate);
                let size = format.buffer_size();
                native.data_mut(0)[..size].copy_from_slice(&frame.data()[..size]);
                native.set_pts(frame.pts());
                match self.native_sample {
                    Some(target) if target != sample(s) => {
                        let mut converted = frame::Audio::empty();
                        Resampler::ensure(
                            &mut self.resampler,
                            (sample(s), channels, sample_rate, target, channels, sample_rate),
                        )?
                        .run(&native, &mut converted)?;
                        converted.set_pts(frame.pts());
                        status(encoder.send_frame(&converted))
                    }
                    _ => status(encoder.send_frame(&native)),
                }
            }
            (_, format) => anyhow::bail!(
                "{} encoder cannot take {:?}",
                self.settings.params.kind(),
                format
            ),
        }
    }

    fn receive_packet(&mut self, packet: &mut Packet) -> anyhow::Result<CoderStatus> {
        let inner = self
            .inner
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("encoder closed"))?;
        let mut native = ffmpeg_next::Packet::empty();
        let received = status(match inner {
            EncoderType::Video(e) => e.receive_packet(&mut native),
            EncoderType::Audio(e) => e.receive_packet(&mut native),
        })?;
        if received == CoderStatus::Ok {
            packet.clear();
            packet.set_data(native.data().unwrap_or_default());
            packet.set_pts(native.pts());
            packet.set_dts(native.dts());
            packet.set_duration(native.duration());
            packet.set_key(native.is_key());
            packet.set_time_base(self.time_base);
        }
        Ok(received)
    }

    // avcodec has nothing left to drop once receive_packet reported EOF
    fn flush(&mut self) {}

    fn close(&mut self) -> anyhow::Result<()> {
        self.inner = None;
        Ok(())
    }
}
