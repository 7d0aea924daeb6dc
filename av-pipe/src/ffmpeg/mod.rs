//! FFmpeg implementation of the codec, container and conversion capabilities.

use std::path::Path;

use ffmpeg_next::format::{Pixel, Sample, sample};
use ffmpeg_next::{Rational, codec::Parameters};

use crate::codec::{CodecFactory, CoderStatus, Decoder, Encoder};
use crate::container::{ContainerFactory, Demuxer, Muxer};
use crate::convert::{ConverterFactory, FrameConverter};
use crate::format::{FrameFormat, MediaKind, PixelFormat, SampleFormat};
use crate::stream::{EncoderSettings, StreamDescriptor};
use crate::timebase::TimeBase;

mod codec;
mod container;
mod scaler;

/// Registers FFmpeg components. Call once at startup.
pub fn init() -> anyhow::Result<()> {
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))
}

pub struct FfmpegBackend;

impl CodecFactory for FfmpegBackend {
    fn open_decoder(&self, stream: &StreamDescriptor) -> anyhow::Result<Box<dyn Decoder>> {
        Ok(Box::new(codec::FfmpegDecoder::new(stream)?))
    }

    fn open_encoder(&self, settings: &EncoderSettings) -> anyhow::Result<Box<dyn Encoder>> {
        Ok(Box::new(codec::FfmpegEncoder::new(settings)?))
    }
}

impl ContainerFactory for FfmpegBackend {
    fn open_input(&self, path: &Path) -> anyhow::Result<Box<dyn Demuxer>> {
        Ok(Box::new(container::FfmpegDemuxer::open(path)?))
    }

    fn open_output(&self, path: &Path) -> anyhow::Result<Box<dyn Muxer>> {
        Ok(Box::new(container::FfmpegMuxer::create(path)?))
    }
}

impl ConverterFactory for FfmpegBackend {
    fn open_converter(&self, kind: MediaKind) -> anyhow::Result<Box<dyn FrameConverter>> {
        Ok(Box::new(scaler::FfmpegConverter::new(kind)))
    }
}

/// Native codec parameters carried in [`StreamDescriptor::backend`].
pub(crate) struct NativeParameters(pub Parameters);

unsafe impl Send for NativeParameters {}
unsafe impl Sync for NativeParameters {}

fn rational(time_base: TimeBase) -> Rational {
    Rational::new(time_base.num, time_base.den)
}

fn time_base(rational: Rational) -> TimeBase {
    if rational.denominator() == 0 {
        return TimeBase::MILLIS;
    }
    TimeBase::new(rational.numerator(), rational.denominator())
}

fn pixel(format: PixelFormat) -> Pixel {
    match format {
        PixelFormat::Yuv420p => Pixel::YUV420P,
        PixelFormat::Nv12 => Pixel::NV12,
        PixelFormat::Rgb24 => Pixel::RGB24,
        PixelFormat::Rgba => Pixel::RGBA,
    }
}

fn pixel_from(format: Pixel) -> Option<PixelFormat> {
    match format {
        Pixel::YUV420P => Some(PixelFormat::Yuv420p),
        Pixel::NV12 => Some(PixelFormat::Nv12),
        Pixel::RGB24 => Some(PixelFormat::Rgb24),
        Pixel::RGBA => Some(PixelFormat::Rgba),
        _ => None,
    }
}

fn sample(format: SampleFormat) -> Sample {
    match format {
        SampleFormat::S16 => Sample::I16(sample::Type::Packed),
        SampleFormat::F32 => Sample::F32(sample::Type::Packed),
    }
}

fn sample_from(format: Sample) -> Option<SampleFormat> {
    match format {
        Sample::I16(sample::Type::Packed) => Some(SampleFormat::S16),
        Sample::F32(sample::Type::Packed) => Some(SampleFormat::F32),
        _ => None,
    }
}

/// Packed counterpart of a planar sample format, used as decode output.
fn packed(format: Sample) -> SampleFormat {
    match format {
        Sample::F32(_) | Sample::F64(_) | Sample::I32(_) | Sample::I64(_) => SampleFormat::F32,
        _ => SampleFormat::S16,
    }
}

fn status(result: Result<(), ffmpeg_next::Error>) -> anyhow::Result<CoderStatus> {
    match result {
        Ok(()) => Ok(CoderStatus::Ok),
        Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::util::error::EAGAIN => {
            Ok(CoderStatus::NeedMoreInput)
        }
        Err(ffmpeg_next::Error::Eof) => Ok(CoderStatus::EndOfStream),
        Err(err) => Err(err.into()),
    }
}

/// Copy a tightly packed image into a (possibly padded) FFmpeg frame.
/// `src` must hold at least `format.buffer_size()` bytes.
fn fill_video(dst: &mut ffmpeg_next::frame::Video, src: &[u8], format: FrameFormat) {
    let FrameFormat::Video { pixel, width, height } = format else {
        return;
    };
    let mut offset = 0;
    for (plane, (row, rows)) in plane_rows(pixel, width, height).into_iter().enumerate() {
        let stride = dst.stride(plane);
        let data = dst.data_mut(plane);
        for y in 0..rows {
            data[y * stride..y * stride + row].copy_from_slice(&src[offset..offset + row]);
            offset += row;
        }
    }
}

/// Copy an FFmpeg frame into a tightly packed buffer of `format`.
fn read_video(src: &ffmpeg_next::frame::Video, dst: &mut [u8], format: FrameFormat) {
    let FrameFormat::Video { pixel, width, height } = format else {
        return;
    };
    let mut offset = 0;
    for (plane, (row, rows)) in plane_rows(pixel, width, height).into_iter().enumerate() {
        let stride = src.stride(plane);
        let data = src.data(plane);
        for y in 0..rows {
            dst[offset..offset + row].copy_from_slice(&data[y * stride..y * stride + row]);
            offset += row;
        }
    }
}

/// Bytes per row and row count of each plane.
fn plane_rows(pixel: PixelFormat, width: u32, height: u32) -> Vec<(usize, usize)> {
    let (w, h) = (width as usize, height as usize);
    match pixel {
        PixelFormat::Yuv420p => vec![(w, h), (w / 2, h / 2), (w / 2, h / 2)],
        PixelFormat::Nv12 => vec![(w, h), (w / 2 * 2, h / 2)],
        PixelFormat::Rgb24 => vec![(w * 3, h)],
        PixelFormat::Rgba => vec![(w * 4, h)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuv_planes_add_up_to_buffer_size() {
        let rows = plane_rows(PixelFormat::Yuv420p, 720, 1280);
        let total: usize = rows.iter().map(|(row, n)| row * n).sum();
        assert_eq!(total, PixelFormat::Yuv420p.buffer_size(720, 1280));
    }

    #[test]
    fn formats_map_both_ways() {
        for format in [
            PixelFormat::Yuv420p,
            PixelFormat::Nv12,
            PixelFormat::Rgb24,
            PixelFormat::Rgba,
        ] {
            assert_eq!(pixel_from(pixel(format)), Some(format));
        }
        assert_eq!(sample_from(sample(SampleFormat::S16)), Some(SampleFormat::S16));
        assert_eq!(packed(Sample::F32(sample::Type::Planar)), SampleFormat::F32);
        assert_eq!(time_base(rational(TimeBase::MILLIS)), TimeBase::MILLIS);
    }
}
