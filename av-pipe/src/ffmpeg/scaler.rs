use ffmpeg_next::format::{Pixel, Sample};
use ffmpeg_next::software::{resampling, scaling};
use ffmpeg_next::{ChannelLayout, frame};

use super::{fill_video, pixel, read_video, sample};
use crate::convert::FrameConverter;
use crate::format::{FrameFormat, MediaKind};
use crate::frame::{Frame, FrameView};

pub(super) fn layout(channels: u16) -> ChannelLayout {
    if channels == 1 {
        ChannelLayout::MONO
    } else {
        ChannelLayout::STEREO
    }
}

type ScaleKey = (Pixel, u32, u32, Pixel, u32, u32);

/// swscale context, rebuilt whenever the source or target geometry changes.
pub(super) struct Scaler {
    key: ScaleKey,
    context: scaling::Context,
}

unsafe impl Send for Scaler {}

impl Scaler {
    pub fn ensure(slot: &mut Option<Scaler>, key: ScaleKey) -> anyhow::Result<&mut Scaler> {
        if slot.as_ref().is_none_or(|s| s.key != key) {
            let (src, sw, sh, dst, dw, dh) = key;
            let context =
                scaling::Context::get(src, sw, sh, dst, dw, dh, scaling::Flags::BILINEAR)?;
            *slot = Some(Scaler { key, context });
        }
        slot.as_mut()
            .ok_or_else(|| anyhow::anyhow!("scaler unavailable"))
    }

    pub fn run(&mut self, src: &frame::Video, dst: &mut frame::Video) -> anyhow::Result<()> {
        self.context.run(src, dst).map_err(|e| e.into())
    }
}

type ResampleKey = (Sample, u16, u32, Sample, u16, u32);

pub(super) struct Resampler {
    key: ResampleKey,
    context: resampling::Context,
}

unsafe impl Send for Resampler {}

impl Resampler {
    pub fn ensure(slot: &mut Option<Resampler>, key: ResampleKey) -> anyhow::Result<&mut Resampler> {
        if slot.as_ref().is_none_or(|r| r.key != key) {
            let (src, sc, sr, dst, dc, dr) = key;
            let context = resampling::Context::get(src, layout(sc), sr, dst, layout(dc), dr)?;
            *slot = Some(Resampler { key, context });
        }
        slot.as_mut()
            .ok_or_else(|| anyhow::anyhow!("resampler unavailable"))
    }

    pub fn run(&mut self, src: &frame::Audio, dst: &mut frame::Audio) -> anyhow::Result<()> {
        self.context.run(src, dst)?;
        Ok(())
    }
}

/// Scales images and resamples audio frames into the export format.
pub(super) struct FfmpegConverter {
    kind: MediaKind,
    scaler: Option<Scaler>,
    resampler: Option<Resampler>,
}

impl FfmpegConverter {
    pub fn new(kind: MediaKind) -> Self {
        Self {
            kind,
            scaler: None,
            resampler: None,
        }
    }
}

impl FrameConverter for FfmpegConverter {
    fn convert(
        &mut self,
        src: FrameView<'_>,
        dst: &mut Frame,
        target: FrameFormat,
    ) -> anyhow::Result<()> {
        // audio at another sample count is re-chunked by the exporter
        if src.format.same_layout(&target) {
            return dst.copy_from(src.data, src.format);
        }
        if src.format.kind() != self.kind || target.kind() != self.kind {
            anyhow::bail!("{} converter cannot convert {:?} to {:?}", self.kind, src.format, target);
        }
        if src.data.len() < src.format.buffer_size() {
            anyhow::bail!(
                "source buffer too small for {:?}: {} bytes",
                src.format,
                src.data.len()
            );
        }
        match (src.format, target) {
            (
                FrameFormat::Video {
                    pixel: sp,
                    width: sw,
                    height: sh,
                },
                FrameFormat::Video {
                    pixel: dp,
                    width: dw,
                    height: dh,
                },
            ) => {
                let mut input = frame::Video::new(pixel(sp), sw, sh);
                fill_video(&mut input, src.data, src.format);
                let mut output = frame::Video::empty();
                Scaler::ensure(&mut self.scaler, (pixel(sp), sw, sh, pixel(dp), dw, dh))?
                    .run(&input, &mut output)?;
                dst.allocate(target);
                read_video(&output, dst.data_mut(), target);
            }
            (
                FrameFormat::Audio {
                    sample: ss,
                    channels: sc,
                    sample_rate: sr,
                    nb_samples,
                },
                FrameFormat::Audio {
                    sample: ds,
                    channels: dc,
                    sample_rate: dr,
                    ..
                },
            ) => {
                let mut input = frame::Audio::new(sample(ss), nb_samples as usize, layout(sc));
                input.set_rate(sr);
                let size = src.format.buffer_size();
                input.data_mut(0)[..size].copy_from_slice(&src.data[..size]);
                let mut output = frame::Audio::empty();
                Resampler::ensure(&mut self.resampler, (sample(ss), sc, sr, sample(ds), dc, dr))?
                    .run(&input, &mut output)?;
                // a rate change alters the sample count
                let format = FrameFormat::audio(ds, dc, dr, output.samples() as u32);
                dst.allocate(format);
                let size = format.buffer_size();
                dst.data_mut().copy_from_slice(&output.data(0)[..size]);
            }
            (src, target) => anyhow::bail!("cannot convert {:?} to {:?}", src, target),
        }
        Ok(())
    }
}
