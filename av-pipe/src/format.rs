use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Yuv420p,
    Nv12,
    Rgb24,
    Rgba,
}

impl PixelFormat {
    /// Bytes needed for one tightly packed image of this format.
    pub fn buffer_size(self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::Yuv420p | PixelFormat::Nv12 => pixels * 3 / 2,
            PixelFormat::Rgb24 => pixels * 3,
            PixelFormat::Rgba => pixels * 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PixelFormat::Yuv420p => "yuv420p",
            PixelFormat::Nv12 => "nv12",
            PixelFormat::Rgb24 => "rgb24",
            PixelFormat::Rgba => "rgba",
        }
    }
}

impl FromStr for PixelFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "yuv420p" => Ok(PixelFormat::Yuv420p),
            "nv12" => Ok(PixelFormat::Nv12),
            "rgb24" => Ok(PixelFormat::Rgb24),
            "rgba" => Ok(PixelFormat::Rgba),
            other => Err(anyhow::anyhow!("unsupported pixel format: {}", other)),
        }
    }
}

impl Display for PixelFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Interleaved sample formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    S16,
    F32,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::S16 => 2,
            SampleFormat::F32 => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SampleFormat::S16 => "s16",
            SampleFormat::F32 => "f32",
        }
    }
}

impl FromStr for SampleFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "s16" => Ok(SampleFormat::S16),
            "f32" | "flt" => Ok(SampleFormat::F32),
            other => Err(anyhow::anyhow!("unsupported sample format: {}", other)),
        }
    }
}

impl Display for SampleFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    pub fn name(self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }
}

impl Display for MediaKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Shape of the buffer carried by a [`Frame`](crate::frame::Frame).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameFormat {
    Video {
        pixel: PixelFormat,
        width: u32,
        height: u32,
    },
    Audio {
        sample: SampleFormat,
        channels: u16,
        sample_rate: u32,
        nb_samples: u32,
    },
}

impl FrameFormat {
    pub fn video(pixel: PixelFormat, width: u32, height: u32) -> Self {
        FrameFormat::Video {
            pixel,
            width,
            height,
        }
    }

    pub fn audio(sample: SampleFormat, channels: u16, sample_rate: u32, nb_samples: u32) -> Self {
        FrameFormat::Audio {
            sample,
            channels,
            sample_rate,
            nb_samples,
        }
    }

    pub fn kind(&self) -> MediaKind {
        match self {
            FrameFormat::Video { .. } => MediaKind::Video,
            FrameFormat::Audio { .. } => MediaKind::Audio,
        }
    }

    /// Equal formats, or audio that differs in sample count only.
    pub fn same_layout(&self, other: &FrameFormat) -> bool {
        match (*self, *other) {
            (
                FrameFormat::Audio {
                    sample,
                    channels,
                    sample_rate,
                    ..
                },
                FrameFormat::Audio {
                    sample: other_sample,
                    channels: other_channels,
                    sample_rate: other_rate,
                    ..
                },
            ) => (sample, channels, sample_rate) == (other_sample, other_channels, other_rate),
            (a, b) => a == b,
        }
    }

    pub fn buffer_size(&self) -> usize {
        match *self {
            FrameFormat::Video {
                pixel,
                width,
                height,
            } => pixel.buffer_size(width, height),
            FrameFormat::Audio {
                sample,
                channels,
                nb_samples,
                ..
            } => nb_samples as usize * channels as usize * sample.bytes_per_sample(),
        }
    }
}
