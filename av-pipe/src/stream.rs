use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::format::{FrameFormat, MediaKind, PixelFormat, SampleFormat};
use crate::timebase::TimeBase;

/// Codec level description of one elementary stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CodecParameters {
    Video {
        codec: String,
        pixel: Option<PixelFormat>,
        width: u32,
        height: u32,
        frame_rate: u32,
        bit_rate: Option<u64>,
    },
    Audio {
        codec: String,
        sample: Option<SampleFormat>,
        channels: u16,
        sample_rate: u32,
        frame_size: u32,
        bit_rate: Option<u64>,
    },
}

impl CodecParameters {
    pub fn kind(&self) -> MediaKind {
        match self {
            CodecParameters::Video { .. } => MediaKind::Video,
            CodecParameters::Audio { .. } => MediaKind::Audio,
        }
    }

    pub fn codec(&self) -> &str {
        match self {
            CodecParameters::Video { codec, .. } | CodecParameters::Audio { codec, .. } => codec,
        }
    }

    /// Raw frame layout an encoder with these parameters accepts.
    pub fn frame_format(&self) -> Option<FrameFormat> {
        match *self {
            CodecParameters::Video {
                pixel: Some(pixel),
                width,
                height,
                ..
            } => Some(FrameFormat::video(pixel, width, height)),
            CodecParameters::Audio {
                sample: Some(sample),
                channels,
                sample_rate,
                frame_size,
                ..
            } => Some(FrameFormat::audio(sample, channels, sample_rate, frame_size)),
            _ => None,
        }
    }
}

/// One elementary stream of a container, input or output side.
///
/// `backend` carries whatever native parameters the container backend needs
/// to open a matching codec; the pipeline itself never looks inside it.
#[derive(Clone)]
pub struct StreamDescriptor {
    pub index: usize,
    pub params: CodecParameters,
    pub time_base: TimeBase,
    pub backend: Option<Arc<dyn Any + Send + Sync>>,
}

impl StreamDescriptor {
    pub fn new(index: usize, params: CodecParameters, time_base: TimeBase) -> Self {
        Self {
            index,
            params,
            time_base,
            backend: None,
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn Any + Send + Sync>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn kind(&self) -> MediaKind {
        self.params.kind()
    }

    pub fn is_video(&self) -> bool {
        self.kind() == MediaKind::Video
    }

    pub fn is_audio(&self) -> bool {
        self.kind() == MediaKind::Audio
    }

    pub fn backend<T: Any>(&self) -> Option<&T> {
        self.backend.as_deref().and_then(|b| b.downcast_ref::<T>())
    }
}

impl fmt::Debug for StreamDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamDescriptor")
            .field("index", &self.index)
            .field("params", &self.params)
            .field("time_base", &self.time_base)
            .field("backend", &self.backend.is_some())
            .finish()
    }
}

/// Everything needed to open an encoder for one output stream.
#[derive(Clone, Debug)]
pub struct EncoderSettings {
    pub params: CodecParameters,
    pub time_base: TimeBase,
    /// Set when the output container wants codec extradata out of band.
    pub global_header: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_params_describe_frame_format() {
        let params = CodecParameters::Video {
            codec: "libx264".into(),
            pixel: Some(PixelFormat::Yuv420p),
            width: 720,
            height: 1280,
            frame_rate: 25,
            bit_rate: None,
        };
        assert_eq!(params.kind(), MediaKind::Video);
        assert_eq!(params.codec(), "libx264");
        assert_eq!(
            params.frame_format(),
            Some(FrameFormat::video(PixelFormat::Yuv420p, 720, 1280))
        );
    }

    #[test]
    fn backend_payload_downcasts() {
        let stream = StreamDescriptor::new(
            1,
            CodecParameters::Audio {
                codec: "aac".into(),
                sample: None,
                channels: 2,
                sample_rate: 44100,
                frame_size: 1024,
                bit_rate: None,
            },
            TimeBase::per_second(44100),
        )
        .with_backend(Arc::new(42u32));
        assert!(stream.is_audio());
        assert_eq!(stream.backend::<u32>(), Some(&42));
        assert!(stream.backend::<String>().is_none());
        assert_eq!(stream.params.frame_format(), None);
    }
}
