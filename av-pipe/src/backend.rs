use std::sync::Arc;

use crate::codec::CodecFactory;
use crate::container::ContainerFactory;
use crate::convert::ConverterFactory;

/// The codec, container and conversion capabilities a pipeline runs on.
#[derive(Clone)]
pub struct Backends {
    pub codecs: Arc<dyn CodecFactory>,
    pub containers: Arc<dyn ContainerFactory>,
    pub converters: Arc<dyn ConverterFactory>,
}

impl Backends {
    pub fn new(
        codecs: Arc<dyn CodecFactory>,
        containers: Arc<dyn ContainerFactory>,
        converters: Arc<dyn ConverterFactory>,
    ) -> Self {
        Self {
            codecs,
            containers,
            converters,
        }
    }

    /// FFmpeg for every capability. Initialises the library on first use.
    #[cfg(feature = "ffmpeg")]
    pub fn ffmpeg() -> anyhow::Result<Self> {
        crate::ffmpeg::init()?;
        let backend = Arc::new(crate::ffmpeg::FfmpegBackend);
        Ok(Self::new(backend.clone(), backend.clone(), backend))
    }
}
