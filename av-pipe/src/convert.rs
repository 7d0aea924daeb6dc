use crate::format::{FrameFormat, MediaKind};
use crate::frame::{Frame, FrameView};

/// Converts raw frames between pixel layouts, sizes or sample formats.
pub trait FrameConverter: Send {
    /// Write `src` into `dst` in the `target` format, allocating `dst` as needed.
    fn convert(
        &mut self,
        src: FrameView<'_>,
        dst: &mut Frame,
        target: FrameFormat,
    ) -> anyhow::Result<()>;
}

pub trait ConverterFactory: Send + Sync {
    fn open_converter(&self, kind: MediaKind) -> anyhow::Result<Box<dyn FrameConverter>>;
}

/// Copies frames that already match the target layout and rejects the rest.
#[derive(Clone, Copy, Debug, Default)]
pub struct Passthrough;

impl FrameConverter for Passthrough {
    fn convert(
        &mut self,
        src: FrameView<'_>,
        dst: &mut Frame,
        target: FrameFormat,
    ) -> anyhow::Result<()> {
        if !src.format.same_layout(&target) {
            anyhow::bail!(
                "passthrough cannot convert {:?} to {:?}",
                src.format,
                target
            );
        }
        dst.copy_from(src.data, src.format)
    }
}

impl ConverterFactory for Passthrough {
    fn open_converter(&self, _kind: MediaKind) -> anyhow::Result<Box<dyn FrameConverter>> {
        Ok(Box::new(Passthrough))
    }
}
