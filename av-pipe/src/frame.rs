use std::fmt::{Display, Formatter};

use crate::format::{FrameFormat, MediaKind};
use crate::queue::EndMarker;
use crate::timebase::TimeBase;

/// One decoded image or block of interleaved audio samples.
///
/// The backing buffer is allocated on first use and kept across reuses of the
/// same slot; it is only resized when the format or dimensions change.
#[derive(Clone, Debug, Default)]
pub struct Frame {
    data: Vec<u8>,
    format: Option<FrameFormat>,
    stream_index: usize,
    pts: Option<i64>,
    duration: i64,
    time_base: TimeBase,
    end_marker: bool,
}

/// Borrowed view of a raw buffer and the format describing it.
#[derive(Clone, Copy, Debug)]
pub struct FrameView<'a> {
    pub data: &'a [u8],
    pub format: FrameFormat,
}

impl<'a> FrameView<'a> {
    pub fn new(data: &'a [u8], format: FrameFormat) -> Self {
        Self { data, format }
    }
}

impl Frame {
    pub fn new(format: FrameFormat) -> Self {
        let mut frame = Self::default();
        frame.allocate(format);
        frame
    }

    /// Size the buffer for `format`. Returns true when the buffer had to change.
    pub fn allocate(&mut self, format: FrameFormat) -> bool {
        let size = format.buffer_size();
        if self.format == Some(format) && self.data.len() == size {
            return false;
        }
        self.data.resize(size, 0);
        self.format = Some(format);
        true
    }

    /// Copy a tightly packed buffer of `format` into this frame.
    pub fn copy_from(&mut self, src: &[u8], format: FrameFormat) -> anyhow::Result<()> {
        let size = format.buffer_size();
        if src.len() < size {
            anyhow::bail!(
                "source buffer too small for {:?}: need {} bytes, have {}",
                format,
                size,
                src.len()
            );
        }
        self.allocate(format);
        self.data.copy_from_slice(&src[..size]);
        Ok(())
    }

    /// Drop timing and marker state but keep the buffer for the next reuse.
    pub fn reset(&mut self) {
        self.stream_index = 0;
        self.pts = None;
        self.duration = 0;
        self.time_base = TimeBase::MILLIS;
        self.end_marker = false;
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn view(&self) -> Option<FrameView<'_>> {
        self.format.map(|format| FrameView::new(&self.data, format))
    }

    pub fn format(&self) -> Option<FrameFormat> {
        self.format
    }

    pub fn kind(&self) -> Option<MediaKind> {
        self.format.map(|f| f.kind())
    }

    pub fn width(&self) -> u32 {
        match self.format {
            Some(FrameFormat::Video { width, .. }) => width,
            _ => 0,
        }
    }

    pub fn height(&self) -> u32 {
        match self.format {
            Some(FrameFormat::Video { height, .. }) => height,
            _ => 0,
        }
    }

    pub fn nb_samples(&self) -> u32 {
        match self.format {
            Some(FrameFormat::Audio { nb_samples, .. }) => nb_samples,
            _ => 0,
        }
    }

    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    pub fn set_stream_index(&mut self, index: usize) {
        self.stream_index = index;
    }

    pub fn pts(&self) -> Option<i64> {
        self.pts
    }

    pub fn set_pts(&mut self, pts: Option<i64>) {
        self.pts = pts;
    }

    pub fn duration(&self) -> i64 {
        self.duration
    }

    pub fn set_duration(&mut self, duration: i64) {
        self.duration = duration;
    }

    pub fn time_base(&self) -> TimeBase {
        self.time_base
    }

    pub fn set_time_base(&mut self, time_base: TimeBase) {
        self.time_base = time_base;
    }

    /// Re-express pts and duration in `to` and adopt it as the frame time base.
    pub fn rescale_to(&mut self, to: TimeBase) {
        self.pts = self.time_base.rescale_opt(self.pts, to);
        self.duration = self.time_base.rescale(self.duration, to);
        self.time_base = to;
    }

    pub fn pts_ms(&self) -> Option<i64> {
        self.time_base.rescale_opt(self.pts, TimeBase::MILLIS)
    }
}

impl EndMarker for Frame {
    fn end_marker(stream_index: usize) -> Self {
        Self {
            stream_index,
            end_marker: true,
            ..Default::default()
        }
    }

    fn is_end_marker(&self) -> bool {
        self.end_marker
    }
}

impl Display for Frame {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.end_marker {
            return write!(f, "Frame(end marker, stream: {})", self.stream_index);
        }
        write!(
            f,
            "Frame(stream: {}, format: {:?}, data_len: {}, pts: {:?}, duration: {}, time_base: {})",
            self.stream_index,
            self.format,
            self.data.len(),
            self.pts,
            self.duration,
            self.time_base
        )
    }
}
