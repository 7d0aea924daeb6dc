use std::fmt::{Display, Formatter};

use bytes::BytesMut;

use crate::queue::EndMarker;
use crate::timebase::TimeBase;

/// One compressed unit, either read from a container or produced by an encoder.
///
/// The payload buffer keeps its capacity across reuses; `clear()` empties it
/// without giving the allocation back.
#[derive(Clone, Debug, Default)]
pub struct Packet {
    data: BytesMut,
    stream_index: usize,
    pts: Option<i64>,
    dts: Option<i64>,
    duration: i64,
    time_base: TimeBase,
    is_key: bool,
    flush: bool,
}

impl Packet {
    pub fn new(data: &[u8], stream_index: usize, time_base: TimeBase) -> Self {
        let mut packet = Self::default();
        packet.set_data(data);
        packet.stream_index = stream_index;
        packet.time_base = time_base;
        packet
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.stream_index = 0;
        self.pts = None;
        self.dts = None;
        self.duration = 0;
        self.time_base = TimeBase::MILLIS;
        self.is_key = false;
        self.flush = false;
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn set_data(&mut self, data: &[u8]) {
        self.data.clear();
        self.data.extend_from_slice(data);
    }

    pub fn size(&self) -> usize {
        self.data.len()
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

    pub fn dts(&self) -> Option<i64> {
        self.dts
    }

    pub fn set_dts(&mut self, dts: Option<i64>) {
        self.dts = dts;
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

    pub fn is_key(&self) -> bool {
        self.is_key
    }

    pub fn set_key(&mut self, is_key: bool) {
        self.is_key = is_key;
    }

    /// Re-express pts, dts and duration in `to` and adopt it as the packet time base.
    pub fn rescale_ts(&mut self, to: TimeBase) {
        let from = self.time_base;
        self.pts = from.rescale_opt(self.pts, to);
        self.dts = from.rescale_opt(self.dts, to);
        self.duration = from.rescale(self.duration, to);
        self.time_base = to;
    }
}

impl EndMarker for Packet {
    fn end_marker(stream_index: usize) -> Self {
        Self {
            stream_index,
            flush: true,
            ..Default::default()
        }
    }

    fn is_end_marker(&self) -> bool {
        self.flush
    }
}

impl Display for Packet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.flush {
            return write!(f, "Packet(flush marker, stream: {})", self.stream_index);
        }
        write!(
            f,
            "Packet(stream: {}, size: {}, pts: {:?}, dts: {:?}, duration: {}, time_base: {}, key: {})",
            self.stream_index,
            self.data.len(),
            self.pts,
            self.dts,
            self.duration,
            self.time_base,
            self.is_key
        )
    }
}
