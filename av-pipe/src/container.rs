use std::path::Path;

use crate::format::MediaKind;
use crate::packet::Packet;
use crate::stream::StreamDescriptor;
use crate::timebase::TimeBase;

pub trait Demuxer: Send {
    fn streams(&self) -> &[StreamDescriptor];

    /// First stream of `kind`, if any.
    fn best_stream(&self, kind: MediaKind) -> Option<usize> {
        self.streams()
            .iter()
            .find(|s| s.kind() == kind)
            .map(|s| s.index)
    }

    /// Read the next packet into `packet`, stamped with its stream time base.
    /// Returns false at end of input.
    fn read_packet(&mut self, packet: &mut Packet) -> anyhow::Result<bool>;

    fn close(&mut self) -> anyhow::Result<()>;
}

pub trait Muxer: Send {
    /// Whether encoders feeding this container must emit global headers.
    fn requires_global_header(&self) -> bool {
        false
    }

    /// Register an output stream and return its index.
    fn add_stream(&mut self, stream: &StreamDescriptor) -> anyhow::Result<usize>;

    fn write_header(&mut self) -> anyhow::Result<()>;

    /// Time base chosen for `index`. Only final after `write_header`.
    fn stream_time_base(&self, index: usize) -> Option<TimeBase>;

    /// Write one packet whose timestamps are already in the stream time base.
    fn write_interleaved(&mut self, packet: &mut Packet) -> anyhow::Result<()>;

    fn write_trailer(&mut self) -> anyhow::Result<()>;

    fn close(&mut self) -> anyhow::Result<()>;
}

pub trait ContainerFactory: Send + Sync {
    fn open_input(&self, path: &Path) -> anyhow::Result<Box<dyn Demuxer>>;

    fn open_output(&self, path: &Path) -> anyhow::Result<Box<dyn Muxer>>;
}
