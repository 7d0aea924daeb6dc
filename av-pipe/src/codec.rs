use crate::frame::Frame;
use crate::packet::Packet;
use crate::stream::{EncoderSettings, StreamDescriptor};
use crate::timebase::TimeBase;

/// Outcome of a single send or receive call on a codec.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoderStatus {
    /// The call made progress.
    Ok,
    /// The codec cannot produce output until it is fed more input
    /// (or, on send, until pending output is drained).
    NeedMoreInput,
    /// The codec has been flushed and has nothing left.
    EndOfStream,
}

pub trait Decoder: Send {
    fn stream_index(&self) -> usize;

    /// `None` starts draining.
    fn send_packet(&mut self, packet: Option<&Packet>) -> anyhow::Result<CoderStatus>;

    /// Fills `frame` and sets its time base when the status is `Ok`.
    fn receive_frame(&mut self, frame: &mut Frame) -> anyhow::Result<CoderStatus>;

    /// Discard internal buffers after draining.
    fn flush(&mut self);

    fn close(&mut self) -> anyhow::Result<()>;
}

pub trait Encoder: Send {
    /// Time base the encoder expects frame timestamps in.
    fn time_base(&self) -> TimeBase;

    /// Stream description to register with a muxer.
    fn stream_parameters(&self) -> StreamDescriptor;

    /// `None` starts draining.
    fn send_frame(&mut self, frame: Option<&Frame>) -> anyhow::Result<CoderStatus>;

    /// Fills `packet` and sets its time base when the status is `Ok`.
    fn receive_packet(&mut self, packet: &mut Packet) -> anyhow::Result<CoderStatus>;

    fn flush(&mut self);

    fn close(&mut self) -> anyhow::Result<()>;
}

pub trait CodecFactory: Send + Sync {
    fn open_decoder(&self, stream: &StreamDescriptor) -> anyhow::Result<Box<dyn Decoder>>;

    fn open_encoder(&self, settings: &EncoderSettings) -> anyhow::Result<Box<dyn Encoder>>;
}
