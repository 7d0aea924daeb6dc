//! Threaded audio/video export pipeline.
//!
//! Applications submit raw images and audio samples to an [`Exporter`], which
//! converts them, encodes them on one thread per stream and muxes the packets
//! into a container file. A [`Source`] runs the same machinery backwards, and
//! a [`Transcoder`] joins the two.

pub mod backend;
pub mod buffer;
pub mod codec;
pub mod config;
pub mod container;
pub mod convert;
pub mod error;
pub mod exporter;
pub mod format;
pub mod frame;
pub mod packet;
pub mod producer;
pub mod queue;
pub mod sink;
pub mod source;
pub mod stats;
pub mod status;
pub mod stream;
pub mod timebase;
pub mod transcode;

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;

#[cfg(test)]
mod mock;

pub use backend::Backends;
pub use config::{ExportConfig, SourceConfig};
pub use error::{ExportResult, PipelineError, Result};
pub use exporter::Exporter;
pub use format::{FrameFormat, MediaKind, PixelFormat, SampleFormat};
pub use frame::Frame;
pub use producer::{Producer, RawFileProducer};
pub use source::Source;
pub use timebase::TimeBase;
pub use transcode::Transcoder;
