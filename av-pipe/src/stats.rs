use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::format::MediaKind;

/// Live counters for one stream, updated from the submitting and encoding threads.
#[derive(Debug, Default)]
pub struct StreamCounters {
    pub frames_submitted: AtomicU64,
    pub frames_sent: AtomicU64,
    pub packets_received: AtomicU64,
    pub packets_written: AtomicU64,
}

impl StreamCounters {
    pub fn snapshot(&self) -> StreamStats {
        StreamStats {
            frames_submitted: self.frames_submitted.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_written: self.packets_written.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default)]
pub struct PipelineCounters {
    pub video: Arc<StreamCounters>,
    pub audio: Arc<StreamCounters>,
}

impl PipelineCounters {
    pub fn for_kind(&self, kind: MediaKind) -> &Arc<StreamCounters> {
        match kind {
            MediaKind::Video => &self.video,
            MediaKind::Audio => &self.audio,
        }
    }

    pub fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            video: self.video.snapshot(),
            audio: self.audio.snapshot(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StreamStats {
    pub frames_submitted: u64,
    pub frames_sent: u64,
    pub packets_received: u64,
    pub packets_written: u64,
}

/// Point-in-time copy of the pipeline counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub video: StreamStats,
    pub audio: StreamStats,
}
