use parking_lot::{Condvar, Mutex};

use crate::error::PipelineError;
use crate::format::MediaKind;

/// End-of-stream bits observed by a stage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StageStatus(u8);

impl StageStatus {
    pub const READ_END: u8 = 1;
    pub const VIDEO_END: u8 = 1 << 1;
    pub const AUDIO_END: u8 = 1 << 2;

    pub fn decode_end(kind: MediaKind) -> u8 {
        match kind {
            MediaKind::Video => Self::VIDEO_END,
            MediaKind::Audio => Self::AUDIO_END,
        }
    }

    pub fn contains(self, flag: u8) -> bool {
        self.0 & flag == flag
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

struct Inner {
    aborted: bool,
    status: StageStatus,
    failure: Option<PipelineError>,
    continue_requested: bool,
}

/// State a stage shares with its worker threads: the abort flag, the
/// end-of-stream bits and the first fatal error, all behind one mutex.
pub struct SharedState {
    name: String,
    inner: Mutex<Inner>,
    wake: Condvar,
}

impl SharedState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner {
                aborted: false,
                status: StageStatus::default(),
                failure: None,
                continue_requested: false,
            }),
            wake: Condvar::new(),
        }
    }

    /// Set the abort flag. Returns true for the call that actually set it.
    pub fn abort(&self) -> bool {
        let mut inner = self.inner.lock();
        let first = !inner.aborted;
        inner.aborted = true;
        drop(inner);
        self.wake.notify_all();
        first
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.lock().aborted
    }

    /// Record `flag`. Returns true when it was not set before.
    pub fn mark(&self, flag: u8) -> bool {
        let mut inner = self.inner.lock();
        let first = !inner.status.contains(flag);
        inner.status.0 |= flag;
        first
    }

    /// Drop `flag` again, for a stream that resumed after its end.
    pub fn clear(&self, flag: u8) {
        self.inner.lock().status.0 &= !flag;
    }

    pub fn status(&self) -> StageStatus {
        self.inner.lock().status
    }

    /// Record a fatal error and abort. Only the first error is kept; later
    /// ones are logged and dropped.
    pub fn fail(&self, err: PipelineError) {
        let mut inner = self.inner.lock();
        if inner.failure.is_none() {
            log::error!("[{}] {}", self.name, err);
            inner.failure = Some(err);
        } else {
            log::warn!("[{}] further error after failure: {}", self.name, err);
        }
        inner.aborted = true;
        drop(inner);
        self.wake.notify_all();
    }

    pub fn has_failed(&self) -> bool {
        self.inner.lock().failure.is_some()
    }

    pub fn take_failure(&self) -> Option<PipelineError> {
        self.inner.lock().failure.take()
    }

    /// Wake a worker parked in [`wait_continue`](Self::wait_continue).
    pub fn request_continue(&self) {
        self.inner.lock().continue_requested = true;
        self.wake.notify_all();
    }

    /// Park until continuation is requested or the stage aborts.
    /// Returns false on abort.
    pub fn wait_continue(&self) -> bool {
        let mut inner = self.inner.lock();
        self.wake
            .wait_while(&mut inner, |i| !i.continue_requested && !i.aborted);
        if inner.aborted {
            return false;
        }
        inner.continue_requested = false;
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn marks_are_reported_once() {
        let state = SharedState::new("test");
        assert!(state.mark(StageStatus::READ_END));
        assert!(!state.mark(StageStatus::READ_END));
        assert!(state.mark(StageStatus::decode_end(MediaKind::Audio)));
        let status = state.status();
        assert!(status.contains(StageStatus::READ_END));
        assert!(status.contains(StageStatus::AUDIO_END));
        assert!(!status.contains(StageStatus::VIDEO_END));
    }

    #[test]
    fn cleared_mark_can_be_set_again() {
        let state = SharedState::new("test");
        assert!(state.mark(StageStatus::READ_END));
        state.clear(StageStatus::READ_END);
        assert!(!state.status().contains(StageStatus::READ_END));
        assert!(state.mark(StageStatus::READ_END));
    }

    #[test]
    fn first_failure_wins() {
        let state = SharedState::new("test");
        state.fail(PipelineError::Configuration("first".into()));
        state.fail(PipelineError::Aborted);
        assert!(state.is_aborted());
        match state.take_failure() {
            Some(PipelineError::Configuration(msg)) => assert_eq!(msg, "first"),
            other => panic!("unexpected failure: {:?}", other),
        }
        assert!(!state.has_failed());
    }

    #[test]
    fn abort_releases_continue_wait() {
        let state = Arc::new(SharedState::new("test"));
        let waiter = {
            let state = state.clone();
            thread::spawn(move || state.wait_continue())
        };
        assert!(state.abort());
        assert!(!state.abort());
        assert!(!waiter.join().unwrap());
    }

    #[test]
    fn continue_request_wakes_waiter() {
        let state = Arc::new(SharedState::new("test"));
        let waiter = {
            let state = state.clone();
            thread::spawn(move || state.wait_continue())
        };
        state.request_continue();
        assert!(waiter.join().unwrap());
    }
}
