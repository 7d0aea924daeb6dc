use parking_lot::{Condvar, Mutex};

use crate::buffer::{BufferPool, SlotRing};

/// Items that can stand in as the end-of-stream record of a queue.
pub trait EndMarker {
    fn end_marker(stream_index: usize) -> Self;
    fn is_end_marker(&self) -> bool;
}

struct QueueState<T> {
    items: SlotRing<T>,
    spares: BufferPool<T>,
    aborted: bool,
    finished: bool,
    end_marked: bool,
}

/// Blocking FIFO of bounded capacity shared between one producer thread and
/// one consumer thread.
///
/// `put` blocks while the queue is full and `get` blocks while it is empty.
/// `abort` wakes every waiter and discards whatever is still queued; `finish`
/// only closes the queue to writers so the reader can drain what is left.
pub struct BoundedQueue<T> {
    name: String,
    state: Mutex<QueueState<T>>,
    readable: Condvar,
    writable: Condvar,
}

impl<T: Default> BoundedQueue<T> {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(QueueState {
                items: SlotRing::with_capacity(capacity),
                spares: BufferPool::new(capacity),
                aborted: false,
                finished: false,
                end_marked: false,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
        }
    }

    /// Append `item`, blocking while the queue is full.
    ///
    /// Returns false, dropping the item, once the queue is aborted, finished
    /// or already carries its end marker.
    pub fn put(&self, item: T) -> bool {
        let mut state = self.state.lock();
        self.writable.wait_while(&mut state, |s| {
            s.items.is_full() && !s.aborted && !s.finished
        });
        if state.aborted || state.finished || state.end_marked {
            return false;
        }
        if state.items.push(item).is_err() {
            return false;
        }
        drop(state);
        self.readable.notify_one();
        true
    }

    /// Remove the oldest item, blocking while the queue is empty.
    ///
    /// Returns None when the queue was aborted, or when it was finished and
    /// everything queued before that has been handed out.
    pub fn get(&self) -> Option<T> {
        let mut state = self.state.lock();
        self.readable.wait_while(&mut state, |s| {
            s.items.is_empty() && !s.aborted && !s.finished
        });
        if state.aborted {
            return None;
        }
        let item = state.items.pop();
        drop(state);
        if item.is_some() {
            self.writable.notify_one();
        }
        item
    }

    /// Non-blocking variant of [`get`](Self::get).
    pub fn try_get(&self) -> Option<T> {
        let mut state = self.state.lock();
        if state.aborted {
            return None;
        }
        let item = state.items.pop();
        drop(state);
        if item.is_some() {
            self.writable.notify_one();
        }
        item
    }

    /// Abort the queue: wake all blocked callers and discard queued items.
    pub fn abort(&self) {
        let mut state = self.state.lock();
        if !state.aborted {
            log::debug!("[{}] abort, dropping {} queued", self.name, state.items.len());
        }
        state.aborted = true;
        state.items.clear();
        drop(state);
        self.readable.notify_all();
        self.writable.notify_all();
    }

    /// Wake every waiter so it can re-check shared state. Same as `abort`.
    pub fn signal(&self) {
        self.abort();
    }

    /// Close the queue to writers. Readers keep receiving queued items and then
    /// get None.
    pub fn finish(&self) {
        let mut state = self.state.lock();
        state.finished = true;
        drop(state);
        self.readable.notify_all();
        self.writable.notify_all();
    }

    /// Take a recycled item, or a fresh default one when no spare is left.
    pub fn acquire(&self) -> T {
        self.state.lock().spares.acquire()
    }

    /// Give an item back for reuse by a later `acquire`.
    pub fn release(&self, item: T) {
        self.state.lock().spares.release(item);
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().items.capacity()
    }

    pub fn is_aborted(&self) -> bool {
        self.state.lock().aborted
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T: Default + EndMarker> BoundedQueue<T> {
    /// Append the end marker for `stream_index`.
    ///
    /// Only the first call enqueues a marker; later calls return false.
    pub fn put_end_marker(&self, stream_index: usize) -> bool {
        let mut state = self.state.lock();
        if state.end_marked {
            return false;
        }
        self.writable.wait_while(&mut state, |s| {
            s.items.is_full() && !s.aborted && !s.finished
        });
        if state.aborted || state.finished || state.end_marked {
            return false;
        }
        if state.items.push(T::end_marker(stream_index)).is_err() {
            return false;
        }
        state.end_marked = true;
        drop(state);
        log::debug!("[{}] end marker queued for stream {}", self.name, stream_index);
        self.readable.notify_one();
        true
    }

    /// Accept items again after the end marker, for a stream that resumes.
    /// A marker still queued stays where it is. Returns false on an aborted
    /// or finished queue.
    pub fn rearm(&self) -> bool {
        let mut state = self.state.lock();
        if state.aborted || state.finished {
            return false;
        }
        state.end_marked = false;
        true
    }

    pub fn has_end_marker(&self) -> bool {
        self.state.lock().end_marked
    }
}

#[cfg(test)]
#[path = "queue_test.rs"]
mod queue_test;
