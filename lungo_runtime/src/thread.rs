use crate::Frame;
use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: Thread = Thread::new();
}

/// The per-thread execution context: a process-unique thread id (used for
/// monitor ownership and class-init reentrancy) and the frame pool.
///
/// There is exactly one frame stack per thread; frames are drawn from and
/// returned to the pool of the thread that executes them and are never shared
/// across threads.
#[derive(Debug)]
pub struct Thread {
    id: u64,
    frame_pool: RefCell<Vec<Frame>>,
    frame_pool_limit: Cell<usize>,
}

impl Thread {
    /// The default number of released frames a thread retains for reuse.
    pub const DEFAULT_FRAME_POOL_LIMIT: usize = 32;

    fn new() -> Self {
        Thread {
            id: NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed),
            frame_pool: RefCell::new(Vec::new()),
            frame_pool_limit: Cell::new(Thread::DEFAULT_FRAME_POOL_LIMIT),
        }
    }

    /// Run `f` with the calling thread's context.
    pub fn with_current<T>(f: impl FnOnce(&Thread) -> T) -> T {
        CURRENT.with(f)
    }

    /// The id of the calling thread.
    #[must_use]
    pub fn current_id() -> u64 {
        Thread::with_current(Thread::id)
    }

    /// This thread's id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Acquire a frame with at least `locals` zeroed local slots, reusing a
    /// pooled frame when one is available.
    pub fn make_frame(&self, locals: usize) -> Frame {
        let mut frame = self.frame_pool.borrow_mut().pop().unwrap_or_default();
        frame.reserve_locals(locals);
        frame
    }

    /// Return a frame to the pool. The frame is cleared; frames beyond the
    /// pool limit are dropped.
    pub fn free_frame(&self, mut frame: Frame) {
        frame.clear();
        let mut frame_pool = self.frame_pool.borrow_mut();
        if frame_pool.len() < self.frame_pool_limit.get() {
            frame_pool.push(frame);
        }
    }

    /// The number of frames currently pooled.
    #[must_use]
    pub fn pooled_frames(&self) -> usize {
        self.frame_pool.borrow().len()
    }

    /// Set the number of released frames this thread retains.
    pub fn set_frame_pool_limit(&self, limit: usize) {
        self.frame_pool_limit.set(limit);
        let mut frame_pool = self.frame_pool.borrow_mut();
        frame_pool.truncate(limit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Value;

    #[test]
    fn test_thread_ids_are_unique_per_thread() {
        let id = Thread::current_id();
        assert_eq!(id, Thread::current_id());
        let other = std::thread::spawn(Thread::current_id).join().expect("join");
        assert_ne!(id, other);
    }

    #[test]
    fn test_frames_are_pooled_and_cleared() {
        Thread::with_current(|thread| {
            let mut frame = thread.make_frame(2);
            frame.push(Value::from_int(1));
            frame.set_pc(9);
            thread.free_frame(frame);
            assert!(thread.pooled_frames() >= 1);

            let frame = thread.make_frame(1);
            assert_eq!(0, frame.stack_depth());
            assert_eq!(0, frame.pc());
            thread.free_frame(frame);
        });
    }

    #[test]
    fn test_pool_limit() {
        Thread::with_current(|thread| {
            thread.set_frame_pool_limit(1);
            thread.free_frame(Frame::new());
            thread.free_frame(Frame::new());
            assert_eq!(1, thread.pooled_frames());
            thread.set_frame_pool_limit(Thread::DEFAULT_FRAME_POOL_LIMIT);
        });
    }
}
