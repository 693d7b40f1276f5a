use crate::{Error, Result};
use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct MonitorState {
    owner: Option<u64>,
    entry_count: usize,
}

/// A per-object recursive monitor providing mutual exclusion for
/// `monitorenter` / `monitorexit`.
///
/// The owning thread may re-enter; each enter must be balanced by an exit,
/// and the monitor is released when the entry count drops to zero. Because
/// enter and exit are separate bytecode instructions, the monitor tracks the
/// owner explicitly instead of handing out lock guards.
#[derive(Debug, Default)]
pub struct Monitor {
    state: Mutex<MonitorState>,
    available: Condvar,
}

impl Monitor {
    /// Create a new monitor.
    #[must_use]
    pub fn new() -> Self {
        Monitor::default()
    }

    /// Acquire the monitor for the given thread, blocking while another
    /// thread owns it. Re-entry by the owning thread increments the entry
    /// count.
    pub fn enter(&self, thread_id: u64) {
        let mut state = self.state.lock();
        loop {
            match state.owner {
                None => {
                    state.owner = Some(thread_id);
                    state.entry_count = 1;
                    return;
                }
                Some(owner) if owner == thread_id => {
                    state.entry_count += 1;
                    return;
                }
                Some(_) => self.available.wait(&mut state),
            }
        }
    }

    /// Release one entry of the monitor.
    ///
    /// # Errors
    ///
    /// if the calling thread does not own the monitor.
    pub fn exit(&self, thread_id: u64) -> Result<()> {
        let mut state = self.state.lock();
        if state.owner != Some(thread_id) {
            return Err(Error::MonitorNotOwned(thread_id));
        }
        state.entry_count -= 1;
        if state.entry_count == 0 {
            state.owner = None;
            self.available.notify_one();
        }
        Ok(())
    }

    /// The thread currently owning the monitor, if any.
    #[must_use]
    pub fn owner(&self) -> Option<u64> {
        self.state.lock().owner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enter_exit() -> Result<()> {
        let monitor = Monitor::new();
        monitor.enter(1);
        assert_eq!(Some(1), monitor.owner());
        monitor.exit(1)?;
        assert_eq!(None, monitor.owner());
        Ok(())
    }

    #[test]
    fn test_reentrancy() -> Result<()> {
        let monitor = Monitor::new();
        monitor.enter(1);
        monitor.enter(1);
        monitor.exit(1)?;
        assert_eq!(Some(1), monitor.owner());
        monitor.exit(1)?;
        assert_eq!(None, monitor.owner());
        Ok(())
    }

    #[test]
    fn test_exit_without_ownership() {
        let monitor = Monitor::new();
        assert!(monitor.exit(1).is_err());
        monitor.enter(1);
        assert!(monitor.exit(2).is_err());
    }

    #[test]
    fn test_contention() {
        let monitor = std::sync::Arc::new(Monitor::new());
        monitor.enter(1);
        let contender = {
            let monitor = monitor.clone();
            std::thread::spawn(move || {
                monitor.enter(2);
                monitor.exit(2).expect("exit");
            })
        };
        // Give the contender a moment to block on the monitor.
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert_eq!(Some(1), monitor.owner());
        monitor.exit(1).expect("exit");
        contender.join().expect("join");
        assert_eq!(None, monitor.owner());
    }
}
