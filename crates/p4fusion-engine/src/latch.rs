use std::sync::{Condvar, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
enum LatchState {
    Waiting,
    Released,
    Failed(String),
}

/// One-shot barrier with exactly-one-writer, many-readers semantics.
///
/// A failed latch carries the task's error message to every waiter, so the
/// committer never blocks forever on a changelist whose worker died.
#[derive(Debug)]
pub struct Latch {
    state: Mutex<LatchState>,
    cv: Condvar,
}

impl Latch {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LatchState::Waiting),
            cv: Condvar::new(),
        }
    }

    pub fn release(&self) {
        let mut state = self.state.lock().unwrap();
        if *state == LatchState::Waiting {
            *state = LatchState::Released;
            self.cv.notify_all();
        }
    }

    pub fn fail(&self, message: String) {
        let mut state = self.state.lock().unwrap();
        if *state == LatchState::Waiting {
            *state = LatchState::Failed(message);
            self.cv.notify_all();
        }
    }

    /// Block until the latch is released or failed.
    pub fn wait(&self) -> Result<(), String> {
        let mut state = self.state.lock().unwrap();
        while *state == LatchState::Waiting {
            state = self.cv.wait(state).unwrap();
        }
        match &*state {
            LatchState::Released => Ok(()),
            LatchState::Failed(message) => Err(message.clone()),
            LatchState::Waiting => unreachable!(),
        }
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}
