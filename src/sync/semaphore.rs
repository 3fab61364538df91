//! A counting semaphore, used by [`crate::compute`] to admit only one
//! pending workgroup per worker at a time (SPEC_FULL.md §4.J).

use crate::sync::CondVar;
use std::sync::Mutex;

pub struct Semaphore {
    count: Mutex<usize>,
    available: CondVar,
}

impl Semaphore {
    pub fn new(initial: usize) -> Self {
        Semaphore {
            count: Mutex::new(initial),
            available: CondVar::new(),
        }
    }

    /// Blocks until a permit is available, then takes it.
    pub fn acquire(&self) {
        let mut count = self.count.lock().unwrap();
        while *count == 0 {
            count = self.available.wait(count);
        }
        *count -= 1;
    }

    /// Returns a permit, waking one waiter if any.
    pub fn release(&self) {
        let mut count = self.count.lock().unwrap();
        *count += 1;
        self.available.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_release_round_trip() {
        let sem = Semaphore::new(1);
        sem.acquire();
        assert_eq!(*sem.count.lock().unwrap(), 0);
        sem.release();
        assert_eq!(*sem.count.lock().unwrap(), 1);
    }
}
