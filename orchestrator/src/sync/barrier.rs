use std::{error::Error, fmt};

use parking_lot::{Condvar, Mutex};

/// Returned by `GroupBarrier::wait` once the group has been aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aborted;

impl fmt::Display for Aborted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a replica of the group failed")
    }
}

impl Error for Aborted {}

struct State {
    arrived: usize,
    generation: u64,
    aborted: bool,
}

/// A reusable thread barrier that any member can abort, releasing every
/// current and future waiter with an error.
pub struct GroupBarrier {
    size: usize,
    state: Mutex<State>,
    cvar: Condvar,
}

impl GroupBarrier {
    /// Creates a new `GroupBarrier`.
    ///
    /// # Arguments
    /// * `size` - The amount of threads to wait on.
    pub fn new(size: usize) -> Self {
        Self {
            size,
            state: Mutex::new(State {
                arrived: 0,
                generation: 0,
                aborted: false,
            }),
            cvar: Condvar::new(),
        }
    }

    /// Blocks until `size` threads are waiting.
    ///
    /// # Returns
    /// `true` on exactly one of the released threads, the leader, or an
    /// error if the group was aborted.
    pub fn wait(&self) -> Result<bool, Aborted> {
        let mut state = self.state.lock();
        if state.aborted {
            return Err(Aborted);
        }

        state.arrived += 1;
        if state.arrived == self.size {
            state.arrived = 0;
            state.generation += 1;
            self.cvar.notify_all();
            return Ok(true);
        }

        let generation = state.generation;
        while state.generation == generation && !state.aborted {
            self.cvar.wait(&mut state);
        }

        match state.generation == generation {
            true => Err(Aborted),
            false => Ok(false),
        }
    }

    /// Aborts the group.
    pub fn abort(&self) {
        self.state.lock().aborted = true;
        self.cvar.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn exactly_one_leader_per_generation() {
        let barrier = Arc::new(GroupBarrier::new(4));

        let leaders: usize = thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let barrier = barrier.clone();
                    s.spawn(move || {
                        (0..3)
                            .map(|_| barrier.wait().unwrap() as usize)
                            .sum::<usize>()
                    })
                })
                .collect();

            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(leaders, 3);
    }

    #[test]
    fn abort_releases_waiters() {
        let barrier = GroupBarrier::new(3);

        thread::scope(|s| {
            let waiter = s.spawn(|| barrier.wait());
            while barrier.state.lock().arrived == 0 {
                thread::yield_now();
            }

            barrier.abort();
            assert_eq!(waiter.join().unwrap(), Err(Aborted));
        });

        assert_eq!(barrier.wait(), Err(Aborted));
    }
}
