//! One in-flight operation, many waiters.
//!
//! `Idle -> InFlight -> Idle`. The first caller to [`SingleFlight::join`] while
//! idle becomes the leader and runs the operation; everyone joining until the
//! leader finishes becomes a follower and receives the leader's result. The
//! leader's guard returns the state to idle on every exit path, including
//! cancellation, so the gate can never stay latched.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

enum State<T> {
    Idle,
    InFlight {
        generation: u64,
        result: watch::Receiver<Option<T>>,
    },
}

struct Inner<T> {
    state: State<T>,
    next_generation: u64,
}

pub(crate) struct SingleFlight<T> {
    inner: Mutex<Inner<T>>,
}

pub(crate) enum Ticket<'a, T> {
    /// Runs the operation and must hand the result to [`Leader::complete`].
    Leader(Leader<'a, T>),
    /// Awaits the current leader's result.
    Follower(Follower<T>),
}

pub(crate) struct Leader<'a, T> {
    flight: &'a SingleFlight<T>,
    generation: u64,
    sender: watch::Sender<Option<T>>,
}

pub(crate) struct Follower<T> {
    result: watch::Receiver<Option<T>>,
}

impl<T> SingleFlight<T> {
    pub(crate) const fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: State::Idle,
                next_generation: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        // The critical sections never panic; recover the data if one somehow did.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Becomes the leader of a new flight or follows the current one.
    pub(crate) fn join(&self) -> Ticket<'_, T> {
        let mut inner = self.lock();
        if let State::InFlight { result, .. } = &inner.state {
            return Ticket::Follower(Follower {
                result: result.clone(),
            });
        }

        let generation = inner.next_generation;
        inner.next_generation = inner.next_generation.wrapping_add(1);
        let (sender, result) = watch::channel(None);
        inner.state = State::InFlight { generation, result };

        Ticket::Leader(Leader {
            flight: self,
            generation,
            sender,
        })
    }

    /// Whether a flight is currently running.
    pub(crate) fn is_in_flight(&self) -> bool {
        matches!(self.lock().state, State::InFlight { .. })
    }

    /// Returns to idle unless a newer flight already replaced `generation`.
    fn release(&self, generation: u64) {
        let mut inner = self.lock();
        if matches!(inner.state, State::InFlight { generation: current, .. } if current == generation)
        {
            inner.state = State::Idle;
        }
    }
}

impl<T> Leader<'_, T> {
    /// Publishes `result` to every follower and returns the gate to idle.
    ///
    /// The gate is released before publishing, so a caller woken by the result
    /// that joins again starts a fresh flight.
    pub(crate) fn complete(self, result: T) {
        self.flight.release(self.generation);
        self.sender.send_replace(Some(result));
    }
}

impl<T> Drop for Leader<'_, T> {
    fn drop(&mut self) {
        // Also runs after `complete`, where it is a no-op.
        self.flight.release(self.generation);
    }
}

impl<T: Clone> Follower<T> {
    /// Waits for the leader. `None` if the leader went away without a result.
    pub(crate) async fn wait(mut self) -> Option<T> {
        self.result
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|value| (*value).clone())
    }
}
