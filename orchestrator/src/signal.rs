//! Maps interrupt and hang-up signals to solver actions.
//!
//! An `ActionToken` is created per run and handed to the solver as its action
//! function. A `SignalGuard` listens for the two signals for as long as it is
//! alive and records the bound action in the token; the solver picks it up at
//! the next iteration boundary.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    thread::{self, JoinHandle},
};

use log::{debug, info};
use machine_learning::{ActionFn, SolverAction};
use tokio::{runtime, sync::oneshot};

use self::platform::Listener;
use crate::{OrchestratorError, Result};

/// The action each signal triggers, fixed for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalBindings {
    pub interrupt: SolverAction,
    pub hangup: SolverAction,
}

impl SignalBindings {
    /// Parses the `--sigint_effect` and `--sighup_effect` values.
    ///
    /// # Returns
    /// An error if either value isn't `stop`, `snapshot` or `none`.
    pub fn parse(sigint_effect: &str, sighup_effect: &str) -> Result<Self> {
        let parse = |effect: &str| {
            effect
                .parse::<SolverAction>()
                .map_err(|e| OrchestratorError::InvalidConfig(e.to_string()))
        };

        Ok(Self {
            interrupt: parse(sigint_effect)?,
            hangup: parse(sighup_effect)?,
        })
    }
}

/// The pending action of one run.
///
/// The last recorded action wins, a pending `Stop` overwritten by a
/// `Snapshot` before the solver polls is lost.
#[derive(Debug, Clone, Default)]
pub struct ActionToken(Arc<AtomicU8>);

impl ActionToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `action` as pending.
    pub fn record(&self, action: SolverAction) {
        self.0.store(action.code(), Ordering::Release);
    }

    /// Takes the pending action, leaving `None` in its place.
    pub fn query(&self) -> SolverAction {
        let code = self.0.swap(SolverAction::None.code(), Ordering::AcqRel);
        SolverAction::from_code(code).unwrap_or_default()
    }

    /// The token as a solver action function.
    pub fn action_fn(&self) -> ActionFn {
        let token = self.clone();
        Arc::new(move || token.query())
    }
}

/// Keeps the signal listener running, stops it on drop.
///
/// Dropping the guard only stops recording actions. The process keeps its
/// signal handlers once they are registered, so a later interrupt is ignored
/// instead of terminating the process.
pub struct SignalGuard {
    shutdown: Option<oneshot::Sender<()>>,
    listener: Option<JoinHandle<()>>,
}

impl SignalGuard {
    /// Starts listening for the interrupt and hang-up signals.
    ///
    /// # Arguments
    /// * `bindings` - The action each signal records.
    /// * `token` - Where the actions are recorded.
    ///
    /// # Returns
    /// An io error if the signal handlers couldn't be registered.
    pub fn install(bindings: SignalBindings, token: ActionToken) -> Result<Self> {
        let runtime = runtime::Builder::new_current_thread().enable_all().build()?;
        let (mut interrupt, mut hangup) = {
            let _enter = runtime.enter();
            (Listener::interrupt()?, Listener::hangup()?)
        };

        let (shutdown, mut stopped) = oneshot::channel();
        let listener = thread::Builder::new()
            .name("signals".into())
            .spawn(move || {
                runtime.block_on(async move {
                    loop {
                        let action = tokio::select! {
                            _ = interrupt.recv() => bindings.interrupt,
                            _ = hangup.recv() => bindings.hangup,
                            _ = &mut stopped => break,
                        };

                        info!("signal received, requesting {action:?}");
                        token.record(action);
                    }
                });
            })?;

        debug!("signal handlers installed: {bindings:?}");
        Ok(Self {
            shutdown: Some(shutdown),
            listener: Some(listener),
        })
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }

        if let Some(listener) = self.listener.take() {
            let _ = listener.join();
        }

        debug!("signal listener stopped");
    }
}

#[cfg(unix)]
mod platform {
    use std::io;

    use tokio::signal::unix::{self, Signal, SignalKind};

    pub struct Listener(Signal);

    impl Listener {
        pub fn interrupt() -> io::Result<Self> {
            unix::signal(SignalKind::interrupt()).map(Self)
        }

        pub fn hangup() -> io::Result<Self> {
            unix::signal(SignalKind::hangup()).map(Self)
        }

        pub async fn recv(&mut self) {
            self.0.recv().await;
        }
    }
}

#[cfg(not(unix))]
mod platform {
    use std::{future, io};

    pub enum Listener {
        CtrlC,
        Never,
    }

    impl Listener {
        pub fn interrupt() -> io::Result<Self> {
            Ok(Self::CtrlC)
        }

        pub fn hangup() -> io::Result<Self> {
            Ok(Self::Never)
        }

        pub async fn recv(&mut self) {
            match self {
                Self::CtrlC => {
                    let _ = tokio::signal::ctrl_c().await;
                }
                Self::Never => future::pending().await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bindings_map_every_effect_on_both_signals() {
        for (name, action) in [
            ("stop", SolverAction::Stop),
            ("snapshot", SolverAction::Snapshot),
            ("none", SolverAction::None),
        ] {
            let bindings = SignalBindings::parse(name, "none").unwrap();
            assert_eq!(bindings.interrupt, action);

            let bindings = SignalBindings::parse("none", name).unwrap();
            assert_eq!(bindings.hangup, action);
        }
    }

    #[test]
    fn unknown_effect_is_rejected_before_installing() {
        assert!(SignalBindings::parse("restart", "snapshot").is_err());
        assert!(SignalBindings::parse("stop", "").is_err());
    }

    #[test]
    fn query_takes_the_last_recorded_action() {
        let token = ActionToken::new();
        assert_eq!(token.query(), SolverAction::None);

        token.record(SolverAction::Stop);
        token.record(SolverAction::Snapshot);
        let action_fn = token.action_fn();

        assert_eq!(action_fn(), SolverAction::Snapshot);
        assert_eq!(action_fn(), SolverAction::None);
    }

    #[cfg(unix)]
    #[test]
    fn hangup_is_recorded_while_guard_is_alive() {
        use std::time::{Duration, Instant};

        let token = ActionToken::new();
        let bindings = SignalBindings::parse("none", "stop").unwrap();
        let guard = SignalGuard::install(bindings, token.clone()).unwrap();

        let status = std::process::Command::new("kill")
            .args(["-HUP", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut action = SolverAction::None;
        while action == SolverAction::None && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
            action = token.query();
        }

        drop(guard);
        assert_eq!(action, SolverAction::Stop);
    }
}
