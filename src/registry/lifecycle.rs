use tokio::sync::watch;

use super::RegistryError;

/// Initialization state of a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
}

/// One-shot `Uninitialized -> Initializing -> Ready | Failed` state machine.
///
/// Waiters suspend on a `watch` channel instead of polling, so
/// [`wait`](Self::wait) never blocks a worker thread.
#[derive(Debug)]
pub struct InitGate {
    name: &'static str,
    state: watch::Sender<InitState>,
}

impl InitGate {
    pub fn new(name: &'static str) -> Self {
        let (state, _) = watch::channel(InitState::Uninitialized);
        Self { name, state }
    }

    pub fn state(&self) -> InitState {
        *self.state.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == InitState::Ready
    }

    /// Move to `Initializing`. Fails if initialization already started.
    pub fn begin(&self) -> Result<(), RegistryError> {
        let mut started = false;
        self.state.send_if_modified(|state| {
            if *state == InitState::Uninitialized {
                *state = InitState::Initializing;
                started = true;
                true
            } else {
                false
            }
        });

        if started {
            Ok(())
        } else {
            Err(RegistryError::AlreadyInitialized(self.name))
        }
    }

    /// Finish initialization with the outcome of the load.
    pub fn finish(&self, ok: bool) {
        let next = if ok {
            InitState::Ready
        } else {
            InitState::Failed
        };
        self.state.send_replace(next);
        tracing::debug!(registry = self.name, state = ?next, "Registry initialization finished");
    }

    /// Suspend until the registry is ready.
    ///
    /// Returns an error if initialization failed.
    pub async fn wait(&self) -> Result<(), RegistryError> {
        let mut rx = self.state.subscribe();
        let state = *rx
            .wait_for(|state| matches!(state, InitState::Ready | InitState::Failed))
            .await
            .map_err(|_| RegistryError::InitializationFailed(self.name))?;

        match state {
            InitState::Ready => Ok(()),
            _ => Err(RegistryError::InitializationFailed(self.name)),
        }
    }

    pub fn ensure_ready(&self) -> Result<(), RegistryError> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(RegistryError::NotReady(self.name))
        }
    }
}
