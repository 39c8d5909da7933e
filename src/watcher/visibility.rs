use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppVisibility {
    Foreground,
    Background,
}

/// Publishes whether the application is currently visible to the user.
pub struct AppVisibilityObserver {
    state: watch::Sender<AppVisibility>,
}

impl AppVisibilityObserver {
    pub fn new(initial: AppVisibility) -> Self {
        let (state, _) = watch::channel(initial);
        Self { state }
    }

    pub fn current(&self) -> AppVisibility {
        *self.state.borrow()
    }

    /// Record a visibility change. Repeating the current state is a no-op.
    pub fn set(&self, visibility: AppVisibility) {
        self.state.send_if_modified(|current| {
            if *current == visibility {
                false
            } else {
                tracing::debug!(?visibility, "App visibility changed");
                *current = visibility;
                true
            }
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<AppVisibility> {
        self.state.subscribe()
    }
}
