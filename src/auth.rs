//! Identity of the signed-in user.
use log::info;
use tokio::sync::watch;

/// Current user, observable by anything scoped to it
#[derive(Debug)]
pub struct AuthState {
    current: watch::Sender<Option<String>>,
}

impl AuthState {
    pub fn new(user: Option<String>) -> Self {
        let (current, _) = watch::channel(user);
        Self { current }
    }

    pub fn sign_in(&self, user_id: impl Into<String>) {
        let user_id = user_id.into();
        info!("Signed in as {}", user_id);
        self.current.send_replace(Some(user_id));
    }

    pub fn sign_out(&self) {
        if let Some(previous) = self.current.send_replace(None) {
            info!("Signed out {}", previous);
        }
    }

    pub fn current(&self) -> Option<String> {
        self.current.borrow().clone()
    }

    /// Receiver notified on every sign-in and sign-out
    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.current.subscribe()
    }
}

impl Default for AuthState {
    fn default() -> Self {
        Self::new(None)
    }
}
