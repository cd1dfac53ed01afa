use std::sync::Arc;

use serde::{Deserialize, Serialize};
use signon_ipc::{ObjectPath, SignonError};
use tokio_util::sync::CancellationToken;

/// Where an object stands in binding to its remote counterpart.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum RegistrationState {
    #[default]
    NotRegistered,
    Pending,
    Registered,
    /// Resolution failed and the error is latched. Identities stay here;
    /// sessions resolve again on their next operation.
    Failed,
}

impl RegistrationState {
    fn name(self) -> &'static str {
        match self {
            Self::NotRegistered => "not_registered",
            Self::Pending => "pending",
            Self::Registered => "registered",
            Self::Failed => "failed",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Registration {
    state: RegistrationState,
}

impl Registration {
    pub(crate) fn state(&self) -> RegistrationState {
        self.state
    }

    /// Moves to `Pending` if no resolution has been requested yet. Returns
    /// `true` when the caller must issue the request.
    pub(crate) fn begin(&mut self) -> bool {
        if self.state != RegistrationState::NotRegistered {
            return false;
        }
        self.state = RegistrationState::Pending;
        true
    }

    pub(crate) fn mark_registered(&mut self) -> Result<(), SignonError> {
        self.leave_pending(RegistrationState::Registered)
    }

    pub(crate) fn mark_failed(&mut self) -> Result<(), SignonError> {
        self.leave_pending(RegistrationState::Failed)
    }

    /// The remote object went away; the next operation resolves it again.
    pub(crate) fn reset(&mut self) {
        self.state = RegistrationState::NotRegistered;
    }

    fn leave_pending(&mut self, next: RegistrationState) -> Result<(), SignonError> {
        if self.state != RegistrationState::Pending {
            return Err(SignonError::protocol(format!(
                "registration reply while {}",
                self.state.name()
            )));
        }
        self.state = next;
        Ok(())
    }
}

/// A resolved remote proxy together with the token scoping its listeners.
///
/// Replaced on re-registration, never mutated. Dropping the handle stops the
/// event listener bound to it.
pub(crate) struct RemoteHandle<P: ?Sized> {
    proxy: Arc<P>,
    path: ObjectPath,
    token: CancellationToken,
}

impl<P: ?Sized> RemoteHandle<P> {
    pub(crate) fn new(proxy: Arc<P>, path: ObjectPath, parent: &CancellationToken) -> Self {
        Self {
            proxy,
            path,
            token: parent.child_token(),
        }
    }

    pub(crate) fn proxy(&self) -> Arc<P> {
        Arc::clone(&self.proxy)
    }

    pub(crate) fn path(&self) -> &ObjectPath {
        &self.path
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl<P: ?Sized> Drop for RemoteHandle<P> {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
