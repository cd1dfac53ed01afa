use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use signon_ipc::{
    AuthSessionState, ObjectPath, SessionData, SessionEvent, SessionProxy, SignonError,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

use crate::dispatch::CallQueue;
use crate::gate::ReadyGate;
use crate::identity::Identity;
use crate::registration::{Registration, RegistrationState, RemoteHandle};
use crate::reply::{self, Reply};
use crate::service::AuthService;

pub const PROCESS_PENDING_MESSAGE: &str = "The request is added to queue.";

const STATE_CHANGE_CAPACITY: usize = 32;

/// Progress report of an authentication session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateChange {
    /// Raw state code; plugins may report codes past the known range.
    pub state: i32,
    pub message: String,
}

impl StateChange {
    pub fn known_state(&self) -> Option<AuthSessionState> {
        AuthSessionState::from_code(self.state)
    }
}

struct SessionState {
    identity: Option<Arc<Identity>>,
    identity_id: u32,
    registration: Registration,
    remote: Option<RemoteHandle<dyn SessionProxy>>,
    busy: bool,
    canceled: bool,
    disposed: bool,
}

/// One authentication conversation with a daemon plugin.
///
/// Created through [`Identity::create_session`] or standalone with
/// [`AuthSession::new`]. The remote session object is requested as soon as
/// the session exists.
pub struct AuthSession {
    me: Weak<AuthSession>,
    service: Arc<AuthService>,
    method: String,
    state: Mutex<SessionState>,
    gate: ReadyGate,
    calls: CallQueue,
    state_changes: broadcast::Sender<StateChange>,
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession").finish_non_exhaustive()
    }
}

pub(crate) fn validate_method(method: &str) -> Result<(), SignonError> {
    if method.is_empty() {
        return Err(SignonError::InvalidArgument {
            message: "method name must not be empty".to_owned(),
        });
    }
    Ok(())
}

impl AuthSession {
    /// A session for `method` that is not bound to a stored identity.
    pub fn new(service: &Arc<AuthService>, method: &str) -> Result<Arc<Self>, SignonError> {
        validate_method(method)?;
        Ok(Self::build(Arc::clone(service), None, 0, method))
    }

    pub(crate) fn for_identity(
        identity: Arc<Identity>,
        identity_id: u32,
        method: &str,
    ) -> Arc<Self> {
        let service = Arc::clone(identity.service());
        Self::build(service, Some(identity), identity_id, method)
    }

    fn build(
        service: Arc<AuthService>,
        identity: Option<Arc<Identity>>,
        identity_id: u32,
        method: &str,
    ) -> Arc<Self> {
        let calls = CallQueue::spawn(service.runtime(), format!("session({method})"));
        let session = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            service,
            method: method.to_owned(),
            state: Mutex::new(SessionState {
                identity,
                identity_id,
                registration: Registration::default(),
                remote: None,
                busy: false,
                canceled: false,
                disposed: false,
            }),
            gate: ReadyGate::new(),
            calls,
            state_changes: broadcast::channel(STATE_CHANGE_CAPACITY).0,
        });
        session.ensure_registered();
        session
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn identity_id(&self) -> u32 {
        self.lock_state().identity_id
    }

    pub fn is_busy(&self) -> bool {
        self.lock_state().busy
    }

    /// `true` once the bound identity signed out and released this session.
    pub fn is_disposed(&self) -> bool {
        self.lock_state().disposed
    }

    pub fn registration_state(&self) -> RegistrationState {
        self.lock_state().registration.state()
    }

    pub fn last_error(&self) -> Option<SignonError> {
        self.gate.last_error()
    }

    pub fn state_changes(&self) -> broadcast::Receiver<StateChange> {
        self.state_changes.subscribe()
    }

    /// Mechanisms from `wanted` that the session's plugin supports.
    pub fn query_available_mechanisms(&self, wanted: Vec<String>) -> Reply<Vec<String>> {
        let (reply, pending) = reply::channel();
        self.ensure_registered();
        let me = self.me.clone();
        self.gate.call_when_ready(move |error| {
            let bound = ready_session(&me, error).and_then(|this| {
                let proxy = this.remote_proxy()?;
                Ok((this, proxy))
            });
            let (this, proxy) = match bound {
                Ok(bound) => bound,
                Err(err) => {
                    reply.send(Err(err));
                    return;
                }
            };
            this.emit_pending();
            this.calls.submit(async move {
                reply.send(proxy.query_available_mechanisms(&wanted).await);
            });
        });
        pending
    }

    /// Runs one authentication round with `mechanism`.
    ///
    /// The session is busy from this call until the reply resolves. A
    /// [`cancel`](Self::cancel) issued before the request reaches the daemon
    /// completes it with `SessionCanceled` without contacting the daemon.
    pub fn process(&self, session_data: SessionData, mechanism: &str) -> Reply<SessionData> {
        let (reply, pending) = reply::channel();
        self.ensure_registered();
        self.lock_state().busy = true;

        let mechanism = mechanism.to_owned();
        let me = self.me.clone();
        self.gate.call_when_ready(move |error| {
            let Some(this) = me.upgrade() else {
                reply.send(Err(SignonError::Disposed));
                return;
            };
            let proxy = {
                let mut state = this.lock_state();
                let ready = match error {
                    Some(err) => Err(err),
                    None if state.canceled => Err(SignonError::SessionCanceled),
                    None => state
                        .remote
                        .as_ref()
                        .map(RemoteHandle::proxy)
                        .ok_or_else(not_registered),
                };
                match ready {
                    Ok(proxy) => proxy,
                    Err(err) => {
                        state.busy = false;
                        state.canceled = false;
                        drop(state);
                        log::debug!("session({}): process not sent: {err}", this.method);
                        reply.send(Err(err));
                        return;
                    }
                }
            };

            this.emit_pending();
            let me = this.me.clone();
            this.calls.submit(async move {
                let result = proxy.process(&session_data, &mechanism).await;
                // Held until the reply is delivered.
                let this = me.upgrade();
                if let Some(this) = &this {
                    this.lock_state().busy = false;
                }
                reply.send(result);
                drop(this);
            });
        });
        pending
    }

    /// Cancels the pending [`process`](Self::process) call, if any.
    ///
    /// Best effort: when the request already reached the daemon its reply
    /// still arrives through `process`.
    pub fn cancel(&self) {
        self.ensure_registered();
        {
            let mut state = self.lock_state();
            if !state.busy {
                return;
            }
            state.canceled = true;
        }

        let me = self.me.clone();
        self.gate.call_when_ready(move |error| {
            let Some(this) = me.upgrade() else {
                return;
            };
            let proxy = {
                let mut state = this.lock_state();
                let proxy = match error {
                    Some(err) => {
                        log::debug!("session({}): cancel not sent: {err}", this.method);
                        None
                    }
                    None if state.busy => state.remote.as_ref().map(RemoteHandle::proxy),
                    None => None,
                };
                state.busy = false;
                state.canceled = false;
                proxy
            };
            if let Some(proxy) = proxy {
                let method = this.method.clone();
                this.calls.submit(async move {
                    if let Err(err) = proxy.cancel().await {
                        log::debug!("session({method}): remote cancel failed: {err}");
                    }
                });
            }
        });
    }

    /// Moves the session to identity `id` on the daemon side.
    pub(crate) fn set_id(&self, id: u32) {
        self.ensure_registered();
        let me = self.me.clone();
        self.gate.call_when_ready(move |error| {
            let Some(this) = me.upgrade() else {
                return;
            };
            if let Some(err) = error {
                log::warn!("session({}): cannot move to identity {id}: {err}", this.method);
                return;
            }
            let proxy = {
                let mut state = this.lock_state();
                state.identity_id = id;
                state.remote.as_ref().map(RemoteHandle::proxy)
            };
            if let Some(proxy) = proxy {
                let method = this.method.clone();
                this.calls.submit(async move {
                    if let Err(err) = proxy.set_id(id).await {
                        log::warn!("session({method}): set_id({id}) failed: {err}");
                    }
                });
            }
        });
    }

    /// Tears the session down: outstanding and later operations fail with
    /// `Disposed` and the bound identity is released.
    pub(crate) fn dispose(&self) {
        let (identity, remote) = {
            let mut state = self.lock_state();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.busy = false;
            state.canceled = false;
            (state.identity.take(), state.remote.take())
        };
        log::debug!("session({}): disposed", self.method);
        self.calls.shutdown();
        self.gate.dispose();
        drop(remote);
        if let Some(identity) = identity {
            identity.forget_session(&self.me);
        }
    }

    fn ensure_registered(&self) {
        let identity_id = {
            let mut state = self.lock_state();
            if state.disposed {
                return;
            }
            if state.registration.state() == RegistrationState::Failed && state.remote.is_none() {
                log::debug!("session({}): retrying failed resolution", self.method);
                state.registration.reset();
                self.gate.mark_not_ready();
            }
            if !state.registration.begin() {
                return;
            }
            state.identity_id
        };
        log::debug!(
            "session({}): resolving remote object for identity {identity_id}",
            self.method
        );

        let channel = self.service.channel();
        let method = self.method.clone();
        let me = self.me.clone();
        self.calls.submit(async move {
            let result = channel.resolve_session_path(identity_id, &method).await;
            if let Some(this) = me.upgrade() {
                this.complete_registration(result);
            }
        });
    }

    fn complete_registration(&self, result: Result<ObjectPath, SignonError>) {
        let bound = result.and_then(|path| {
            if path.is_empty() {
                return Err(SignonError::protocol("cannot create remote AuthSession object"));
            }
            let proxy = self.service.channel().session_proxy(&path)?;
            Ok((path, proxy))
        });

        let error = {
            let mut state = self.lock_state();
            if state.disposed {
                return;
            }
            match bound {
                Ok((path, proxy)) => {
                    if let Err(err) = state.registration.mark_registered() {
                        log::warn!("session({}): ignoring registration: {err}", self.method);
                        return;
                    }
                    proxy.set_default_timeout(None);
                    let events = proxy.subscribe();
                    let handle = RemoteHandle::new(proxy, path, self.calls.token());
                    self.spawn_listener(events, handle.token());
                    log::debug!("session({}): registered at {}", self.method, handle.path());
                    state.remote = Some(handle);
                    None
                }
                Err(err) => {
                    log::warn!("session({}): registration failed: {err}", self.method);
                    if let Err(state_err) = state.registration.mark_failed() {
                        log::warn!("session({}): ignoring registration: {state_err}", self.method);
                        return;
                    }
                    Some(err)
                }
            }
        };
        self.gate.mark_ready(error);
    }

    fn spawn_listener(
        &self,
        mut events: broadcast::Receiver<SessionEvent>,
        token: CancellationToken,
    ) {
        let me = self.me.clone();
        self.service.spawn(async move {
            loop {
                let received = tokio::select! {
                    _ = token.cancelled() => break,
                    received = events.recv() => received,
                };
                let Some(this) = me.upgrade() else {
                    break;
                };
                match received {
                    Ok(SessionEvent::StateChanged { state, message }) => {
                        log::trace!("session({}): state {state}: {message}", this.method);
                        let _ = this.state_changes.send(StateChange { state, message });
                    }
                    Ok(SessionEvent::Unregistered) => this.unregistered(),
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("session({}): missed {skipped} remote event(s)", this.method);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    fn unregistered(&self) {
        let remote = {
            let mut state = self.lock_state();
            log::debug!("session({}): remote object unregistered", self.method);
            state.registration.reset();
            state.busy = false;
            state.canceled = false;
            self.gate.mark_not_ready();
            state.remote.take()
        };
        drop(remote);
    }

    fn remote_proxy(&self) -> Result<Arc<dyn SessionProxy>, SignonError> {
        self.lock_state()
            .remote
            .as_ref()
            .map(RemoteHandle::proxy)
            .ok_or_else(not_registered)
    }

    fn emit_pending(&self) {
        let _ = self.state_changes.send(StateChange {
            state: AuthSessionState::ProcessPending.code(),
            message: PROCESS_PENDING_MESSAGE.to_owned(),
        });
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for AuthSession {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(identity) = state.identity.take() {
            identity.forget_session(&self.me);
        }
    }
}

/// The live session a ready callback should act on, or why there is none.
fn ready_session(
    me: &Weak<AuthSession>,
    error: Option<SignonError>,
) -> Result<Arc<AuthSession>, SignonError> {
    if let Some(err) = error {
        return Err(err);
    }
    me.upgrade().ok_or(SignonError::Disposed)
}

fn not_registered() -> SignonError {
    SignonError::transport("session has no remote object")
}
