use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use signon_ipc::{IdentityEvent, IdentityInfo, IdentityProxy, IdentityRegistration, SignonError};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

use crate::dispatch::CallQueue;
use crate::gate::ReadyGate;
use crate::registration::{Registration, RegistrationState, RemoteHandle};
use crate::reply::{self, Reply, ReplySender};
use crate::service::AuthService;
use crate::session::{self, AuthSession};

const NOTICE_CAPACITY: usize = 16;
const ALREADY_REMOVED: &str = "Already removed from database.";

/// Local notifications raised by an [`Identity`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum IdentityNotice {
    /// The daemon reported a change; the next `query_info` refetches.
    InfoUpdated,
    Removed,
    /// Every session bound to the identity has been disposed.
    SignedOut,
}

struct IdentityState {
    id: u32,
    registration: Registration,
    remote: Option<RemoteHandle<dyn IdentityProxy>>,
    cached_info: Option<IdentityInfo>,
    info_stale: bool,
    removed: bool,
    signed_out: bool,
    /// Bound sessions by method. Sessions keep the identity alive, not the
    /// other way around.
    sessions: Vec<(String, Weak<AuthSession>)>,
}

impl IdentityState {
    fn new(id: u32) -> Self {
        Self {
            id,
            registration: Registration::default(),
            remote: None,
            cached_info: None,
            info_stale: true,
            removed: false,
            signed_out: false,
            sessions: Vec::new(),
        }
    }
}

enum InfoSource {
    Cached(Option<IdentityInfo>),
    Remote(Arc<dyn IdentityProxy>),
}

/// A set of credentials stored by the daemon.
///
/// The remote identity object is resolved lazily: the first operation asks
/// the daemon for it and every operation waits until that answer arrives.
/// Operations are queued when called and return a [`Reply`].
pub struct Identity {
    me: Weak<Identity>,
    service: Arc<AuthService>,
    state: Mutex<IdentityState>,
    gate: ReadyGate,
    calls: CallQueue,
    notices: broadcast::Sender<IdentityNotice>,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity").finish_non_exhaustive()
    }
}

impl Identity {
    /// A new identity, not yet stored. Nothing is sent to the daemon until
    /// the first operation.
    pub fn new(service: &Arc<AuthService>) -> Arc<Self> {
        Self::build(service, 0)
    }

    /// The stored identity `id`. Resolution starts immediately.
    pub fn from_db(service: &Arc<AuthService>, id: u32) -> Result<Arc<Self>, SignonError> {
        if id == 0 {
            return Err(SignonError::identity_not_found("identity id 0 is never stored"));
        }
        let identity = Self::build(service, id);
        identity.ensure_registered();
        Ok(identity)
    }

    fn build(service: &Arc<AuthService>, id: u32) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            service: Arc::clone(service),
            state: Mutex::new(IdentityState::new(id)),
            gate: ReadyGate::new(),
            calls: CallQueue::spawn(service.runtime(), format!("identity({id})")),
            notices: broadcast::channel(NOTICE_CAPACITY).0,
        })
    }

    /// Database id, or 0 while the identity is not stored.
    pub fn id(&self) -> u32 {
        self.lock_state().id
    }

    pub fn is_removed(&self) -> bool {
        self.lock_state().removed
    }

    pub fn is_signed_out(&self) -> bool {
        self.lock_state().signed_out
    }

    pub fn registration_state(&self) -> RegistrationState {
        self.lock_state().registration.state()
    }

    /// Error latched by the last registration attempt.
    pub fn last_error(&self) -> Option<SignonError> {
        self.gate.last_error()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IdentityNotice> {
        self.notices.subscribe()
    }

    pub fn service(&self) -> &Arc<AuthService> {
        &self.service
    }

    /// Stores `info` and resolves to the id the daemon assigned.
    ///
    /// Bound sessions are moved to the new id before the reply resolves.
    pub fn store(&self, info: IdentityInfo) -> Reply<u32> {
        self.call_remote(
            "store",
            move |proxy| async move { proxy.store(&info).await },
            |this, id| this.stored(*id),
        )
    }

    /// Current identity data; `None` while the identity is not stored.
    ///
    /// Answers from the cache unless the daemon reported a change since the
    /// last fetch.
    pub fn query_info(&self) -> Reply<Option<IdentityInfo>> {
        let (reply, pending) = reply::channel();
        self.when_ready(reply, |this, reply| match this.info_source() {
            Err(err) => reply.send(Err(err)),
            Ok(InfoSource::Cached(info)) => reply.send(Ok(info)),
            Ok(InfoSource::Remote(proxy)) => {
                let call = this.service.bounded("get_info", async move { proxy.get_info().await });
                let me = this.me.clone();
                this.calls.submit(async move {
                    let result = call.await;
                    if let (Ok(info), Some(this)) = (&result, me.upgrade()) {
                        this.cache_info(info.clone());
                    }
                    reply.send(result.map(Some));
                });
            }
        });
        pending
    }

    pub fn verify_secret(&self, secret: &str) -> Reply<bool> {
        let secret = secret.to_owned();
        self.call_remote(
            "verify_secret",
            move |proxy| async move { proxy.verify_secret(&secret).await },
            |_, _| {},
        )
    }

    /// Deletes the identity from the daemon's database. Once confirmed the
    /// identity is marked removed and its id resets to 0.
    pub fn remove(&self) -> Reply<()> {
        self.call_remote(
            "remove",
            |proxy| async move { proxy.remove().await },
            |this, _| {
                if this.mark_removed() {
                    this.notify(IdentityNotice::Removed);
                }
            },
        )
    }

    /// Asks the daemon to sign out every session using this identity.
    pub fn signout(&self) -> Reply<()> {
        self.call_remote(
            "sign_out",
            |proxy| async move {
                let accepted = proxy.sign_out().await?;
                log::debug!("identity: sign out accepted={accepted}");
                Ok::<_, SignonError>(())
            },
            |_, _| {},
        )
    }

    /// Starts an authentication session for `method` bound to this identity.
    ///
    /// At most one live session per method is allowed. The session holds the
    /// identity alive until it is dropped.
    pub fn create_session(&self, method: &str) -> Result<Arc<AuthSession>, SignonError> {
        session::validate_method(method)?;
        let this = self.me.upgrade().ok_or(SignonError::Disposed)?;
        let mut state = self.lock_state();
        state
            .sessions
            .retain(|(_, session)| session.strong_count() > 0);
        if state.sessions.iter().any(|(existing, _)| existing == method) {
            log::debug!("identity({}): session for {method} already requested", state.id);
            return Err(SignonError::MethodNotAvailable {
                method: method.to_owned(),
            });
        }

        let session = AuthSession::for_identity(this, state.id, method);
        state
            .sessions
            .push((method.to_owned(), Arc::downgrade(&session)));
        state.signed_out = false;
        Ok(session)
    }

    pub(crate) fn forget_session(&self, session: &Weak<AuthSession>) {
        self.lock_state()
            .sessions
            .retain(|(_, existing)| !existing.ptr_eq(session) && existing.strong_count() > 0);
    }

    fn call_remote<T, C, Fut, S>(&self, operation: &'static str, call: C, on_success: S) -> Reply<T>
    where
        T: Send + 'static,
        C: FnOnce(Arc<dyn IdentityProxy>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, SignonError>> + Send + 'static,
        S: FnOnce(&Identity, &T) + Send + 'static,
    {
        let (reply, pending) = reply::channel();
        self.when_ready(reply, move |this, reply| {
            let proxy = match this.remote_for_call() {
                Ok(proxy) => proxy,
                Err(err) => {
                    reply.send(Err(err));
                    return;
                }
            };
            let call = this.service.bounded(operation, call(proxy));
            let me = this.me.clone();
            this.calls.submit(async move {
                let result = call.await;
                match (&result, me.upgrade()) {
                    (Ok(value), Some(this)) => on_success(&this, value),
                    (Err(err), _) => log::debug!("identity: {operation} failed: {err}"),
                    (Ok(_), None) => {}
                }
                reply.send(result);
            });
        });
        pending
    }

    /// Runs `operation` once the remote object is resolved. A removed
    /// identity fails first, then the latched registration error.
    fn when_ready<T, F>(&self, reply: ReplySender<T>, operation: F)
    where
        T: Send + 'static,
        F: FnOnce(Arc<Identity>, ReplySender<T>) + Send + 'static,
    {
        self.ensure_registered();
        let me = self.me.clone();
        self.gate.call_when_ready(move |error| {
            let Some(this) = me.upgrade() else {
                reply.send(Err(error.unwrap_or(SignonError::Disposed)));
                return;
            };
            if this.is_removed() {
                reply.send(Err(SignonError::identity_not_found(ALREADY_REMOVED)));
                return;
            }
            match error {
                Some(err) => reply.send(Err(err)),
                None => operation(this, reply),
            }
        });
    }

    fn ensure_registered(&self) {
        let id = {
            let mut state = self.lock_state();
            if !state.registration.begin() {
                return;
            }
            state.id
        };
        log::debug!("identity({id}): resolving remote object");

        let channel = self.service.channel();
        let lookup = self.service.bounded("identity registration", async move {
            if id == 0 {
                let path = channel.register_new_identity().await?;
                Ok(IdentityRegistration::new(path, None))
            } else {
                channel.get_identity(id).await
            }
        });
        let me = self.me.clone();
        self.calls.submit(async move {
            let result = lookup.await;
            if let Some(this) = me.upgrade() {
                this.complete_registration(result);
            }
        });
    }

    fn complete_registration(&self, result: Result<IdentityRegistration, SignonError>) {
        let bound = result.and_then(|registration| {
            let proxy = self
                .service
                .channel()
                .identity_proxy(&registration.path)?;
            Ok((registration, proxy))
        });

        let error = {
            let mut state = self.lock_state();
            match bound {
                Ok((registration, proxy)) => {
                    if let Err(err) = state.registration.mark_registered() {
                        log::warn!("identity({}): ignoring registration: {err}", state.id);
                        return;
                    }
                    let events = proxy.subscribe();
                    let handle = RemoteHandle::new(proxy, registration.path, self.calls.token());
                    self.spawn_listener(events, handle.token());
                    log::debug!("identity({}): registered at {}", state.id, handle.path());
                    state.info_stale = registration.info.is_none();
                    state.cached_info = registration.info;
                    state.remote = Some(handle);
                    None
                }
                Err(err) => {
                    log::warn!("identity({}): registration failed: {err}", state.id);
                    if let Err(state_err) = state.registration.mark_failed() {
                        log::warn!("identity({}): ignoring registration: {state_err}", state.id);
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
        mut events: broadcast::Receiver<IdentityEvent>,
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
                    Ok(event) => this.handle_event(event),
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("identity({}): missed {skipped} remote event(s)", this.id());
                        this.invalidate_info();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    fn handle_event(&self, event: IdentityEvent) {
        log::trace!("identity({}): remote event {event:?}", self.id());
        match event {
            IdentityEvent::Updated => {
                self.invalidate_info();
                self.notify(IdentityNotice::InfoUpdated);
            }
            IdentityEvent::Removed => {
                if self.mark_removed() {
                    self.notify(IdentityNotice::Removed);
                }
            }
            IdentityEvent::SignedOut => self.sign_out_sessions(),
            IdentityEvent::Unregistered => self.unregistered(),
        }
    }

    fn sign_out_sessions(&self) {
        let (id, sessions) = {
            let mut state = self.lock_state();
            if state.signed_out {
                return;
            }
            state.signed_out = true;
            (state.id, std::mem::take(&mut state.sessions))
        };
        log::debug!("identity({id}): signed out, disposing {} session(s)", sessions.len());
        for (_, session) in sessions {
            if let Some(session) = session.upgrade() {
                session.dispose();
            }
        }
        self.notify(IdentityNotice::SignedOut);
    }

    fn unregistered(&self) {
        let handle = {
            let mut state = self.lock_state();
            log::debug!("identity({}): remote object unregistered", state.id);
            state.registration.reset();
            state.cached_info = None;
            state.info_stale = true;
            state.removed = false;
            state.signed_out = false;
            self.gate.mark_not_ready();
            state.remote.take()
        };
        drop(handle);
    }

    fn stored(&self, id: u32) {
        let sessions: Vec<Weak<AuthSession>> = {
            let mut state = self.lock_state();
            state.id = id;
            state.removed = false;
            state
                .sessions
                .iter()
                .map(|(_, session)| session.clone())
                .collect()
        };
        log::debug!("identity({id}): stored");
        for session in sessions.iter().filter_map(Weak::upgrade) {
            session.set_id(id);
        }
    }

    /// Returns `true` the first time the identity is marked removed.
    fn mark_removed(&self) -> bool {
        let mut state = self.lock_state();
        if state.removed {
            return false;
        }
        log::debug!("identity({}): removed", state.id);
        state.removed = true;
        state.cached_info = None;
        state.id = 0;
        true
    }

    fn invalidate_info(&self) {
        let mut state = self.lock_state();
        state.cached_info = None;
        state.info_stale = true;
    }

    fn cache_info(&self, info: IdentityInfo) {
        let mut state = self.lock_state();
        state.cached_info = Some(info);
        state.info_stale = false;
    }

    fn info_source(&self) -> Result<InfoSource, SignonError> {
        let state = self.lock_state();
        if state.removed {
            return Err(SignonError::identity_not_found(ALREADY_REMOVED));
        }
        if state.id == 0 {
            return Ok(InfoSource::Cached(None));
        }
        if !state.info_stale && state.cached_info.is_some() {
            return Ok(InfoSource::Cached(state.cached_info.clone()));
        }
        state
            .remote
            .as_ref()
            .map(|remote| InfoSource::Remote(remote.proxy()))
            .ok_or_else(not_registered)
    }

    fn remote_for_call(&self) -> Result<Arc<dyn IdentityProxy>, SignonError> {
        let state = self.lock_state();
        if state.removed {
            return Err(SignonError::identity_not_found(ALREADY_REMOVED));
        }
        state
            .remote
            .as_ref()
            .map(RemoteHandle::proxy)
            .ok_or_else(not_registered)
    }

    fn notify(&self, notice: IdentityNotice) {
        // No subscribers is fine.
        let _ = self.notices.send(notice);
    }

    fn lock_state(&self) -> MutexGuard<'_, IdentityState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn not_registered() -> SignonError {
    SignonError::transport("identity has no remote object")
}
