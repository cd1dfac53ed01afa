#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use signon_client::AuthService;
use signon_ipc::{
    AuthServiceChannel, AuthSessionState, IdentityEvent, IdentityInfo, IdentityProxy,
    IdentityRegistration, ObjectPath, SessionData, SessionEvent, SessionProxy, SignonError,
};
use tokio::sync::{broadcast, watch, Notify};

const SERVICE_PATH: &str = "/com/google/code/AccountsSSO/SingleSignOn";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Polls `condition` until it holds or a second has passed.
pub async fn eventually<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

struct Shared {
    calls: Mutex<Vec<String>>,
    stored: Mutex<BTreeMap<u32, IdentityInfo>>,
    next_id: AtomicU32,
    next_path: AtomicU32,
    registrations_open: watch::Sender<bool>,
    hold_process: AtomicBool,
    report_progress: AtomicBool,
    empty_session_paths: AtomicBool,
}

impl Shared {
    fn record(&self, call: impl Into<String>) {
        self.calls
            .lock()
            .expect("calls mutex poisoned")
            .push(call.into());
    }

    async fn registration_gate(&self) {
        let mut open = self.registrations_open.subscribe();
        let _ = open.wait_for(|open| *open).await;
    }

    fn next_path(&self, kind: &str) -> ObjectPath {
        let n = self.next_path.fetch_add(1, Ordering::SeqCst) + 1;
        ObjectPath::new(format!("{SERVICE_PATH}/{kind}_{n}"))
    }
}

/// In-memory stand-in for the signon daemon.
///
/// Every remote call is recorded by name in arrival order. Registration
/// replies can be held back, and remote events can be pushed to the proxies
/// it handed out.
pub struct MockDaemon {
    shared: Arc<Shared>,
    identities: Mutex<HashMap<ObjectPath, Arc<MockIdentity>>>,
    sessions: Mutex<HashMap<ObjectPath, Arc<MockSession>>>,
}

impl MockDaemon {
    pub fn new() -> Arc<Self> {
        init_logging();
        let (registrations_open, _) = watch::channel(true);
        Arc::new(Self {
            shared: Arc::new(Shared {
                calls: Mutex::new(Vec::new()),
                stored: Mutex::new(BTreeMap::new()),
                next_id: AtomicU32::new(0),
                next_path: AtomicU32::new(0),
                registrations_open,
                hold_process: AtomicBool::new(false),
                report_progress: AtomicBool::new(false),
                empty_session_paths: AtomicBool::new(false),
            }),
            identities: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
        })
    }

    pub fn service(self: &Arc<Self>) -> Arc<AuthService> {
        AuthService::new(Arc::clone(self) as Arc<dyn AuthServiceChannel>).expect("auth service")
    }

    pub fn calls(&self) -> Vec<String> {
        self.shared.calls.lock().expect("calls mutex poisoned").clone()
    }

    /// Number of recorded calls whose name starts with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|call| call.starts_with(prefix)).count()
    }

    pub fn hold_registrations(&self) {
        self.shared.registrations_open.send_replace(false);
    }

    pub fn release_registrations(&self) {
        self.shared.registrations_open.send_replace(true);
    }

    /// `process` waits for a remote cancel, then fails with `SessionCanceled`.
    pub fn hold_process(&self) {
        self.shared.hold_process.store(true, Ordering::SeqCst);
    }

    /// `process` reports `Started` on the session before answering.
    pub fn report_progress(&self) {
        self.shared.report_progress.store(true, Ordering::SeqCst);
    }

    pub fn answer_empty_session_paths(&self) {
        self.shared
            .empty_session_paths
            .store(true, Ordering::SeqCst);
    }

    pub fn answer_real_session_paths(&self) {
        self.shared
            .empty_session_paths
            .store(false, Ordering::SeqCst);
    }

    /// Stores `info` as if a previous client had, returning its id.
    pub fn seed_identity(&self, info: IdentityInfo) -> u32 {
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut info = info;
        info.id = id;
        self.shared
            .stored
            .lock()
            .expect("stored mutex poisoned")
            .insert(id, info);
        id
    }

    pub fn is_stored(&self, id: u32) -> bool {
        self.shared.stored.lock().expect("stored mutex poisoned").contains_key(&id)
    }

    /// Pushes `event` from every remote identity currently bound to `id`.
    pub fn emit_identity(&self, id: u32, event: IdentityEvent) {
        let identities = self.identities.lock().expect("identities mutex poisoned");
        for identity in identities.values().filter(|identity| identity.id() == id) {
            let _ = identity.events.send(event);
        }
    }

    /// Pushes `event` from every remote session for `method`.
    pub fn emit_session(&self, method: &str, event: SessionEvent) {
        let sessions = self.sessions.lock().expect("sessions mutex poisoned");
        for session in sessions.values().filter(|session| session.method == method) {
            let _ = session.events.send(event.clone());
        }
    }

    /// Default timeout the client configured on the remote session for `method`.
    pub fn session_timeout(&self, method: &str) -> Option<Option<Duration>> {
        let sessions = self.sessions.lock().expect("sessions mutex poisoned");
        sessions
            .values()
            .find(|session| session.method == method)
            .and_then(|session| *session.timeout.lock().expect("timeout mutex poisoned"))
    }

    fn bind_identity(&self, id: u32) -> ObjectPath {
        let path = self.shared.next_path("Identity");
        let identity = Arc::new(MockIdentity {
            shared: Arc::clone(&self.shared),
            id: Mutex::new(id),
            events: broadcast::channel(16).0,
        });
        self.identities
            .lock()
            .expect("identities mutex poisoned")
            .insert(path.clone(), identity);
        path
    }
}

fn mechanisms_for(method: &str) -> Option<Vec<String>> {
    let mechanisms: &[&str] = match method {
        "password" => &["password"],
        "ssotest" => &["mech1", "mech2", "mech3"],
        _ => return None,
    };
    Some(mechanisms.iter().map(|m| (*m).to_owned()).collect())
}

#[async_trait]
impl AuthServiceChannel for MockDaemon {
    async fn list_methods(&self) -> Result<Vec<String>, SignonError> {
        self.shared.record("list_methods");
        Ok(vec!["password".to_owned(), "ssotest".to_owned()])
    }

    async fn list_mechanisms(&self, method: &str) -> Result<Vec<String>, SignonError> {
        self.shared.record(format!("list_mechanisms({method})"));
        mechanisms_for(method).ok_or_else(|| SignonError::from_daemon(101, method))
    }

    async fn resolve_session_path(
        &self,
        identity_id: u32,
        method: &str,
    ) -> Result<ObjectPath, SignonError> {
        self.shared.record(format!("resolve_session_path({identity_id}, {method})"));
        self.shared.registration_gate().await;
        if self.shared.empty_session_paths.load(Ordering::SeqCst) {
            return Ok(ObjectPath::default());
        }
        if mechanisms_for(method).is_none() {
            return Err(SignonError::MethodNotKnown { method: method.to_owned() });
        }
        let path = self.shared.next_path("AuthSession");
        let session = Arc::new(MockSession {
            shared: Arc::clone(&self.shared),
            method: method.to_owned(),
            identity_id: Mutex::new(identity_id),
            timeout: Mutex::new(None),
            events: broadcast::channel(16).0,
            cancelled: Notify::new(),
        });
        self.sessions
            .lock()
            .expect("sessions mutex poisoned")
            .insert(path.clone(), session);
        Ok(path)
    }

    async fn register_new_identity(&self) -> Result<ObjectPath, SignonError> {
        self.shared.record("register_new_identity");
        self.shared.registration_gate().await;
        Ok(self.bind_identity(0))
    }

    async fn get_identity(&self, id: u32) -> Result<IdentityRegistration, SignonError> {
        self.shared.record(format!("get_identity({id})"));
        self.shared.registration_gate().await;
        let info = self.shared
            .stored
            .lock()
            .expect("stored mutex poisoned")
            .get(&id)
            .cloned();
        match info {
            Some(info) => Ok(IdentityRegistration::new(self.bind_identity(id), Some(info))),
            None => Err(SignonError::identity_not_found(format!("identity {id} not found"))),
        }
    }

    fn identity_proxy(&self, path: &ObjectPath) -> Result<Arc<dyn IdentityProxy>, SignonError> {
        let identities = self.identities.lock().expect("identities mutex poisoned");
        match identities.get(path) {
            Some(identity) => Ok(Arc::clone(identity) as Arc<dyn IdentityProxy>),
            None => Err(SignonError::protocol(format!("no identity at {path}"))),
        }
    }

    fn session_proxy(&self, path: &ObjectPath) -> Result<Arc<dyn SessionProxy>, SignonError> {
        let sessions = self.sessions.lock().expect("sessions mutex poisoned");
        match sessions.get(path) {
            Some(session) => Ok(Arc::clone(session) as Arc<dyn SessionProxy>),
            None => Err(SignonError::protocol(format!("no session at {path}"))),
        }
    }
}

pub struct MockIdentity {
    shared: Arc<Shared>,
    id: Mutex<u32>,
    events: broadcast::Sender<IdentityEvent>,
}

impl MockIdentity {
    fn id(&self) -> u32 {
        *self.id.lock().expect("id mutex poisoned")
    }

    fn stored_info(&self) -> Result<IdentityInfo, SignonError> {
        let id = self.id();
        self.shared
            .stored
            .lock()
            .expect("stored mutex poisoned")
            .get(&id)
            .cloned()
            .ok_or_else(|| SignonError::identity_not_found(format!("identity {id} not stored")))
    }
}

#[async_trait]
impl IdentityProxy for MockIdentity {
    async fn store(&self, info: &IdentityInfo) -> Result<u32, SignonError> {
        self.shared.record("store");
        let mut id = self.id.lock().expect("id mutex poisoned");
        if *id == 0 {
            *id = self.shared.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        }
        let mut info = info.clone();
        info.id = *id;
        self.shared
            .stored
            .lock()
            .expect("stored mutex poisoned")
            .insert(*id, info);
        Ok(*id)
    }

    async fn remove(&self) -> Result<(), SignonError> {
        self.shared.record("remove");
        let id = self.id();
        match self.shared.stored.lock().expect("stored mutex poisoned").remove(&id) {
            Some(_) => Ok(()),
            None => Err(SignonError::from_daemon(204, "nothing to remove")),
        }
    }

    async fn sign_out(&self) -> Result<bool, SignonError> {
        self.shared.record("sign_out");
        Ok(true)
    }

    async fn verify_secret(&self, secret: &str) -> Result<bool, SignonError> {
        self.shared.record("verify_secret");
        Ok(self
            .stored_info()
            .map(|info| info.secret.as_deref() == Some(secret))
            .unwrap_or(false))
    }

    async fn get_info(&self) -> Result<IdentityInfo, SignonError> {
        self.shared.record("get_info");
        self.stored_info()
    }

    fn subscribe(&self) -> broadcast::Receiver<IdentityEvent> {
        self.events.subscribe()
    }
}

pub struct MockSession {
    shared: Arc<Shared>,
    method: String,
    identity_id: Mutex<u32>,
    timeout: Mutex<Option<Option<Duration>>>,
    events: broadcast::Sender<SessionEvent>,
    cancelled: Notify,
}

#[async_trait]
impl SessionProxy for MockSession {
    async fn query_available_mechanisms(
        &self,
        wanted: &[String],
    ) -> Result<Vec<String>, SignonError> {
        self.shared.record("query_available_mechanisms");
        let supported = mechanisms_for(&self.method).unwrap_or_default();
        Ok(wanted.iter().filter(|m| supported.contains(m)).cloned().collect())
    }

    async fn process(
        &self,
        session_data: &SessionData,
        mechanism: &str,
    ) -> Result<SessionData, SignonError> {
        self.shared.record(format!("process({mechanism})"));
        if self.shared.report_progress.load(Ordering::SeqCst) {
            let _ = self.events.send(SessionEvent::StateChanged {
                state: AuthSessionState::Started.code(),
                message: "started".to_owned(),
            });
        }
        if self.shared.hold_process.load(Ordering::SeqCst) {
            self.cancelled.notified().await;
            return Err(SignonError::SessionCanceled);
        }
        let mut reply = session_data.clone();
        reply.insert("Token".to_owned(), format!("{}-{mechanism}", self.method).into());
        Ok(reply)
    }

    async fn cancel(&self) -> Result<(), SignonError> {
        self.shared.record("cancel");
        self.cancelled.notify_one();
        Ok(())
    }

    async fn set_id(&self, id: u32) -> Result<(), SignonError> {
        self.shared.record(format!("set_id({id})"));
        *self
            .identity_id
            .lock()
            .expect("identity id mutex poisoned") = id;
        Ok(())
    }

    fn set_default_timeout(&self, timeout: Option<Duration>) {
        *self
            .timeout
            .lock()
            .expect("timeout mutex poisoned") = Some(timeout);
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}
