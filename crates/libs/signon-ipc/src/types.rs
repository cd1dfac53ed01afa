use std::collections::BTreeMap;
use std::fmt;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};

// ── Object paths ──────────────────────────────────────────────────────────────

/// Path of a remote object exported by the daemon.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ObjectPath(String);

impl ObjectPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectPath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

// ── Identity ──────────────────────────────────────────────────────────────────

/// Kind of service an identity is used for. Values combine as bit flags.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct IdentityType(u32);

impl IdentityType {
    pub const OTHER: Self = Self(0);
    pub const APP: Self = Self(1);
    pub const WEB: Self = Self(2);
    pub const NETWORK: Self = Self(4);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for IdentityType {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Stored credentials and metadata of an identity, as exchanged with the daemon.
///
/// Field names on the wire follow the daemon's dictionary keys.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[non_exhaustive]
pub struct IdentityInfo {
    #[serde(rename = "Id", default)]
    pub id: u32,
    #[serde(rename = "UserName", default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(rename = "Secret", default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(rename = "StoreSecret", default)]
    pub store_secret: bool,
    #[serde(rename = "Caption", default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(rename = "AuthMethods", default)]
    pub methods: BTreeMap<String, Vec<String>>,
    #[serde(rename = "Realms", default)]
    pub realms: Vec<String>,
    #[serde(rename = "ACL", default)]
    pub access_control_list: Vec<String>,
    #[serde(rename = "Type", default)]
    pub kind: IdentityType,
}

impl IdentityInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Sets the secret and whether the daemon should persist it.
    pub fn with_secret(mut self, secret: impl Into<String>, store_secret: bool) -> Self {
        self.secret = Some(secret.into());
        self.store_secret = store_secret;
        self
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    /// Allows `method` with the given mechanisms, replacing any previous list.
    pub fn with_method<I, S>(mut self, method: impl Into<String>, mechanisms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.methods
            .insert(method.into(), mechanisms.into_iter().map(Into::into).collect());
        self
    }

    pub fn remove_method(&mut self, method: &str) -> bool {
        self.methods.remove(method).is_some()
    }

    pub fn with_realms<I, S>(mut self, realms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.realms = realms.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_access_control_list<I, S>(mut self, acl: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.access_control_list = acl
            .into_iter()
            .map(Into::into)
            .collect();
        self
    }

    pub fn with_type(mut self, kind: IdentityType) -> Self {
        self.kind = kind;
        self
    }
}

/// Reply to a lookup of a stored identity.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[non_exhaustive]
pub struct IdentityRegistration {
    pub path: ObjectPath,
    /// Identity data the daemon sent along with the path, if any.
    pub info: Option<IdentityInfo>,
}

impl IdentityRegistration {
    pub fn new(path: ObjectPath, info: Option<IdentityInfo>) -> Self {
        Self { path, info }
    }
}

// ── Sessions ──────────────────────────────────────────────────────────────────

/// Parameters and results of an authentication round, keyed by name.
pub type SessionData = BTreeMap<String, serde_json::Value>;

/// Well-known keys of [`SessionData`].
pub mod session_keys {
    pub const USERNAME: &str = "UserName";
    pub const SECRET: &str = "Secret";
    pub const REALM: &str = "Realm";
    pub const NETWORK_PROXY: &str = "NetworkProxy";
    pub const UI_POLICY: &str = "UiPolicy";
    pub const CAPTION: &str = "Caption";
    pub const NETWORK_TIMEOUT: &str = "NetworkTimeout";
    pub const WINDOW_ID: &str = "WindowId";
    pub const RENEW_TOKEN: &str = "RenewToken";
}

/// How the daemon may interact with the user while processing a request.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UiPolicy {
    #[default]
    Default,
    RequestPassword,
    NoUserInteraction,
    Validation,
}

impl UiPolicy {
    pub fn code(self) -> u32 {
        match self {
            Self::Default => 0,
            Self::RequestPassword => 1,
            Self::NoUserInteraction => 2,
            Self::Validation => 3,
        }
    }
}

/// Progress states reported by a remote authentication session.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum AuthSessionState {
    NotStarted,
    ResolvingHost,
    Connecting,
    SendingData,
    WaitingReply,
    UserPending,
    UiRefreshing,
    ProcessPending,
    Started,
    ProcessCanceling,
    ProcessDone,
    Custom,
}

impl AuthSessionState {
    pub fn code(self) -> i32 {
        match self {
            Self::NotStarted => 0,
            Self::ResolvingHost => 1,
            Self::Connecting => 2,
            Self::SendingData => 3,
            Self::WaitingReply => 4,
            Self::UserPending => 5,
            Self::UiRefreshing => 6,
            Self::ProcessPending => 7,
            Self::Started => 8,
            Self::ProcessCanceling => 9,
            Self::ProcessDone => 10,
            Self::Custom => 11,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => Self::NotStarted,
            1 => Self::ResolvingHost,
            2 => Self::Connecting,
            3 => Self::SendingData,
            4 => Self::WaitingReply,
            5 => Self::UserPending,
            6 => Self::UiRefreshing,
            7 => Self::ProcessPending,
            8 => Self::Started,
            9 => Self::ProcessCanceling,
            10 => Self::ProcessDone,
            11 => Self::Custom,
            _ => return None,
        })
    }
}

// ── Events ────────────────────────────────────────────────────────────────────

/// Out-of-band notifications pushed by a remote identity object.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IdentityEvent {
    Updated,
    Removed,
    SignedOut,
    /// The daemon dropped the remote object.
    Unregistered,
}

impl IdentityEvent {
    /// Decodes the change code carried by the daemon's `info_updated` signal.
    pub fn from_change_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Updated),
            1 => Some(Self::Removed),
            2 => Some(Self::SignedOut),
            _ => None,
        }
    }
}

/// Out-of-band notifications pushed by a remote authentication session.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged { state: i32, message: String },
    Unregistered,
}
