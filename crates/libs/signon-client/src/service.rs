use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock, Weak};
use std::thread::{self, ThreadId};
use std::time::Duration;

use signon_ipc::{AuthServiceChannel, DaemonErrorCode, SignonError, StubChannel};
use tokio::runtime::Handle;

use crate::config::ServiceConfig;

/// Builds the channel used by [`AuthService::get`].
pub type ChannelFactory =
    fn(&ServiceConfig) -> Result<Arc<dyn AuthServiceChannel>, SignonError>;

static CHANNEL_FACTORY: RwLock<Option<ChannelFactory>> = RwLock::new(None);
static DEFAULT_SERVICES: OnceLock<Mutex<HashMap<ThreadId, Weak<AuthService>>>> = OnceLock::new();

/// Connection to the daemon's service object.
///
/// Identities and sessions hold an `Arc<AuthService>` and run their remote
/// calls on the runtime captured here.
pub struct AuthService {
    channel: Arc<dyn AuthServiceChannel>,
    config: ServiceConfig,
    runtime: Handle,
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AuthService {
    /// Wraps `channel` with the default configuration on the current runtime.
    pub fn new(channel: Arc<dyn AuthServiceChannel>) -> Result<Arc<Self>, SignonError> {
        Self::with_config(channel, ServiceConfig::default())
    }

    pub fn with_config(
        channel: Arc<dyn AuthServiceChannel>,
        config: ServiceConfig,
    ) -> Result<Arc<Self>, SignonError> {
        let runtime = Handle::try_current().map_err(|err| SignonError::InvalidArgument {
            message: format!("auth service needs a tokio runtime: {err}"),
        })?;
        Self::with_runtime(channel, config, runtime)
    }

    pub fn with_runtime(
        channel: Arc<dyn AuthServiceChannel>,
        config: ServiceConfig,
        runtime: Handle,
    ) -> Result<Arc<Self>, SignonError> {
        config.validate()?;
        log::debug!("auth service: using {} at {}", config.service_name, config.object_path);
        Ok(Arc::new(Self {
            channel,
            config,
            runtime,
        }))
    }

    /// The calling thread's shared instance, created on first use.
    ///
    /// Configuration comes from [`ServiceConfig::from_env`] and the channel
    /// from the factory installed with [`AuthService::set_channel_factory`].
    /// Without a factory the instance talks to a [`StubChannel`]. The instance
    /// lives as long as something holds it; a later call after every holder
    /// is gone creates a fresh one.
    pub fn get() -> Result<Arc<Self>, SignonError> {
        let registry = DEFAULT_SERVICES.get_or_init(|| Mutex::new(HashMap::new()));
        let mut services = registry.lock().unwrap_or_else(PoisonError::into_inner);
        let thread = thread::current().id();
        if let Some(service) = services.get(&thread).and_then(Weak::upgrade) {
            return Ok(service);
        }

        let config = ServiceConfig::from_env()?;
        let factory = *CHANNEL_FACTORY
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let channel = match factory {
            Some(factory) => factory(&config)?,
            None => {
                log::warn!("auth service: no channel factory installed, using stub channel");
                Arc::new(StubChannel) as Arc<dyn AuthServiceChannel>
            }
        };
        let service = Self::with_config(channel, config)?;
        services.retain(|_, existing| existing.strong_count() > 0);
        services.insert(thread, Arc::downgrade(&service));
        Ok(service)
    }

    /// Installs the factory [`AuthService::get`] uses for new instances.
    pub fn set_channel_factory(factory: ChannelFactory) {
        *CHANNEL_FACTORY
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(factory);
    }

    /// Authentication methods available on the daemon.
    pub async fn query_methods(&self) -> Result<Vec<String>, SignonError> {
        let methods = self.channel.list_methods().await?;
        log::debug!("auth service: {} method(s) available", methods.len());
        Ok(methods)
    }

    /// Mechanisms offered by `method`.
    pub async fn query_mechanisms(&self, method: &str) -> Result<Vec<String>, SignonError> {
        if method.is_empty() {
            return Err(SignonError::InvalidArgument {
                message: "method name must not be empty".to_owned(),
            });
        }
        self.channel.list_mechanisms(method).await.map_err(|err| match err {
            SignonError::Daemon {
                code: DaemonErrorCode::MethodNotKnown,
                ..
            } => SignonError::MethodNotKnown {
                method: method.to_owned(),
            },
            other => other,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub(crate) fn channel(&self) -> Arc<dyn AuthServiceChannel> {
        Arc::clone(&self.channel)
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub(crate) fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        drop(self.runtime.spawn(task));
    }

    /// Applies the configured identity call timeout to `call`.
    pub(crate) fn bounded<T, F>(
        &self,
        operation: &'static str,
        call: F,
    ) -> impl Future<Output = Result<T, SignonError>>
    where
        F: Future<Output = Result<T, SignonError>>,
    {
        bounded(self.config.call_timeout(), operation, call)
    }
}

async fn bounded<T, F>(
    limit: Option<Duration>,
    operation: &'static str,
    call: F,
) -> Result<T, SignonError>
where
    F: Future<Output = Result<T, SignonError>>,
{
    let Some(limit) = limit else {
        return call.await;
    };
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(SignonError::Daemon {
            code: DaemonErrorCode::TimedOut,
            message: format!("{operation} timed out after {}ms", limit.as_millis()),
        }),
    }
}
