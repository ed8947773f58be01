//! Session manager: takes a provider from unconfigured to connected.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::collector::is_noise;
use crate::config::{BridgeConfig, Timings};
use crate::credentials::Credentials;
use crate::error::{CloudError, Result};
use crate::provider::{Capability, CloudProvider, MessageFn, ProviderFactory, ProviderSettings};

/// Lifecycle of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No provider handle yet.
    Unconfigured,
    /// Provider created and configured.
    Configured,
    /// Login submitted.
    LoggingIn,
    /// Login confirmed.
    LoggedIn,
    /// Broker connection requested.
    Connecting,
    /// Broker connection confirmed.
    Connected,
    /// A step failed; the session is unusable.
    Failed,
}

/// Flags written from provider callbacks.
#[derive(Debug, Default)]
pub struct SessionFlags {
    connected: AtomicBool,
    logged_in: AtomicBool,
}

impl SessionFlags {
    /// Broker connection confirmed by callback or poll.
    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Last login state reported by the provider.
    pub fn logged_in(&self) -> bool {
        self.logged_in.load(Ordering::Acquire)
    }
}

/// An authenticated provider session.
///
/// Owns the only provider handle. Dropping the session releases the
/// provider's background work without waiting for it.
pub struct Session {
    provider: Arc<dyn CloudProvider>,
    flags: Arc<SessionFlags>,
    state: Mutex<SessionState>,
    timings: Timings,
}

impl Session {
    /// Create and configure a provider, registering every callback.
    pub async fn initialize(factory: &dyn ProviderFactory, config: &BridgeConfig) -> Result<Self> {
        for dir in [config.log_dir(), config.config_dir(), config.cert_dir()] {
            if let Err(e) = std::fs::create_dir_all(&dir) {
                warn!("cannot create {}: {e}", dir.display());
            }
        }

        let provider = factory
            .create_agent(&config.log_dir())
            .map_err(|e| CloudError::ProviderUnavailable(e.to_string()))?;
        debug!("provider created, version {}", provider.version());

        let settings = ProviderSettings {
            log_dir: config.log_dir(),
            config_dir: config.config_dir(),
            cert_dir: config.cert_dir(),
            cert_file: config.cert_file.clone(),
            country_code: config.country_code.clone(),
            http_headers: config.http_headers.clone(),
        };
        provider.configure(&settings).await?;

        let flags = Arc::new(SessionFlags::default());
        register_callbacks(provider.as_ref(), &flags, &config.country_code);

        Ok(Self {
            provider,
            flags,
            state: Mutex::new(SessionState::Configured),
            timings: config.timings.clone(),
        })
    }

    /// Initialize, log in and connect.
    pub async fn open(
        factory: &dyn ProviderFactory,
        config: &BridgeConfig,
        credentials: &Credentials,
    ) -> Result<Self> {
        let session = Self::initialize(factory, config).await?;
        session.login(credentials).await?;
        session.connect().await?;
        Ok(session)
    }

    /// Submit the login envelope and confirm it after the settle delay.
    pub async fn login(&self, credentials: &Credentials) -> Result<()> {
        self.set_state(SessionState::LoggingIn);

        let code = self.provider.change_user(&login_envelope(credentials)).await;
        if code != 0 {
            self.set_state(SessionState::Failed);
            return Err(CloudError::LoginFailed(format!(
                "change_user returned {code}"
            )));
        }

        sleep(self.timings.login_settle).await;

        if self.provider.supports(Capability::LoginState) && !self.provider.is_user_login() {
            self.set_state(SessionState::Failed);
            return Err(CloudError::LoginFailed("login did not succeed".into()));
        }

        self.flags.logged_in.store(true, Ordering::Release);
        self.set_state(SessionState::LoggedIn);
        info!(
            "logged in as {} ({})",
            credentials.display_name, credentials.email
        );
        Ok(())
    }

    /// Request the broker connection and poll until it is confirmed.
    ///
    /// Either the server-connected callback or an explicit poll may confirm
    /// the connection first; both set the same flag.
    pub async fn connect(&self) -> Result<()> {
        self.set_state(SessionState::Connecting);

        let code = self.provider.connect_server().await;
        debug!("connect_server returned: {code}");

        let attempts = self.timings.connect_poll_attempts;
        for _ in 0..attempts {
            if self.flags.connected() {
                break;
            }
            sleep(self.timings.connect_poll_interval).await;
            if self.provider.is_server_connected() {
                self.flags.connected.store(true, Ordering::Release);
            }
        }

        if !self.flags.connected() {
            self.set_state(SessionState::Failed);
            return Err(CloudError::ConnectTimeout { attempts });
        }

        self.set_state(SessionState::Connected);
        info!("MQTT connected");
        Ok(())
    }

    /// The provider handle.
    pub fn provider(&self) -> &dyn CloudProvider {
        self.provider.as_ref()
    }

    /// Protocol timings.
    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    /// Callback-maintained flags.
    pub fn flags(&self) -> &SessionFlags {
        &self.flags
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the provider's message handler.
    pub fn set_message_handler(&self, handler: MessageFn) {
        self.provider.set_on_message(handler);
    }

    /// Reinstall the default logging message handler.
    pub fn restore_message_handler(&self) {
        self.provider.set_on_message(default_message_handler());
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        debug!("session {:?} -> {:?}", *state, next);
        *state = next;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.provider.release();
    }
}

/// Provider login envelope for a set of credentials.
///
/// The expiry values are fixed by the provider contract.
pub fn login_envelope(credentials: &Credentials) -> String {
    json!({
        "data": {
            "token": credentials.token,
            "refresh_token": credentials.effective_refresh_token(),
            "expires_in": "7200",
            "refresh_expires_in": "2592000",
            "user": {
                "uid": credentials.user_id,
                "name": credentials.display_name,
                "account": credentials.email,
                "avatar": credentials.avatar
            }
        }
    })
    .to_string()
}

/// Message handler used outside of any collection window.
pub fn default_message_handler() -> MessageFn {
    Arc::new(|device_id: &str, payload: &str| {
        if is_noise(payload) {
            return;
        }
        debug!("mqtt[{device_id}]: {}", truncate(payload, 200));
    })
}

fn register_callbacks(provider: &dyn CloudProvider, flags: &Arc<SessionFlags>, country_code: &str) {
    let connected = Arc::clone(flags);
    provider.set_on_server_connected(Arc::new(move |rc: i32, reason: i32| {
        debug!("server_connected: rc={rc} reason={reason}");
        if rc == 0 {
            connected.connected.store(true, Ordering::Release);
        }
    }));

    provider.set_on_http_error(Arc::new(|code: u32, body: &str| {
        debug!("HTTP error: {code} {}", truncate(body, 200));
    }));

    let country_code = country_code.to_string();
    provider.set_get_country_code(Arc::new(move || country_code.clone()));

    let login = Arc::clone(flags);
    provider.set_on_user_login(Arc::new(move |online: i32, logged_in: bool| {
        debug!("user_login: online={online} login={logged_in}");
        login.logged_in.store(logged_in, Ordering::Release);
    }));

    provider.set_on_message(default_message_handler());

    provider.set_on_printer_connected(Arc::new(|topic: &str| {
        debug!("printer_connected: {topic}");
    }));

    provider.set_on_subscribe_failure(Arc::new(|topic: &str| {
        warn!("subscribe failure: {topic}");
    }));
}

/// Prefix of `text` at most `max` bytes long, cut on a char boundary.
pub(crate) fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
