//! Cloud session provider interface.
//!
//! The provider owns the actual transport (TLS, MQTT, HTTP). It runs its own
//! worker task(s) and invokes the registered callbacks from there, so every
//! callback must be `Send + Sync` and must not block.
//!
//! Callback registration is global per provider handle: registering a new
//! message handler replaces the previous one.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{CloudError, Result};
use crate::job::PrintJobRequest;

/// `(return_code, reason_code)` from the broker connection.
pub type ServerConnectedFn = Arc<dyn Fn(i32, i32) + Send + Sync>;
/// `(http_status, body)` from a failed provider HTTP call.
pub type HttpErrorFn = Arc<dyn Fn(u32, &str) + Send + Sync>;
/// `(device_id, payload)` for every message published by a device.
pub type MessageFn = Arc<dyn Fn(&str, &str) + Send + Sync>;
/// Topic of a device channel that became ready.
pub type PrinterConnectedFn = Arc<dyn Fn(&str) + Send + Sync>;
/// Supplies the account region on demand.
pub type CountryCodeFn = Arc<dyn Fn() -> String + Send + Sync>;
/// `(online_flag, logged_in)` login state changes.
pub type UserLoginFn = Arc<dyn Fn(i32, bool) + Send + Sync>;
/// Topic whose subscription was rejected.
pub type SubscribeFailureFn = Arc<dyn Fn(&str) + Send + Sync>;

/// `(stage, code, message)` print job progress.
pub type StatusFn = Arc<dyn Fn(i32, i32, &str) + Send + Sync>;
/// Polled by the provider to abort a print submission.
pub type CancelledFn = Arc<dyn Fn() -> bool + Send + Sync>;
/// `(stage, job_info)` asks whether the provider should keep waiting.
pub type WaitFn = Arc<dyn Fn(i32, &str) -> bool + Send + Sync>;

/// Callbacks attached to one print submission.
#[derive(Clone)]
pub struct PrintHooks {
    /// Progress updates.
    pub on_status: StatusFn,
    /// Cancellation check.
    pub was_cancelled: CancelledFn,
    /// Wait check.
    pub on_wait: WaitFn,
}

/// Optional provider operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// `send_message(device, payload, qos)`.
    LegacySend,
    /// `send_message_to_printer(device, payload, qos, flag)`.
    PrinterSend,
    /// Print job submission.
    StartPrint,
    /// Client certificate refresh.
    UpdateCert,
    /// Device certificate installation.
    InstallCert,
    /// Explicit login-state query.
    LoginState,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::LegacySend => "send_message",
            Capability::PrinterSend => "send_message_to_printer",
            Capability::StartPrint => "start_print",
            Capability::UpdateCert => "update_cert",
            Capability::InstallCert => "install_device_cert",
            Capability::LoginState => "is_user_login",
        };
        f.write_str(name)
    }
}

/// Static provider configuration applied once per session.
#[derive(Debug, Clone, Default)]
pub struct ProviderSettings {
    /// Provider log directory.
    pub log_dir: PathBuf,
    /// Provider config directory.
    pub config_dir: PathBuf,
    /// Directory containing the CA certificate.
    pub cert_dir: PathBuf,
    /// CA certificate file name.
    pub cert_file: String,
    /// Account region.
    pub country_code: String,
    /// Extra headers for provider HTTP calls.
    pub http_headers: BTreeMap<String, String>,
}

/// Capability interface over a vendor cloud session.
///
/// Return codes are the provider's own: `0` is success and negative values
/// are opaque failures that callers surface verbatim.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Provider version string.
    fn version(&self) -> String;

    /// Whether an optional operation is available.
    fn supports(&self, capability: Capability) -> bool;

    /// Apply directories, certificate, region and headers, and start the
    /// provider's workers. Safe to call more than once.
    async fn configure(&self, settings: &ProviderSettings) -> Result<()>;

    /// Register the broker connection callback.
    fn set_on_server_connected(&self, f: ServerConnectedFn);
    /// Register the HTTP error callback.
    fn set_on_http_error(&self, f: HttpErrorFn);
    /// Replace the device message handler.
    fn set_on_message(&self, f: MessageFn);
    /// Register the device channel ready callback.
    fn set_on_printer_connected(&self, f: PrinterConnectedFn);
    /// Register the region supplier.
    fn set_get_country_code(&self, f: CountryCodeFn);
    /// Register the login state callback.
    fn set_on_user_login(&self, f: UserLoginFn);
    /// Register the subscription failure callback.
    fn set_on_subscribe_failure(&self, f: SubscribeFailureFn);

    /// Log in with a provider login envelope.
    async fn change_user(&self, envelope: &str) -> i32;

    /// Login state as seen by the provider.
    fn is_user_login(&self) -> bool {
        false
    }

    /// Start connecting to the broker. Completion is reported through the
    /// server-connected callback and [`CloudProvider::is_server_connected`].
    async fn connect_server(&self) -> i32;

    /// Poll the broker connection.
    fn is_server_connected(&self) -> bool;

    /// Select the device that subscriptions and sends refer to.
    fn set_user_selected_machine(&self, device_id: &str) -> i32;

    /// Subscribe to a channel kind (`"device"`) of the selected machine.
    async fn start_subscribe(&self, module: &str) -> i32;

    /// Legacy send primitive.
    async fn send_message(&self, _device_id: &str, _payload: &str, _qos: i32) -> Result<i32> {
        Err(CloudError::CapabilityMissing(Capability::LegacySend))
    }

    /// Current send primitive.
    async fn send_message_to_printer(
        &self,
        _device_id: &str,
        _payload: &str,
        _qos: i32,
        _flag: i32,
    ) -> Result<i32> {
        Err(CloudError::CapabilityMissing(Capability::PrinterSend))
    }

    /// Submit a print job. Returns immediately; progress arrives through
    /// `hooks.on_status`.
    async fn start_print(&self, _params: PrintJobRequest, _hooks: PrintHooks) -> Result<i32> {
        Err(CloudError::CapabilityMissing(Capability::StartPrint))
    }

    /// Refresh the client certificate.
    async fn update_cert(&self) -> Result<i32> {
        Err(CloudError::CapabilityMissing(Capability::UpdateCert))
    }

    /// Install the client certificate on a device.
    async fn install_device_cert(&self, _device_id: &str, _lan_only: bool) -> Result<i32> {
        Err(CloudError::CapabilityMissing(Capability::InstallCert))
    }

    /// Logged-in user id.
    fn user_id(&self) -> String;

    /// Stop background work without waiting for it.
    fn release(&self);
}

/// Creates provider handles.
pub trait ProviderFactory: Send + Sync {
    /// Create a provider logging under `log_dir`.
    fn create_agent(&self, log_dir: &Path) -> Result<Arc<dyn CloudProvider>>;
}

impl<F> ProviderFactory for F
where
    F: Fn(&Path) -> Result<Arc<dyn CloudProvider>> + Send + Sync,
{
    fn create_agent(&self, log_dir: &Path) -> Result<Arc<dyn CloudProvider>> {
        self(log_dir)
    }
}
