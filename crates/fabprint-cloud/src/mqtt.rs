//! Cloud MQTT provider for Bambu printers.
//!
//! Talks to the vendor broker directly with `rumqttc`. The event loop runs
//! on its own tokio task and reports through the registered callbacks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS,
    SubscribeReasonCode, TlsConfiguration, Transport,
};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::CloudApi;
use crate::commands::{device_from_topic, report_topic, request_topic};
use crate::config::BridgeConfig;
use crate::error::{CloudError, Result};
use crate::provider::{
    Capability, CloudProvider, CountryCodeFn, HttpErrorFn, MessageFn, PrinterConnectedFn,
    ProviderFactory, ProviderSettings, ServerConnectedFn, SubscribeFailureFn, UserLoginFn,
};

/// Broker endpoint and REST base used by [`MqttCloudProvider`].
#[derive(Debug, Clone)]
pub struct MqttEndpoint {
    /// Broker host.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// REST API base, for resolving the user id.
    pub api_base: String,
}

impl MqttEndpoint {
    /// Endpoint from the bridge configuration.
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            host: config.resolved_broker_host(),
            port: config.broker_port,
            api_base: config.api_base.clone(),
        }
    }
}

/// Creates [`MqttCloudProvider`] handles.
#[derive(Debug, Clone)]
pub struct MqttProviderFactory {
    endpoint: MqttEndpoint,
}

impl MqttProviderFactory {
    /// Factory for the broker named by `config`.
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            endpoint: MqttEndpoint::from_config(config),
        }
    }
}

impl ProviderFactory for MqttProviderFactory {
    fn create_agent(&self, log_dir: &std::path::Path) -> Result<Arc<dyn CloudProvider>> {
        debug!("creating MQTT provider (log dir {})", log_dir.display());
        Ok(Arc::new(MqttCloudProvider::new(self.endpoint.clone())))
    }
}

#[derive(Default)]
struct Callbacks {
    server_connected: Option<ServerConnectedFn>,
    http_error: Option<HttpErrorFn>,
    message: Option<MessageFn>,
    printer_connected: Option<PrinterConnectedFn>,
    country_code: Option<CountryCodeFn>,
    user_login: Option<UserLoginFn>,
    subscribe_failure: Option<SubscribeFailureFn>,
}

/// State shared with the event loop task.
#[derive(Default)]
struct Shared {
    callbacks: Mutex<Callbacks>,
    connected: AtomicBool,
    subscribed: Mutex<Option<String>>,
}

impl Shared {
    fn callbacks(&self) -> std::sync::MutexGuard<'_, Callbacks> {
        self.callbacks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn server_connected(&self, rc: i32, reason: i32) {
        let f = self.callbacks().server_connected.clone();
        if let Some(f) = f {
            f(rc, reason);
        }
    }

    fn handle(&self, event: Event) {
        let Event::Incoming(packet) = event else {
            return;
        };
        match packet {
            Packet::ConnAck(ack) => {
                if ack.code == ConnectReturnCode::Success {
                    self.connected.store(true, Ordering::Release);
                    self.server_connected(0, 0);
                } else {
                    warn!("broker refused connection: {:?}", ack.code);
                    self.server_connected(-1, ack.code as i32);
                }
            }
            Packet::Publish(publish) => {
                let Some(device_id) = device_from_topic(&publish.topic) else {
                    debug!("ignoring publish on {}", publish.topic);
                    return;
                };
                let payload = String::from_utf8_lossy(&publish.payload);
                let f = self.callbacks().message.clone();
                if let Some(f) = f {
                    f(device_id, &payload);
                }
            }
            Packet::SubAck(ack) => {
                let topic = self
                    .subscribed
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .clone()
                    .unwrap_or_default();
                let rejected = ack
                    .return_codes
                    .iter()
                    .any(|c| matches!(c, SubscribeReasonCode::Failure));
                let callbacks = self.callbacks();
                let (ok, failed) = (
                    callbacks.printer_connected.clone(),
                    callbacks.subscribe_failure.clone(),
                );
                drop(callbacks);
                match (rejected, ok, failed) {
                    (true, _, Some(f)) => f(&topic),
                    (false, Some(f), _) => f(&topic),
                    _ => {}
                }
            }
            Packet::Disconnect => {
                self.connected.store(false, Ordering::Release);
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Login {
    uid: String,
    token: String,
}

/// Cloud provider speaking MQTT to the vendor broker.
pub struct MqttCloudProvider {
    endpoint: MqttEndpoint,
    settings: Mutex<ProviderSettings>,
    shared: Arc<Shared>,
    login: Mutex<Option<Login>>,
    selected: Mutex<Option<String>>,
    client: Mutex<Option<AsyncClient>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MqttCloudProvider {
    /// Unconfigured provider for `endpoint`.
    pub fn new(endpoint: MqttEndpoint) -> Self {
        Self {
            endpoint,
            settings: Mutex::new(ProviderSettings::default()),
            shared: Arc::new(Shared::default()),
            login: Mutex::new(None),
            selected: Mutex::new(None),
            client: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    fn client(&self) -> Option<AsyncClient> {
        self.client.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn login_info(&self) -> Option<Login> {
        self.login.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn settings(&self) -> ProviderSettings {
        self.settings.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn report_http_error(&self, err: &CloudError) {
        let (status, body) = match err {
            CloudError::Api { status, body } => (u32::from(*status), body.clone()),
            other => (0, other.to_string()),
        };
        let f = self.shared.callbacks().http_error.clone();
        if let Some(f) = f {
            f(status, &body);
        }
    }

    async fn resolve_uid(&self, token: &str) -> Result<String> {
        let settings = self.settings();
        let config = BridgeConfig {
            api_base: self.endpoint.api_base.clone(),
            http_headers: settings.http_headers,
            ..BridgeConfig::default()
        };
        CloudApi::new(&config, token)?.user_id().await
    }

    fn mqtt_options(&self, login: &Login) -> Result<MqttOptions> {
        let client_id = format!("fabprint_{}", uuid::Uuid::new_v4());
        let mut options = MqttOptions::new(client_id, &self.endpoint.host, self.endpoint.port);
        options.set_credentials(format!("u_{}", login.uid), &login.token);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_session(true);
        options.set_max_packet_size(1 << 20, 1 << 20);

        let settings = self.settings();
        let ca_path = settings.cert_dir.join(&settings.cert_file);
        let transport = if ca_path.is_file() {
            debug!("using CA file {}", ca_path.display());
            let ca = std::fs::read(&ca_path)?;
            Transport::tls_with_config(TlsConfiguration::Simple {
                ca,
                alpn: None,
                client_auth: None,
            })
        } else {
            Transport::tls_with_default_config()
        };
        options.set_transport(transport);
        Ok(options)
    }

    async fn publish(&self, device_id: &str, payload: &str, qos: i32) -> Result<i32> {
        let client = self
            .client()
            .ok_or_else(|| CloudError::Mqtt("not connected".into()))?;
        client
            .publish(request_topic(device_id), qos_from(qos), false, payload.as_bytes().to_vec())
            .await
            .map_err(|e| CloudError::Mqtt(e.to_string()))?;
        Ok(0)
    }
}

fn qos_from(qos: i32) -> QoS {
    match qos {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

async fn run_event_loop(mut event_loop: EventLoop, shared: Arc<Shared>) {
    loop {
        match event_loop.poll().await {
            Ok(event) => shared.handle(event),
            Err(e) => {
                let was_connected = shared.connected.swap(false, Ordering::AcqRel);
                if was_connected {
                    warn!("MQTT connection lost: {e}");
                } else {
                    debug!("MQTT connection error: {e}");
                }
                shared.server_connected(-1, 0);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// Login fields read from a provider login envelope.
fn parse_envelope(envelope: &str) -> Option<Login> {
    let value: Value = serde_json::from_str(envelope).ok()?;
    let data = value.get("data")?;
    let token = data.get("token")?.as_str()?.to_string();
    if token.is_empty() {
        return None;
    }
    let uid = match data.get("user").and_then(|u| u.get("uid")) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };
    Some(Login { uid, token })
}

#[async_trait]
impl CloudProvider for MqttCloudProvider {
    fn version(&self) -> String {
        format!("fabprint-mqtt/{}", env!("CARGO_PKG_VERSION"))
    }

    fn supports(&self, capability: Capability) -> bool {
        matches!(
            capability,
            Capability::LegacySend | Capability::PrinterSend | Capability::LoginState
        )
    }

    async fn configure(&self, settings: &ProviderSettings) -> Result<()> {
        debug!(
            "configure: region={} cert={}",
            settings.country_code, settings.cert_file
        );
        *self.settings.lock().unwrap_or_else(|e| e.into_inner()) = settings.clone();
        Ok(())
    }

    fn set_on_server_connected(&self, f: ServerConnectedFn) {
        self.shared.callbacks().server_connected = Some(f);
    }

    fn set_on_http_error(&self, f: HttpErrorFn) {
        self.shared.callbacks().http_error = Some(f);
    }

    fn set_on_message(&self, f: MessageFn) {
        self.shared.callbacks().message = Some(f);
    }

    fn set_on_printer_connected(&self, f: PrinterConnectedFn) {
        self.shared.callbacks().printer_connected = Some(f);
    }

    fn set_get_country_code(&self, f: CountryCodeFn) {
        self.shared.callbacks().country_code = Some(f);
    }

    fn set_on_user_login(&self, f: UserLoginFn) {
        self.shared.callbacks().user_login = Some(f);
    }

    fn set_on_subscribe_failure(&self, f: SubscribeFailureFn) {
        self.shared.callbacks().subscribe_failure = Some(f);
    }

    async fn change_user(&self, envelope: &str) -> i32 {
        let Some(mut login) = parse_envelope(envelope) else {
            warn!("login envelope has no token");
            return -1;
        };

        if login.uid.is_empty() {
            match self.resolve_uid(&login.token).await {
                Ok(uid) => login.uid = uid,
                Err(e) => {
                    warn!("cannot resolve user id: {e}");
                    self.report_http_error(&e);
                    return -1;
                }
            }
        }

        info!("user {} logged in", login.uid);
        *self.login.lock().unwrap_or_else(|e| e.into_inner()) = Some(login);
        let f = self.shared.callbacks().user_login.clone();
        if let Some(f) = f {
            f(1, true);
        }
        0
    }

    fn is_user_login(&self) -> bool {
        self.login_info().is_some()
    }

    async fn connect_server(&self) -> i32 {
        let Some(login) = self.login_info() else {
            warn!("connect_server before login");
            return -1;
        };
        let options = match self.mqtt_options(&login) {
            Ok(options) => options,
            Err(e) => {
                warn!("cannot build MQTT options: {e}");
                return -1;
            }
        };

        debug!("connecting to {}:{}", self.endpoint.host, self.endpoint.port);
        let (client, event_loop) = AsyncClient::new(options, 100);
        let task = tokio::spawn(run_event_loop(event_loop, Arc::clone(&self.shared)));

        *self.client.lock().unwrap_or_else(|e| e.into_inner()) = Some(client);
        if let Some(old) = self
            .task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(task)
        {
            old.abort();
        }
        0
    }

    fn is_server_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    fn set_user_selected_machine(&self, device_id: &str) -> i32 {
        *self.selected.lock().unwrap_or_else(|e| e.into_inner()) = Some(device_id.to_string());
        0
    }

    async fn start_subscribe(&self, module: &str) -> i32 {
        if module != "device" {
            return -1;
        }
        let Some(device_id) = self.selected.lock().unwrap_or_else(|e| e.into_inner()).clone() else {
            warn!("start_subscribe without a selected device");
            return -1;
        };
        let Some(client) = self.client() else {
            return -1;
        };

        let topic = report_topic(&device_id);
        *self
            .shared
            .subscribed
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(topic.clone());
        match client.subscribe(&topic, QoS::AtMostOnce).await {
            Ok(()) => 0,
            Err(e) => {
                warn!("subscribe {topic}: {e}");
                -1
            }
        }
    }

    async fn send_message(&self, device_id: &str, payload: &str, qos: i32) -> Result<i32> {
        self.publish(device_id, payload, qos).await
    }

    async fn send_message_to_printer(
        &self,
        device_id: &str,
        payload: &str,
        qos: i32,
        flag: i32,
    ) -> Result<i32> {
        if flag != 0 {
            debug!("send flag {flag} has no meaning on the broker path");
        }
        self.publish(device_id, payload, qos).await
    }

    fn user_id(&self) -> String {
        self.login_info().map(|l| l.uid).unwrap_or_default()
    }

    fn release(&self) {
        if let Some(task) = self.task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
        self.client.lock().unwrap_or_else(|e| e.into_inner()).take();
        self.shared.connected.store(false, Ordering::Release);
    }
}
