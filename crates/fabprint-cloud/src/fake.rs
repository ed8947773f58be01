//! Scripted in-process provider for tests.

use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use crate::config::BridgeConfig;
use crate::credentials::Credentials;
use crate::error::{CloudError, Result};
use crate::job::PrintJobRequest;
use crate::provider::{
    Capability, CloudProvider, CountryCodeFn, HttpErrorFn, MessageFn, PrintHooks,
    PrinterConnectedFn, ProviderFactory, ProviderSettings, ServerConnectedFn,
    SubscribeFailureFn, UserLoginFn,
};
use crate::session::Session;

/// How the fake broker connection behaves.
#[derive(Debug, Clone, Copy)]
pub enum ConnectBehavior {
    /// Fire the server-connected callback after a delay.
    Callback { after: Duration },
    /// Report connected on the n-th poll.
    Poll { after_polls: usize },
    /// Never connect.
    Never,
}

/// A payload sent through one of the send primitives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub primitive: &'static str,
    pub device_id: String,
    pub payload: String,
    pub qos: i32,
    pub flag: i32,
}

struct ReplyRule {
    trigger: String,
    payloads: Vec<String>,
    fired: bool,
}

struct Script {
    connect: ConnectBehavior,
    login_code: i32,
    login_confirms: bool,
    missing: HashSet<Capability>,
    legacy_codes: VecDeque<i32>,
    printer_codes: VecDeque<i32>,
    send_fallback: i32,
    print_codes: VecDeque<i32>,
    print_fallback: i32,
    print_stages: Vec<(i32, i32)>,
    print_rejection_stages: Vec<(i32, i32)>,
    replies: Vec<ReplyRule>,
    subscribe_replies: Vec<String>,
    selected: String,
}

#[derive(Default)]
struct Callbacks {
    server_connected: Option<ServerConnectedFn>,
    message: Option<MessageFn>,
    user_login: Option<UserLoginFn>,
}

struct Inner {
    script: Mutex<Script>,
    callbacks: Mutex<Callbacks>,
    calls: Mutex<Vec<String>>,
    sent: Mutex<Vec<Sent>>,
    envelopes: Mutex<Vec<String>>,
    print_requests: Mutex<Vec<PrintJobRequest>>,
    polls: AtomicUsize,
    connected: AtomicBool,
    logged_in: AtomicBool,
    dir: TempDir,
}

/// Scripted provider. Clones share state.
#[derive(Clone)]
pub struct FakeProvider {
    inner: Arc<Inner>,
}

impl FakeProvider {
    pub fn new() -> Self {
        let script = Script {
            connect: ConnectBehavior::Callback {
                after: Duration::from_millis(700),
            },
            login_code: 0,
            login_confirms: true,
            missing: HashSet::new(),
            legacy_codes: VecDeque::new(),
            printer_codes: VecDeque::new(),
            send_fallback: 0,
            print_codes: VecDeque::new(),
            print_fallback: 0,
            print_stages: Vec::new(),
            print_rejection_stages: Vec::new(),
            replies: Vec::new(),
            subscribe_replies: Vec::new(),
            selected: String::new(),
        };
        Self {
            inner: Arc::new(Inner {
                script: Mutex::new(script),
                callbacks: Mutex::new(Callbacks::default()),
                calls: Mutex::new(Vec::new()),
                sent: Mutex::new(Vec::new()),
                envelopes: Mutex::new(Vec::new()),
                print_requests: Mutex::new(Vec::new()),
                polls: AtomicUsize::new(0),
                connected: AtomicBool::new(false),
                logged_in: AtomicBool::new(false),
                dir: tempfile::tempdir().expect("tempdir"),
            }),
        }
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.inner.script.lock().unwrap()
    }

    pub fn connect(self, behavior: ConnectBehavior) -> Self {
        self.script().connect = behavior;
        self
    }

    pub fn login_code(self, code: i32) -> Self {
        self.script().login_code = code;
        self
    }

    pub fn login_confirms(self, confirms: bool) -> Self {
        self.script().login_confirms = confirms;
        self
    }

    pub fn without(self, capability: Capability) -> Self {
        self.script().missing.insert(capability);
        self
    }

    /// Return codes for successive legacy sends.
    pub fn legacy_codes(self, codes: &[i32]) -> Self {
        self.script().legacy_codes.extend(codes);
        self
    }

    /// Return codes for successive printer sends.
    pub fn printer_codes(self, codes: &[i32]) -> Self {
        self.script().printer_codes.extend(codes);
        self
    }

    /// Code for sends once the scripted queues are empty.
    pub fn send_fallback(self, code: i32) -> Self {
        self.script().send_fallback = code;
        self
    }

    /// Return codes for successive print submissions.
    pub fn print_codes(self, codes: &[i32]) -> Self {
        self.script().print_codes.extend(codes);
        self
    }

    pub fn print_fallback(self, code: i32) -> Self {
        self.script().print_fallback = code;
        self
    }

    /// `(stage, code)` updates played one second apart after a successful
    /// submission.
    pub fn print_stages(self, stages: &[(i32, i32)]) -> Self {
        self.script().print_stages = stages.to_vec();
        self
    }

    /// `(stage, code)` updates fired before a rejected submission returns.
    pub fn print_rejection_stages(self, stages: &[(i32, i32)]) -> Self {
        self.script().print_rejection_stages = stages.to_vec();
        self
    }

    /// Deliver `payloads` 100ms apart the first time a successful send
    /// contains `trigger`.
    pub fn reply_to(self, trigger: &str, payloads: &[&str]) -> Self {
        self.script().replies.push(ReplyRule {
            trigger: trigger.to_string(),
            payloads: payloads.iter().map(|p| p.to_string()).collect(),
            fired: false,
        });
        self
    }

    /// Deliver `payloads` 100ms apart once the device topic is subscribed,
    /// before anything is sent.
    pub fn reply_to_subscribe(self, payloads: &[&str]) -> Self {
        self.script()
            .subscribe_replies
            .extend(payloads.iter().map(|p| p.to_string()));
        self
    }

    pub fn factory(&self) -> impl ProviderFactory {
        let provider = self.clone();
        move |_: &Path| -> Result<Arc<dyn CloudProvider>> { Ok(Arc::new(provider.clone())) }
    }

    pub fn config(&self) -> BridgeConfig {
        BridgeConfig {
            agent_dir: self.inner.dir.path().to_path_buf(),
            ..BridgeConfig::default()
        }
    }

    pub fn credentials() -> Credentials {
        Credentials::parse(r#"{"token":"abc"}"#).unwrap()
    }

    pub async fn connected_session(&self) -> Session {
        Session::open(&self.factory(), &self.config(), &Self::credentials())
            .await
            .unwrap()
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.calls.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.inner.sent.lock().unwrap().clone()
    }

    pub fn envelopes(&self) -> Vec<String> {
        self.inner.envelopes.lock().unwrap().clone()
    }

    pub fn print_requests(&self) -> Vec<PrintJobRequest> {
        self.inner.print_requests.lock().unwrap().clone()
    }

    pub fn connect_polls(&self) -> usize {
        self.inner.polls.load(Ordering::SeqCst)
    }

    /// Invoke the current message handler now.
    pub fn deliver(&self, device_id: &str, payload: &str) {
        let handler = self.inner.callbacks.lock().unwrap().message.clone();
        if let Some(handler) = handler {
            handler(device_id, payload);
        }
    }

    /// Invoke the message handler after `delay` from a spawned task.
    pub fn deliver_after(&self, delay: Duration, device_id: &str, payload: &str) {
        let fake = self.clone();
        let device_id = device_id.to_string();
        let payload = payload.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fake.deliver(&device_id, &payload);
        });
    }

    fn record(&self, call: impl Into<String>) {
        self.inner.calls.lock().unwrap().push(call.into());
    }

    fn send(&self, sent: Sent) -> Result<i32> {
        let capability = match sent.primitive {
            "legacy" => Capability::LegacySend,
            _ => Capability::PrinterSend,
        };
        let (code, replies) = {
            let mut script = self.script();
            if script.missing.contains(&capability) {
                return Err(CloudError::CapabilityMissing(capability));
            }
            let queued = match capability {
                Capability::LegacySend => script.legacy_codes.pop_front(),
                _ => script.printer_codes.pop_front(),
            };
            let code = queued.unwrap_or(script.send_fallback);
            let mut replies = Vec::new();
            if code == 0 {
                for rule in script.replies.iter_mut() {
                    if !rule.fired && sent.payload.contains(&rule.trigger) {
                        rule.fired = true;
                        replies.extend(rule.payloads.iter().cloned());
                    }
                }
            }
            (code, replies)
        };

        for (i, payload) in replies.iter().enumerate() {
            self.deliver_after(Duration::from_millis(100 * (i as u64 + 1)), &sent.device_id, payload);
        }
        self.inner.sent.lock().unwrap().push(sent);
        Ok(code)
    }
}

#[async_trait]
impl CloudProvider for FakeProvider {
    fn version(&self) -> String {
        "fake-1.0".into()
    }

    fn supports(&self, capability: Capability) -> bool {
        !self.script().missing.contains(&capability)
    }

    async fn configure(&self, _settings: &ProviderSettings) -> Result<()> {
        self.record("configure");
        Ok(())
    }

    fn set_on_server_connected(&self, f: ServerConnectedFn) {
        self.inner.callbacks.lock().unwrap().server_connected = Some(f);
    }

    fn set_on_http_error(&self, _f: HttpErrorFn) {}

    fn set_on_message(&self, f: MessageFn) {
        self.inner.callbacks.lock().unwrap().message = Some(f);
    }

    fn set_on_printer_connected(&self, _f: PrinterConnectedFn) {}

    fn set_get_country_code(&self, _f: CountryCodeFn) {}

    fn set_on_user_login(&self, f: UserLoginFn) {
        self.inner.callbacks.lock().unwrap().user_login = Some(f);
    }

    fn set_on_subscribe_failure(&self, _f: SubscribeFailureFn) {}

    async fn change_user(&self, envelope: &str) -> i32 {
        self.record("change_user");
        self.inner.envelopes.lock().unwrap().push(envelope.to_string());
        let (code, confirms) = {
            let script = self.script();
            (script.login_code, script.login_confirms)
        };
        if code == 0 && confirms {
            self.inner.logged_in.store(true, Ordering::SeqCst);
            let callback = self.inner.callbacks.lock().unwrap().user_login.clone();
            if let Some(callback) = callback {
                callback(1, true);
            }
        }
        code
    }

    fn is_user_login(&self) -> bool {
        self.inner.logged_in.load(Ordering::SeqCst)
    }

    async fn connect_server(&self) -> i32 {
        self.record("connect_server");
        let behavior = self.script().connect;
        if let ConnectBehavior::Callback { after } = behavior {
            let fake = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                fake.inner.connected.store(true, Ordering::SeqCst);
                let callback = fake.inner.callbacks.lock().unwrap().server_connected.clone();
                if let Some(callback) = callback {
                    callback(0, 0);
                }
            });
        }
        0
    }

    fn is_server_connected(&self) -> bool {
        let polls = self.inner.polls.fetch_add(1, Ordering::SeqCst) + 1;
        match self.script().connect {
            ConnectBehavior::Poll { after_polls } => polls >= after_polls,
            ConnectBehavior::Callback { .. } => self.inner.connected.load(Ordering::SeqCst),
            ConnectBehavior::Never => false,
        }
    }

    fn set_user_selected_machine(&self, device_id: &str) -> i32 {
        self.record(format!("select:{device_id}"));
        self.script().selected = device_id.to_string();
        0
    }

    async fn start_subscribe(&self, module: &str) -> i32 {
        self.record(format!("subscribe:{module}"));
        let (device_id, replies) = {
            let mut script = self.script();
            (script.selected.clone(), std::mem::take(&mut script.subscribe_replies))
        };
        for (i, payload) in replies.iter().enumerate() {
            self.deliver_after(Duration::from_millis(100 * (i as u64 + 1)), &device_id, payload);
        }
        0
    }

    async fn send_message(&self, device_id: &str, payload: &str, qos: i32) -> Result<i32> {
        self.send(Sent {
            primitive: "legacy",
            device_id: device_id.to_string(),
            payload: payload.to_string(),
            qos,
            flag: 0,
        })
    }

    async fn send_message_to_printer(
        &self,
        device_id: &str,
        payload: &str,
        qos: i32,
        flag: i32,
    ) -> Result<i32> {
        self.send(Sent {
            primitive: "printer",
            device_id: device_id.to_string(),
            payload: payload.to_string(),
            qos,
            flag,
        })
    }

    async fn start_print(&self, params: PrintJobRequest, hooks: PrintHooks) -> Result<i32> {
        let (code, stages) = {
            let mut script = self.script();
            if script.missing.contains(&Capability::StartPrint) {
                return Err(CloudError::CapabilityMissing(Capability::StartPrint));
            }
            let code = script.print_codes.pop_front().unwrap_or(script.print_fallback);
            let stages = if code == 0 {
                script.print_stages.clone()
            } else {
                script.print_rejection_stages.clone()
            };
            (code, stages)
        };
        self.record("start_print");
        self.inner.print_requests.lock().unwrap().push(params);

        if code == 0 {
            tokio::spawn(async move {
                for (stage, stage_code) in stages {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    (hooks.on_status)(stage, stage_code, "");
                }
            });
        } else {
            for (stage, stage_code) in stages {
                (hooks.on_status)(stage, stage_code, "");
            }
        }
        Ok(code)
    }

    async fn update_cert(&self) -> Result<i32> {
        if !self.supports(Capability::UpdateCert) {
            return Err(CloudError::CapabilityMissing(Capability::UpdateCert));
        }
        self.record("update_cert");
        Ok(0)
    }

    async fn install_device_cert(&self, device_id: &str, lan_only: bool) -> Result<i32> {
        if !self.supports(Capability::InstallCert) {
            return Err(CloudError::CapabilityMissing(Capability::InstallCert));
        }
        self.record(format!("install_device_cert:{device_id}:{lan_only}"));
        Ok(0)
    }

    fn user_id(&self) -> String {
        "42".into()
    }

    fn release(&self) {
        self.record("release");
    }
}
