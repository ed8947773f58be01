//! Bridge configuration and protocol timings.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;

/// Every wait, poll and retry bound used by the orchestrators.
///
/// These describe the provider's timing contract. Nothing here blocks
/// indefinitely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timings {
    /// Wait after login before checking the confirmed state.
    pub login_settle: Duration,
    /// Interval between connection polls.
    pub connect_poll_interval: Duration,
    /// Number of connection polls before giving up.
    pub connect_poll_attempts: u32,
    /// Wait after subscribing before the first send.
    pub subscribe_settle: Duration,
    /// Pushall send attempts.
    pub pushall_attempts: u32,
    /// Wait between failed pushall sends.
    pub pushall_backoff: Duration,
    /// Collection window for `status`.
    pub status_window: Duration,
    /// Upper bound on waiting for a stop acknowledgment.
    pub cancel_ack_window: Duration,
    /// Resolution of the stop acknowledgment check.
    pub cancel_ack_poll: Duration,
    /// Wait after pushall before delivering a raw payload.
    pub raw_warmup: Duration,
    /// Wait after pushall before certificate calls.
    pub cert_warmup: Duration,
    /// Wait after each certificate call.
    pub cert_step_settle: Duration,
    /// Collection window after requesting the certificate list.
    pub cert_list_window: Duration,
    /// Wait after pushall before submitting a print.
    pub print_warmup: Duration,
    /// Print submission attempts while the provider reports not-ready.
    pub print_retry_attempts: u32,
    /// Wait between not-ready print submissions.
    pub print_retry_delay: Duration,
    /// Resolution of the print completion check.
    pub print_poll_interval: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            login_settle: Duration::from_secs(2),
            connect_poll_interval: Duration::from_millis(500),
            connect_poll_attempts: 30,
            subscribe_settle: Duration::from_secs(3),
            pushall_attempts: 3,
            pushall_backoff: Duration::from_secs(2),
            status_window: Duration::from_secs(10),
            cancel_ack_window: Duration::from_secs(10),
            cancel_ack_poll: Duration::from_secs(1),
            raw_warmup: Duration::from_secs(20),
            cert_warmup: Duration::from_secs(10),
            cert_step_settle: Duration::from_secs(5),
            cert_list_window: Duration::from_secs(10),
            print_warmup: Duration::from_secs(20),
            print_retry_attempts: 5,
            print_retry_delay: Duration::from_secs(15),
            print_poll_interval: Duration::from_secs(1),
        }
    }
}

/// Bridge configuration, optionally loaded from TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Root of the provider's log/config/cert directories.
    pub agent_dir: PathBuf,
    /// CA certificate file name inside `<agent_dir>/cert`.
    pub cert_file: String,
    /// Account region.
    pub country_code: String,
    /// REST API base URL.
    pub api_base: String,
    /// MQTT broker host; derived from the region when unset.
    pub broker_host: Option<String>,
    /// MQTT broker port.
    pub broker_port: u16,
    /// Extra headers sent with every provider HTTP request.
    pub http_headers: BTreeMap<String, String>,
    /// Protocol timings.
    #[serde(skip)]
    pub timings: Timings,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        let http_headers = [
            ("X-BBL-Client-Type", "slicer"),
            ("X-BBL-Client-Name", "BambuStudio"),
            ("X-BBL-Client-Version", "02.05.01.52"),
            ("X-BBL-OS-Type", "linux"),
            ("X-BBL-OS-Version", "6.8.0"),
            ("X-BBL-Device-ID", "fabprint-headless-001"),
            ("X-BBL-Language", "en"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            agent_dir: PathBuf::from("/tmp/bambu_agent"),
            cert_file: "slicer_base64.cer".into(),
            country_code: "US".into(),
            api_base: "https://api.bambulab.com".into(),
            broker_host: None,
            broker_port: 8883,
            http_headers,
            timings: Timings::default(),
        }
    }
}

impl BridgeConfig {
    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load configuration from an optional file, then apply environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_toml(&std::fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply `BAMBU_CLOUD_HOST`, `BAMBU_API_BASE` and `BAMBU_AGENT_DIR`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("BAMBU_CLOUD_HOST").filter(|v| !v.is_empty()) {
            self.broker_host = Some(host);
        }
        if let Some(base) = lookup("BAMBU_API_BASE").filter(|v| !v.is_empty()) {
            self.api_base = base;
        }
        if let Some(dir) = lookup("BAMBU_AGENT_DIR").filter(|v| !v.is_empty()) {
            self.agent_dir = PathBuf::from(dir);
        }
    }

    /// Provider log directory.
    pub fn log_dir(&self) -> PathBuf {
        self.agent_dir.join("log")
    }

    /// Provider config directory.
    pub fn config_dir(&self) -> PathBuf {
        self.agent_dir.join("config")
    }

    /// Provider certificate directory.
    pub fn cert_dir(&self) -> PathBuf {
        self.agent_dir.join("cert")
    }

    /// Broker host, falling back to the regional default.
    pub fn resolved_broker_host(&self) -> String {
        match &self.broker_host {
            Some(host) => host.clone(),
            None => default_broker_host(&self.country_code).to_string(),
        }
    }
}

/// Regional MQTT broker.
pub fn default_broker_host(country_code: &str) -> &'static str {
    if country_code.eq_ignore_ascii_case("CN") {
        "cn.mqtt.bambulab.com"
    } else {
        "us.mqtt.bambulab.com"
    }
}
