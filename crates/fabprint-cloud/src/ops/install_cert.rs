//! `install-cert`: install the client certificate on a device.

use serde::Serialize;
use serde_json::value::RawValue;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::channel::DeviceChannel;
use crate::collector::ResponseCollector;
use crate::commands::DeviceCommand;
use crate::config::BridgeConfig;
use crate::credentials::Credentials;
use crate::error::{CloudError, Result};
use crate::provider::{Capability, ProviderFactory};
use crate::report::{ExitCode, Outcome};
use crate::session::Session;

#[derive(Serialize)]
struct CertReport<'a> {
    command: &'static str,
    device_id: &'a str,
    messages: Vec<Box<RawValue>>,
}

/// Refresh and install the certificate, then list the device's certificates.
pub async fn run(
    factory: &dyn ProviderFactory,
    config: &BridgeConfig,
    credentials: &Credentials,
    device_id: &str,
) -> Result<Outcome> {
    let session = Session::initialize(factory, config).await?;
    let provider = session.provider();
    if !provider.supports(Capability::InstallCert) {
        return Err(CloudError::CapabilityMissing(Capability::InstallCert));
    }
    session.login(credentials).await?;
    session.connect().await?;

    let timings = session.timings();
    let collector = ResponseCollector::attach_with(&session, |m| {
        debug!("mqtt: {}", crate::session::truncate(&m.payload, 500));
    });
    let channel = DeviceChannel::subscribe(&session, device_id).await;
    super::request_full_state(&channel).await;
    sleep(timings.cert_warmup).await;

    if provider.supports(Capability::UpdateCert) {
        info!("calling update_cert");
        let code = provider.update_cert().await?;
        info!("update_cert returned: {code}");
        sleep(timings.cert_step_settle).await;
    }

    info!("calling install_device_cert({device_id}, false)");
    let code = provider.install_device_cert(device_id, false).await?;
    info!("install_device_cert returned: {code}");
    sleep(timings.cert_step_settle).await;

    let delivery = channel.send(&DeviceCommand::GetAppCertList).await;
    let failure = (!delivery.sent())
        .then(|| format!("get_app_cert_list request failed (code {})", delivery.code));
    match &failure {
        Some(note) => warn!("{device_id}: {note}"),
        None => info!("requested app_cert_list, waiting {}s", timings.cert_list_window.as_secs()),
    }
    let messages = collector.collect_for(timings.cert_list_window).await;

    let outcome = Outcome::json(
        &CertReport {
            command: "install-cert",
            device_id,
            messages: super::embed_all(&messages),
        },
        ExitCode::Success,
    )?;
    Ok(match failure {
        Some(note) => outcome.with_diagnostic(format!("{device_id}: {note}")),
        None => outcome,
    })
}
