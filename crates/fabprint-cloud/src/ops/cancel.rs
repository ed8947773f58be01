//! `cancel`: stop the current print.

use serde::Serialize;
use tracing::{info, warn};

use crate::channel::DeviceChannel;
use crate::collector::ResponseCollector;
use crate::commands::{is_stop_ack, DeviceCommand};
use crate::config::BridgeConfig;
use crate::credentials::Credentials;
use crate::error::Result;
use crate::provider::ProviderFactory;
use crate::report::{ExitCode, Outcome};
use crate::session::Session;

#[derive(Serialize)]
struct CancelReport<'a> {
    command: &'static str,
    device_id: &'a str,
    sent: bool,
}

/// Send a stop command and wait briefly for an acknowledgment.
///
/// The output always says `sent: true`; whether an acknowledgment was seen
/// only shows up in the logs.
pub async fn run(
    factory: &dyn ProviderFactory,
    config: &BridgeConfig,
    credentials: &Credentials,
    device_id: &str,
) -> Result<Outcome> {
    let session = Session::open(factory, config, credentials).await?;
    let collector = ResponseCollector::attach(&session);
    // No pushall: a fresh IDLE report would read as an acknowledgment.
    let channel = DeviceChannel::subscribe(&session, device_id).await;

    let delivery = channel.send(&DeviceCommand::PrintStop).await;
    if delivery.sent() {
        info!("stop command sent to {device_id}");
    } else {
        warn!("stop command to {device_id} not accepted (code {})", delivery.code);
    }

    let timings = session.timings();
    let (_, acknowledged) = collector
        .collect_until(timings.cancel_ack_window, timings.cancel_ack_poll, |messages| {
            messages.iter().any(|m| is_stop_ack(&m.payload))
        })
        .await;
    if acknowledged {
        info!("stop acknowledged by {device_id}");
    } else {
        warn!("no stop acknowledgment from {device_id}");
    }

    Outcome::json(
        &CancelReport {
            command: "stop",
            device_id,
            sent: true,
        },
        ExitCode::Success,
    )
}
