//! `send-mqtt`: deliver a caller-supplied payload and collect the replies.

use std::time::Duration;

use serde::Serialize;
use serde_json::value::RawValue;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::channel::DeviceChannel;
use crate::collector::ResponseCollector;
use crate::config::BridgeConfig;
use crate::credentials::Credentials;
use crate::error::Result;
use crate::provider::ProviderFactory;
use crate::report::{ExitCode, Outcome};
use crate::session::Session;

/// Default reply window in seconds.
pub const DEFAULT_WAIT_SECS: u64 = 30;

#[derive(Serialize)]
struct RawSendReport<'a> {
    sent: bool,
    send_code: i32,
    device_id: &'a str,
    responses: Vec<Box<RawValue>>,
}

/// Deliver `payload` over the first accepting route, then collect every
/// message for `wait`.
///
/// The report line is emitted even when every route fails; the exit code
/// is then [`ExitCode::Failure`].
pub async fn run(
    factory: &dyn ProviderFactory,
    config: &BridgeConfig,
    credentials: &Credentials,
    device_id: &str,
    payload: &str,
    wait: Duration,
) -> Result<Outcome> {
    let session = Session::open(factory, config, credentials).await?;
    let collector = ResponseCollector::attach(&session);
    let channel = DeviceChannel::subscribe(&session, device_id).await;
    super::request_full_state(&channel).await;
    sleep(session.timings().raw_warmup).await;

    let delivery = channel.deliver(payload).await;
    match delivery.route {
        Some(route) => info!("payload accepted via {route}"),
        None => warn!("payload rejected by every route (last code {})", delivery.code),
    }

    info!("waiting {}s for responses", wait.as_secs());
    let messages = collector.collect_for(wait).await;

    let exit = if delivery.sent() {
        ExitCode::Success
    } else {
        ExitCode::Failure
    };
    Outcome::json(
        &RawSendReport {
            sent: delivery.sent(),
            send_code: delivery.code,
            device_id,
            responses: super::embed_all(&messages),
        },
        exit,
    )
}
