//! `status`: report the device's most complete state snapshot.

use crate::channel::DeviceChannel;
use crate::collector::{largest_payload, InboundMessage, ResponseCollector, SnapshotStrategy};
use crate::config::BridgeConfig;
use crate::credentials::Credentials;
use crate::error::{CloudError, Result};
use crate::provider::ProviderFactory;
use crate::report::Outcome;
use crate::session::Session;
use crate::status::StatusSummary;

/// Collect reports for the status window and emit the largest one verbatim.
pub async fn run(
    factory: &dyn ProviderFactory,
    config: &BridgeConfig,
    credentials: &Credentials,
    device_id: &str,
) -> Result<Outcome> {
    let session = Session::open(factory, config, credentials).await?;
    let collector = ResponseCollector::attach(&session);
    let channel = DeviceChannel::subscribe(&session, device_id).await;
    super::request_full_state(&channel).await;
    let messages = collector.collect_for(session.timings().status_window).await;
    tracing::debug!("status: {} messages from {device_id}", messages.len());

    select_snapshot(&messages, device_id, largest_payload)
}

/// Pick the snapshot with `strategy`; nothing collected is
/// [`CloudError::NoStatusReceived`].
pub fn select_snapshot(
    messages: &[InboundMessage],
    device_id: &str,
    strategy: SnapshotStrategy,
) -> Result<Outcome> {
    let best = strategy(messages).ok_or_else(|| CloudError::NoStatusReceived {
        device_id: device_id.to_string(),
    })?;

    let outcome = Outcome::success(best.payload.clone());
    Ok(match StatusSummary::from_payload(&best.payload) {
        Some(summary) => outcome.with_diagnostic(format!("{device_id}: {}", summary.describe())),
        None => outcome,
    })
}
