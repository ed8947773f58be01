//! `tasks`: list recent cloud print tasks over REST.

use crate::api::CloudApi;
use crate::config::BridgeConfig;
use crate::credentials::Credentials;
use crate::error::Result;
use crate::report::Outcome;

/// Default number of tasks requested.
pub const DEFAULT_LIMIT: u32 = 10;

/// Fetch up to `limit` tasks and emit the response body unchanged.
pub async fn run(config: &BridgeConfig, credentials: &Credentials, limit: u32) -> Result<Outcome> {
    let api = CloudApi::new(config, &credentials.token)?;
    let body = api.list_tasks(limit).await?;
    Ok(Outcome::success(body.trim_end()))
}
