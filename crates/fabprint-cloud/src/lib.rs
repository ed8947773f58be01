#![warn(missing_docs)]

//! Bambu Lab cloud printing bridge.
//!
//! This crate provides:
//! - A typed interface over the vendor cloud session ([`CloudProvider`])
//! - An MQTT implementation of that interface
//! - Session login and connection handling
//! - Device subscription, pushall, and response collection
//! - One orchestrator per bridge command (status, cancel, send-raw,
//!   install-cert, print, tasks)
//!
//! # Example
//!
//! ```ignore
//! use fabprint_cloud::{ops, BridgeConfig, Credentials, MqttProviderFactory};
//! use std::path::Path;
//!
//! let config = BridgeConfig::load(None)?;
//! let credentials = Credentials::from_file(Path::new("token.json"))?;
//! let factory = MqttProviderFactory::new(&config);
//!
//! let outcome = ops::status::run(&factory, &config, &credentials, "01P00A000000000").await?;
//! println!("{}", outcome.line);
//! ```

pub mod api;
pub mod channel;
pub mod collector;
pub mod commands;
pub mod config;
pub mod credentials;
pub mod error;
pub mod job;
pub mod mqtt;
pub mod ops;
pub mod provider;
pub mod report;
pub mod session;
pub mod status;

#[cfg(test)]
mod fake;

pub use api::CloudApi;
pub use channel::{Delivery, DeviceChannel, SendRoute};
pub use collector::{largest_payload, InboundMessage, ResponseCollector};
pub use commands::DeviceCommand;
pub use config::{BridgeConfig, Timings};
pub use credentials::Credentials;
pub use error::{CloudError, Result};
pub use job::{PrintJobOutcome, PrintJobRequest, PrintTracker, Stage, TRANSIENT_NOT_READY};
pub use mqtt::{MqttCloudProvider, MqttProviderFactory};
pub use provider::{Capability, CloudProvider, PrintHooks, ProviderFactory, ProviderSettings};
pub use report::{emit, ExitCode, Outcome};
pub use session::{Session, SessionState};
pub use status::{PrintState, StatusSummary};
