//! Device channel: binds a session to one printer.

use std::fmt;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::commands::DeviceCommand;
use crate::error::{CloudError, Result};
use crate::session::Session;

/// One send primitive with its quality-of-service arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendRoute {
    /// `send_message(device, payload, qos)`.
    Legacy {
        /// MQTT QoS.
        qos: i32,
    },
    /// `send_message_to_printer(device, payload, qos, flag)`.
    Printer {
        /// MQTT QoS.
        qos: i32,
        /// Provider flag.
        flag: i32,
    },
}

impl fmt::Display for SendRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendRoute::Legacy { qos } => write!(f, "send_message(qos={qos})"),
            SendRoute::Printer { qos, flag } => write!(f, "send_message_to_printer({qos},{flag})"),
        }
    }
}

/// Routes for protocol commands: legacy first, then current.
pub const COMMAND_ROUTES: [SendRoute; 2] = [
    SendRoute::Legacy { qos: 0 },
    SendRoute::Printer { qos: 0, flag: 0 },
];

/// Routes for caller-supplied payloads, in priority order.
pub const DELIVERY_ROUTES: [SendRoute; 5] = [
    SendRoute::Legacy { qos: 0 },
    SendRoute::Legacy { qos: 1 },
    SendRoute::Printer { qos: 0, flag: 0 },
    SendRoute::Printer { qos: 1, flag: 0 },
    SendRoute::Printer { qos: 0, flag: 1 },
];

/// Result of trying a list of routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    /// Last provider return code, `-1` when no route was available.
    pub code: i32,
    /// Route that succeeded.
    pub route: Option<SendRoute>,
}

impl Delivery {
    /// Whether some route reported success.
    pub fn sent(&self) -> bool {
        self.code == 0
    }
}

/// A session subscribed to one device's report topic.
pub struct DeviceChannel<'s> {
    session: &'s Session,
    device_id: String,
}

impl<'s> DeviceChannel<'s> {
    /// Select the device, subscribe, and wait for the subscription to settle.
    pub async fn subscribe(session: &'s Session, device_id: &str) -> Self {
        let provider = session.provider();
        let code = provider.set_user_selected_machine(device_id);
        debug!("set_user_selected_machine({device_id}): {code}");
        let code = provider.start_subscribe("device").await;
        debug!("start_subscribe: {code}");

        sleep(session.timings().subscribe_settle).await;

        Self {
            session,
            device_id: device_id.to_string(),
        }
    }

    /// Target device.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Ask the device to publish its full state.
    ///
    /// Only a failed send is retried; whether the device answers is for the
    /// caller's collector to observe.
    pub async fn request_full_state(&self) -> Result<()> {
        let timings = self.session.timings();
        let mut code = -1;
        for attempt in 1..=timings.pushall_attempts {
            if attempt > 1 {
                sleep(timings.pushall_backoff).await;
            }
            code = self.send(&DeviceCommand::PushAll).await.code;
            debug!("pushall attempt {attempt}: {code}");
            if code == 0 {
                return Ok(());
            }
        }
        Err(CloudError::SendFailed {
            device_id: self.device_id.clone(),
            code,
        })
    }

    /// Send a protocol command over the legacy then the current primitive.
    pub async fn send(&self, command: &DeviceCommand) -> Delivery {
        let delivery = self.try_routes(&COMMAND_ROUTES, &command.payload()).await;
        debug!("send {}: {}", command.name(), delivery.code);
        delivery
    }

    /// Deliver a caller-supplied payload over every route until one succeeds.
    pub async fn deliver(&self, payload: &str) -> Delivery {
        info!("sending payload ({} bytes) to {}", payload.len(), self.device_id);
        let delivery = self.try_routes(&DELIVERY_ROUTES, payload).await;
        debug!("final send result: {}", delivery.code);
        delivery
    }

    async fn try_routes(&self, routes: &[SendRoute], payload: &str) -> Delivery {
        let mut code = -1;
        for &route in routes {
            match self.send_via(route, payload).await {
                Ok(0) => {
                    return Delivery {
                        code: 0,
                        route: Some(route),
                    }
                }
                Ok(rc) => {
                    debug!("  {route}: {rc}");
                    code = rc;
                }
                Err(CloudError::CapabilityMissing(_)) => {}
                Err(e) => {
                    warn!("  {route}: {e}");
                    code = -1;
                }
            }
        }
        Delivery { code, route: None }
    }

    async fn send_via(&self, route: SendRoute, payload: &str) -> Result<i32> {
        let provider = self.session.provider();
        match route {
            SendRoute::Legacy { qos } => provider.send_message(&self.device_id, payload, qos).await,
            SendRoute::Printer { qos, flag } => {
                provider
                    .send_message_to_printer(&self.device_id, payload, qos, flag)
                    .await
            }
        }
    }
}
