//! Alerting module for webhook notifications
//!
//! Suspicious-travel detections are queued on a bounded channel and
//! dispatched asynchronously to Slack and generic webhooks, so a slow or
//! failing endpoint never delays a detection response.

use crate::config::{AlertConfig, SlackConfig, WebhookConfig};
use crate::detection::Side;
use crate::models::{ClassifiedNeighbor, GeoLocation, LoginEvent};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Alerts buffered before new ones are dropped
pub const ALERT_QUEUE_CAPACITY: usize = 100;

/// Errors that can occur during alert dispatch
#[derive(Error, Debug)]
pub enum AlertError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{channel} returned status {status}")]
    Status { channel: String, status: u16 },

    #[error("{} alert channel(s) failed", .0.len())]
    Failed(Vec<AlertError>),
}

/// One implausible hop between two logins of the same user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TravelAlert {
    pub user: String,
    pub event_id: String,
    pub ip: String,
    pub timestamp: i64,
    pub location: GeoLocation,
    /// Position of the other login relative to this one
    pub neighbor_side: Side,
    pub neighbor_ip: String,
    pub neighbor_timestamp: i64,
    pub neighbor_location: GeoLocation,
    /// Serialized as null when the logins share a timestamp
    pub speed_mph: f64,
}

impl TravelAlert {
    pub fn new(
        event: &LoginEvent,
        location: GeoLocation,
        side: Side,
        neighbor: &ClassifiedNeighbor,
    ) -> Self {
        TravelAlert {
            user: event.user.clone(),
            event_id: event.event_id.clone(),
            ip: event.ip.clone(),
            timestamp: event.timestamp,
            location,
            neighbor_side: side,
            neighbor_ip: neighbor.event.ip.clone(),
            neighbor_timestamp: neighbor.event.timestamp,
            neighbor_location: neighbor.event.location,
            speed_mph: neighbor.implied_speed,
        }
    }

    pub fn description(&self) -> String {
        let speed = if self.speed_mph.is_finite() {
            format!("{:.0} mph", self.speed_mph)
        } else {
            "simultaneous logins".to_string()
        };
        format!(
            "User '{}' logged in from {} ({:.4}, {:.4}) with a {} login from {} ({:.4}, {:.4}): {}.",
            self.user,
            self.ip,
            self.location.latitude,
            self.location.longitude,
            self.neighbor_side,
            self.neighbor_ip,
            self.neighbor_location.latitude,
            self.neighbor_location.longitude,
            speed
        )
    }
}

/// Async alert dispatcher
///
/// Runs as a tokio task and sends alerts to every configured channel.
pub struct AlertDispatcher {
    config: AlertConfig,
    client: Client,
}

impl AlertDispatcher {
    pub fn new(config: AlertConfig) -> Self {
        AlertDispatcher {
            config,
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Create the channel connecting an `AlertQueue` to `run`
    pub fn create_channel() -> (mpsc::Sender<TravelAlert>, mpsc::Receiver<TravelAlert>) {
        mpsc::channel(ALERT_QUEUE_CAPACITY)
    }

    /// Run the alert dispatch loop until every sender is dropped
    pub async fn run(self, mut rx: mpsc::Receiver<TravelAlert>) {
        log::info!("Alert dispatcher started");

        while let Some(alert) = rx.recv().await {
            if !self.config.enabled {
                continue;
            }

            log::info!("Dispatching travel alert for {} ({})", alert.user, alert.event_id);
            if let Err(e) = self.dispatch_alert(&alert).await {
                log::error!("Failed to dispatch alert: {}", e);
            }
        }

        log::info!("Alert dispatcher stopped");
    }

    /// Dispatch an alert to all configured channels
    async fn dispatch_alert(&self, alert: &TravelAlert) -> Result<(), AlertError> {
        let mut errors = Vec::new();

        if let Some(ref slack) = self.config.slack {
            if let Err(e) = self.send_slack_alert(slack, alert).await {
                log::error!("Slack alert failed: {}", e);
                errors.push(e);
            }
        }

        for webhook in &self.config.webhooks {
            if let Err(e) = self.send_generic_webhook(webhook, alert).await {
                log::error!("Webhook {} failed: {}", webhook.name, e);
                errors.push(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(AlertError::Failed(errors))
        }
    }

    async fn send_slack_alert(
        &self,
        config: &SlackConfig,
        alert: &TravelAlert,
    ) -> Result<(), AlertError> {
        let response = self
            .client
            .post(&config.webhook_url)
            .json(&slack_payload(config, alert))
            .send()
            .await?;

        check_status("Slack", response.status())
    }

    async fn send_generic_webhook(
        &self,
        config: &WebhookConfig,
        alert: &TravelAlert,
    ) -> Result<(), AlertError> {
        let method = config.method.as_deref().unwrap_or("POST");

        let mut request = match method.to_uppercase().as_str() {
            "PUT" => self.client.put(&config.url),
            _ => self.client.post(&config.url),
        };

        if let Some(ref headers) = config.headers {
            for (key, value) in headers {
                request = request.header(key, value);
            }
        }

        let response = request.json(alert).send().await?;
        check_status(&config.name, response.status())
    }
}

fn check_status(channel: &str, status: reqwest::StatusCode) -> Result<(), AlertError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(AlertError::Status {
            channel: channel.to_string(),
            status: status.as_u16(),
        })
    }
}

fn slack_payload(config: &SlackConfig, alert: &TravelAlert) -> serde_json::Value {
    let login_time = chrono::DateTime::from_timestamp(alert.timestamp, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default();
    let speed = if alert.speed_mph.is_finite() {
        format!("{:.0} mph", alert.speed_mph)
    } else {
        "simultaneous".to_string()
    };

    serde_json::json!({
        "channel": config.channel,
        "username": config.username.as_deref().unwrap_or("Geovelocity"),
        "icon_emoji": ":airplane:",
        "attachments": [{
            "color": "danger",
            "title": ":rotating_light: Impossible travel",
            "fields": [
                { "title": "User", "value": &alert.user, "short": true },
                { "title": "Speed", "value": speed, "short": true },
                { "title": "IP", "value": &alert.ip, "short": true },
                { "title": "Neighbor IP", "value": &alert.neighbor_ip, "short": true },
                { "title": "Login time", "value": login_time, "short": true },
            ],
            "text": alert.description(),
            "ts": alert.timestamp,
        }]
    })
}

/// Non-blocking handle for queueing alerts from the pipeline
#[derive(Clone)]
pub struct AlertQueue {
    tx: mpsc::Sender<TravelAlert>,
}

impl AlertQueue {
    pub fn new(tx: mpsc::Sender<TravelAlert>) -> Self {
        AlertQueue { tx }
    }

    /// Queue an alert without waiting
    ///
    /// If the queue is full or closed the alert is dropped and a warning logged.
    pub fn queue_alert(&self, alert: TravelAlert) {
        if let Err(e) = self.tx.try_send(alert) {
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    log::warn!("Alert queue full, dropping alert");
                }
                mpsc::error::TrySendError::Closed(_) => {
                    log::warn!("Alert queue closed");
                }
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
