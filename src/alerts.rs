//! Alert delivery for the heartbeat watchdog.
//!
//! - Telegram bot API (`sendMessage`, `deleteMessage`, `editMessageText`)
//! - Log-only fallback when no bot token is configured
//! - The 1 s polling loop driving [`Watchdog`]

use std::time::Duration;

use chrono::{DateTime, Local};
use log::{debug, error, info, warn};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{Result, TrailError};
use crate::watchdog::{
    AlertSchedule, DailySummary, HeartbeatClock, QuietHours, Watchdog, WatchdogEvent,
};

const TELEGRAM_API: &str = "https://api.telegram.org";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const TICK: Duration = Duration::from_secs(1);

/// Bot API envelope. `result` is a message for `sendMessage` and
/// `editMessageText` but a bare `true` for `deleteMessage`.
#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    result: Value,
    description: Option<String>,
}

fn http_error(e: reqwest::Error) -> TrailError {
    TrailError::Http {
        message: e.to_string(),
        status_code: e.status().map(|s| s.as_u16()),
    }
}

// ============================================================================
// Telegram
// ============================================================================

/// Telegram bot client that keeps at most one live down alert in the chat.
pub struct TelegramNotifier {
    client: Client,
    base_url: String,
    chat_id: String,
    last_alert_id: Option<i64>,
    summary_id: Option<i64>,
}

impl TelegramNotifier {
    pub fn new(token: &str, chat_id: &str) -> Result<Self> {
        Self::with_api_url(TELEGRAM_API, token, chat_id)
    }

    /// Point the client at another bot API host (for a local test server).
    pub fn with_api_url(api_url: &str, token: &str, chat_id: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(http_error)?;

        Ok(Self {
            client,
            base_url: format!("{}/bot{}", api_url.trim_end_matches('/'), token),
            chat_id: chat_id.to_string(),
            last_alert_id: None,
            summary_id: None,
        })
    }

    async fn call(&self, method: &str, body: Value) -> Result<TelegramResponse> {
        let resp = self
            .client
            .post(format!("{}/{}", self.base_url, method))
            .json(&body)
            .send()
            .await
            .map_err(http_error)?;

        let status = resp.status();
        let parsed: TelegramResponse = resp.json().await.map_err(http_error)?;
        if !parsed.ok {
            return Err(TrailError::Http {
                message: parsed
                    .description
                    .unwrap_or_else(|| format!("{method} failed")),
                status_code: Some(status.as_u16()),
            });
        }
        Ok(parsed)
    }

    /// Send a text message, returning its id.
    pub async fn send_message(&self, text: &str) -> Result<i64> {
        let resp = self
            .call(
                "sendMessage",
                json!({ "chat_id": self.chat_id, "text": text }),
            )
            .await?;
        resp.result
            .get("message_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| TrailError::Http {
                message: "sendMessage returned no message".to_string(),
                status_code: None,
            })
    }

    pub async fn delete_message(&self, message_id: i64) -> Result<()> {
        self.call(
            "deleteMessage",
            json!({ "chat_id": self.chat_id, "message_id": message_id }),
        )
        .await?;
        Ok(())
    }

    pub async fn edit_message(&self, message_id: i64, text: &str) -> Result<()> {
        self.call(
            "editMessageText",
            json!({ "chat_id": self.chat_id, "message_id": message_id, "text": text }),
        )
        .await?;
        Ok(())
    }

    /// Deliver a watchdog event. A down alert replaces the previous one; a
    /// recovery is sent as a new message and the previous alert is kept.
    pub async fn send_alert(&mut self, event: &WatchdogEvent) -> Result<()> {
        let previous = self.last_alert_id.take();
        if let (false, Some(id)) = (event.is_recovery(), previous) {
            match self.delete_message(id).await {
                Ok(()) => debug!("Deleted previous alert {}", id),
                Err(e) => warn!("Failed to delete previous alert {}: {}", id, e),
            }
        }

        let id = self.send_message(&event.message()).await?;
        if !event.is_recovery() {
            self.last_alert_id = Some(id);
        }
        info!("Telegram alert sent with id {}", id);
        Ok(())
    }

    /// Post the daily summary, editing today's message when there is one.
    pub async fn publish_summary(&mut self, text: &str, new_day: bool) -> Result<()> {
        if new_day {
            self.summary_id = None;
        }
        match self.summary_id {
            Some(id) => {
                if let Err(e) = self.edit_message(id, text).await {
                    // Next summary goes out as a fresh message
                    self.summary_id = None;
                    return Err(e);
                }
                debug!("Daily summary {} updated", id);
            }
            None => {
                self.summary_id = Some(self.send_message(text).await?);
                debug!("Daily summary sent");
            }
        }
        Ok(())
    }
}

// ============================================================================
// Notifier
// ============================================================================

/// Where watchdog events go.
pub enum Notifier {
    /// Write events to the log only
    Log,
    Telegram(TelegramNotifier),
}

impl Notifier {
    /// Telegram when both token and chat id are set, log otherwise.
    pub fn from_credentials(token: Option<&str>, chat_id: Option<&str>) -> Result<Self> {
        match (token, chat_id) {
            (Some(token), Some(chat_id)) if !token.is_empty() && !chat_id.is_empty() => {
                Ok(Notifier::Telegram(TelegramNotifier::new(token, chat_id)?))
            }
            _ => {
                info!("Telegram not configured, alerts go to the log");
                Ok(Notifier::Log)
            }
        }
    }

    pub async fn deliver(&mut self, dispatch: &Dispatch) {
        match self {
            Notifier::Log => {
                warn!("{}", dispatch.event.message());
                debug!("{}", dispatch.summary);
            }
            Notifier::Telegram(telegram) => {
                if let Err(e) = telegram.send_alert(&dispatch.event).await {
                    error!("Failed to send Telegram alert: {}", e);
                }
                if let Err(e) = telegram
                    .publish_summary(&dispatch.summary, dispatch.new_day)
                    .await
                {
                    error!("Failed to update daily summary: {}", e);
                }
            }
        }
    }
}

// ============================================================================
// Watchdog loop
// ============================================================================

/// An event ready for delivery together with the updated summary text.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub event: WatchdogEvent,
    pub summary: String,
    pub new_day: bool,
}

/// Watchdog state plus quiet hours and the daily summary.
#[derive(Debug, Clone)]
pub struct Monitor {
    watchdog: Watchdog,
    summary: DailySummary,
    quiet: QuietHours,
    /// A day rolled over since the last delivered dispatch
    pending_new_day: bool,
}

impl Monitor {
    pub fn new(schedule: AlertSchedule, quiet: QuietHours) -> Self {
        Self {
            watchdog: Watchdog::new(schedule),
            summary: DailySummary::default(),
            quiet,
            pending_new_day: false,
        }
    }

    /// Advance one tick. State moves on during quiet hours; only delivery
    /// is suppressed.
    pub fn tick(&mut self, now: DateTime<Local>, last_beat: DateTime<Local>) -> Option<Dispatch> {
        let downtime = (now - last_beat).num_seconds().max(0) as u64;
        debug!(
            "Downtime(s): {:<10} Next alert(s): {:<10} down={}",
            downtime,
            self.watchdog.next_alert(),
            self.watchdog.is_down()
        );

        let event = self.watchdog.observe(downtime, last_beat)?;
        self.pending_new_day |= self.summary.record(&event, now);

        if self.quiet.is_quiet(&now) {
            info!("Skipping alert during quiet hours");
            return None;
        }

        Some(Dispatch {
            summary: self.summary.render(now, last_beat),
            event,
            new_day: std::mem::take(&mut self.pending_new_day),
        })
    }
}

/// Poll the heartbeat clock every second, forever.
pub async fn run_watchdog(
    clock: HeartbeatClock,
    schedule: AlertSchedule,
    quiet: QuietHours,
    mut notifier: Notifier,
) {
    info!("Watchdog started with schedule {:?}", schedule.thresholds());
    let mut monitor = Monitor::new(schedule, quiet);
    let mut interval = tokio::time::interval(TICK);

    loop {
        interval.tick().await;
        if let Some(dispatch) = monitor.tick(Local::now(), clock.last()) {
            notifier.deliver(&dispatch).await;
        }
    }
}
