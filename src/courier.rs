//! Notification channel
//!
//! `Courier::send` never blocks and never fails. Notices are queued on an
//! unbounded channel and delivered in order by a background task; delivery
//! failures are logged and written to the monitor log under `courier`.

use crate::clock::{self, Clock};
use crate::error::{Error, Result};
use crate::ledger::{Ledger, LogStatus};
use crate::manifest::TelegramConfig;
use chrono::{DateTime, FixedOffset, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Pseudo-app under which delivery failures are logged
pub const COURIER_LOG_APP: &str = "courier";

const TELEGRAM_API: &str = "https://api.telegram.org";
const TELEGRAM_TIMEOUT: Duration = Duration::from_secs(10);

/// Counts reported after a fleet sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct SweepCounts {
    pub total: usize,
    pub healthy: usize,
    pub restarted: usize,
    pub errors: usize,
    pub skipped: usize,
    /// Apps that ended in error
    pub failed_apps: Vec<String>,
}

/// Something worth telling a human about
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Offline {
        app: String,
        url: String,
        region: String,
        attempts: u32,
    },
    Restarted {
        app: String,
        url: String,
        region: String,
        operator: String,
    },
    RestartFailed {
        app: String,
        url: String,
        region: String,
        error: String,
    },
    BreakerTripped {
        app: String,
        region: String,
        broken_until: DateTime<Utc>,
        failures: u32,
    },
    MonitorError {
        app: String,
        url: String,
        region: String,
        error: String,
    },
    SweepSummary(SweepCounts),
    RegionSummary {
        region: String,
        operator: String,
        total: usize,
        succeeded: usize,
        failed: usize,
        skipped: usize,
        failed_apps: Vec<String>,
    },
    FleetRestartSummary {
        operator: String,
        total: usize,
        succeeded: usize,
        failed_apps: Vec<String>,
    },
}

fn names_or_none(names: &[String]) -> String {
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(",")
    }
}

impl Notice {
    /// Plain-text rendering, times shown in `offset`
    pub fn render(&self, offset: FixedOffset, now: DateTime<Utc>) -> String {
        let time = clock::display(now, offset);
        match self {
            Notice::Offline {
                app,
                url,
                region,
                attempts,
            } => format!(
                "⚠️ App offline\nName: {app}\nURL: {url}\nRegion: {region}\nTime: {time}\nStarting automatic restart (up to {attempts} attempts)"
            ),
            Notice::Restarted {
                app,
                url,
                region,
                operator,
            } => format!(
                "✅ App restarted\nName: {app}\nURL: {url}\nRegion: {region}\nOperator: {operator}\nTime: {time}"
            ),
            Notice::RestartFailed {
                app,
                url,
                region,
                error,
            } => format!(
                "❌ App restart failed\nName: {app}\nURL: {url}\nRegion: {region}\nError: {error}\nTime: {time}"
            ),
            Notice::BreakerTripped {
                app,
                region,
                broken_until,
                failures,
            } => format!(
                "🔴 Circuit open\nName: {app}\nRegion: {region}\nSuspended until: {}\nConsecutive failures: {failures}",
                clock::display(*broken_until, offset)
            ),
            Notice::MonitorError {
                app,
                url,
                region,
                error,
            } => format!(
                "❌ Monitor error\nName: {app}\nURL: {url}\nRegion: {region}\nError: {error}\nTime: {time}"
            ),
            Notice::SweepSummary(counts) => format!(
                "📈 Sweep summary\nTime: {time}\nApps: {}\nHealthy: {}\nRestarted: {}\nErrors: {}\nSkipped (circuit open): {}\nFailed apps: {}",
                counts.total,
                counts.healthy,
                counts.restarted,
                counts.errors,
                counts.skipped,
                names_or_none(&counts.failed_apps)
            ),
            Notice::RegionSummary {
                region,
                operator,
                total,
                succeeded,
                failed,
                skipped,
                failed_apps,
            } => format!(
                "📊 {region} restart summary\nOperator: {operator}\nTime: {time}\nApps: {total}\nSucceeded: {succeeded}\nFailed: {failed}\nSkipped (circuit open): {skipped}\nFailed apps: {}",
                names_or_none(failed_apps)
            ),
            Notice::FleetRestartSummary {
                operator,
                total,
                succeeded,
                failed_apps,
            } => format!(
                "📊 Fleet restart summary\nOperator: {operator}\nTime: {time}\nApps: {total}\nSucceeded: {succeeded}\nFailed: {}\nFailed apps: {}",
                failed_apps.len(),
                names_or_none(failed_apps)
            ),
        }
    }
}

/// Delivers rendered text somewhere a human will see it
pub trait Notifier: Send + Sync {
    fn deliver(&self, text: &str) -> Result<()>;
}

/// Telegram Bot API `sendMessage`
pub struct TelegramNotifier {
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            bot_token: config.bot_token.clone(),
            chat_id: config.chat_id.clone(),
        }
    }
}

/// Escape every MarkdownV2 reserved character
pub fn escape_markdown_v2(text: &str) -> String {
    const RESERVED: &[char] = &[
        '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
        '\\',
    ];
    let mut out = String::with_capacity(text.len() + 16);
    for c in text.chars() {
        if RESERVED.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl Notifier for TelegramNotifier {
    fn deliver(&self, text: &str) -> Result<()> {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(TELEGRAM_TIMEOUT))
            .http_status_as_error(false)
            .build()
            .into();

        let url = format!("{}/bot{}/sendMessage", TELEGRAM_API, self.bot_token);
        let response = agent
            .post(&url)
            .send_json(serde_json::json!({
                "chat_id": self.chat_id,
                "text": escape_markdown_v2(text),
                "parse_mode": "MarkdownV2",
                "disable_web_page_preview": true,
            }))
            .map_err(|e| match e {
                ureq::Error::Timeout(_) => Error::Notification("telegram request timed out".into()),
                other => Error::Notification(other.to_string()),
            })?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(Error::Notification(format!("telegram api status {}", status)));
        }
        debug!(chat_id = %self.chat_id, "telegram notice delivered");
        Ok(())
    }
}

/// Trace-only notifier, used when no Telegram target is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn deliver(&self, text: &str) -> Result<()> {
        info!(notice = %text, "notice");
        Ok(())
    }
}

/// Pick the notifier for a configuration
pub fn notifier_for(telegram: Option<&TelegramConfig>) -> Arc<dyn Notifier> {
    match telegram {
        Some(config) if config.is_complete() => Arc::new(TelegramNotifier::new(config)),
        _ => {
            warn!("Telegram bot token or chat id not configured, notices are only logged");
            Arc::new(LogNotifier)
        }
    }
}

enum Parcel {
    Deliver(Notice, DateTime<Utc>),
    Close,
}

/// Fire-and-forget sender
#[derive(Clone)]
pub struct Courier {
    tx: mpsc::UnboundedSender<Parcel>,
    clock: Arc<dyn Clock>,
}

impl Courier {
    /// Spawn the delivery task on the current runtime
    pub fn start(
        notifier: Arc<dyn Notifier>,
        ledger: Ledger,
        clock: Arc<dyn Clock>,
        offset: FixedOffset,
    ) -> (Courier, CourierTask) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(deliver_loop(rx, notifier, ledger, offset));
        let courier = Courier {
            tx: tx.clone(),
            clock,
        };
        (courier, CourierTask { tx, handle })
    }

    /// Queue a notice
    pub fn send(&self, notice: Notice) {
        if self
            .tx
            .send(Parcel::Deliver(notice, self.clock.now()))
            .is_err()
        {
            warn!("courier stopped, notice dropped");
        }
    }
}

async fn deliver_loop(
    mut rx: mpsc::UnboundedReceiver<Parcel>,
    notifier: Arc<dyn Notifier>,
    ledger: Ledger,
    offset: FixedOffset,
) {
    while let Some(parcel) = rx.recv().await {
        let (notice, at) = match parcel {
            Parcel::Deliver(notice, at) => (notice, at),
            Parcel::Close => break,
        };

        let text = notice.render(offset, at);
        let notifier = notifier.clone();
        let outcome = tokio::task::spawn_blocking(move || notifier.deliver(&text))
            .await
            .map_err(|e| Error::Notification(format!("delivery task failed: {}", e)))
            .and_then(|r| r);

        if let Err(e) = outcome {
            warn!(error = %e, "notice delivery failed");
            if let Err(log_err) =
                ledger.append_log(COURIER_LOG_APP, LogStatus::Error, &e.to_string())
            {
                warn!(error = %log_err, "failed to record delivery failure");
            }
        }
    }
    debug!("courier stopped");
}

/// Handle on the delivery task
pub struct CourierTask {
    tx: mpsc::UnboundedSender<Parcel>,
    handle: JoinHandle<()>,
}

impl CourierTask {
    /// Deliver everything queued so far, then stop
    pub async fn finish(self) {
        let _ = self.tx.send(Parcel::Close);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "courier task ended abnormally");
        }
    }
}

#[cfg(test)]
pub use inbox::Inbox;


#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Mutex;

    struct Recording {
        sent: Mutex<Vec<String>>,
        fail: bool,
    }

    impl Notifier for Recording {
        fn deliver(&self, text: &str) -> Result<()> {
            if self.fail {
                return Err(Error::Notification("telegram api status 502".into()));
            }
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    fn shanghai() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    #[test]
    fn test_escape_markdown_v2() {
        assert_eq!(escape_markdown_v2("a.b-c!"), "a\\.b\\-c\\!");
        assert_eq!(escape_markdown_v2("(x)"), "\\(x\\)");
        assert_eq!(escape_markdown_v2("plain"), "plain");
    }

    #[test]
    fn test_render_uses_offset() {
        let clock = ManualClock::new();
        let notice = Notice::Restarted {
            app: "us0".into(),
            url: "https://us0".into(),
            region: "US East".into(),
            operator: "system".into(),
        };
        let text = notice.render(shanghai(), clock.now());
        assert!(text.contains("Operator: system"));
        assert!(text.contains("2025-03-14 16:00"));
    }

    #[test]
    fn test_summary_lists_failed_apps() {
        let counts = SweepCounts {
            total: 3,
            healthy: 1,
            restarted: 1,
            errors: 1,
            skipped: 0,
            failed_apps: vec!["us0".into()],
        };
        let now = ManualClock::new().now();
        let text = Notice::SweepSummary(counts).render(shanghai(), now);
        assert!(text.contains("Failed apps: us0"));

        let text = Notice::SweepSummary(SweepCounts::default()).render(shanghai(), now);
        assert!(text.contains("Failed apps: none"));
    }

    #[tokio::test]
    async fn test_delivers_in_order_and_drains() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        let ledger = Ledger::open_in_memory(clock.clone()).unwrap();
        let notifier = Arc::new(Recording {
            sent: Mutex::new(Vec::new()),
            fail: false,
        });
        let (courier, task) = Courier::start(notifier.clone(), ledger, clock, shanghai());

        courier.send(Notice::SweepSummary(SweepCounts::default()));
        courier.send(Notice::FleetRestartSummary {
            operator: "user".into(),
            total: 0,
            succeeded: 0,
            failed_apps: vec![],
        });
        task.finish().await;

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].starts_with("📈"));
    }

    #[tokio::test]
    async fn test_delivery_failure_is_logged() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        let ledger = Ledger::open_in_memory(clock.clone()).unwrap();
        let notifier = Arc::new(Recording {
            sent: Mutex::new(Vec::new()),
            fail: true,
        });
        let (courier, task) = Courier::start(notifier, ledger.clone(), clock, shanghai());

        courier.send(Notice::SweepSummary(SweepCounts::default()));
        task.finish().await;

        let last = ledger.last_error(COURIER_LOG_APP).unwrap().unwrap();
        assert!(last.message.contains("502"));
    }
}
