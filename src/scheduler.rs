//! Daily summary job.
//!
//! Once a day every registered user gets a text summary. Users whose lived
//! week count grew since the previous run (or who were never seen) also get
//! the chart.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::age::Lifespan;
use crate::grid::LifeGrid;
use crate::stats::{self, LifeStats};
use crate::store::Registry;
use crate::svg::{self, ChartError, Theme};
use crate::telegram::{Transport, TransportError};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("delivery to {user} failed and the transport cannot continue: {source}")]
    Transport {
        user: String,
        #[source]
        source: TransportError,
    },
}

/// First wall-clock instant strictly after `now` whose time of day is
/// `trigger`.
pub fn next_fire_after(now: NaiveDateTime, trigger: NaiveTime) -> NaiveDateTime {
    let today = now.date().and_time(trigger);
    if today > now {
        today
    } else {
        today + TimeDelta::days(1)
    }
}

/// A new week is worth a chart when the user was never seen or their lived
/// week count grew.
pub fn crossed_new_week(previous: Option<u64>, current: u64) -> bool {
    previous.is_none_or(|seen| current > seen)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub users: usize,
    pub texts_sent: usize,
    pub charts_sent: usize,
    pub failures: usize,
}

/// The life chart as SVG for a user with `weeks_lived` weeks behind them.
pub fn chart_svg(weeks_lived: u64, lifespan: &Lifespan, theme: Theme) -> String {
    let grid = LifeGrid::build(weeks_lived, lifespan.total_years, lifespan.weeks_per_year);
    svg::generate_life_chart(&grid, stats::CHART_CAPTION, theme)
}

/// The life chart as PNG, ready to be sent as a photo.
pub fn render_chart(weeks_lived: u64, lifespan: &Lifespan, theme: Theme) -> Result<Vec<u8>, ChartError> {
    svg::rasterize(&chart_svg(weeks_lived, lifespan, theme))
}

pub struct DailyNotifier {
    lifespan: Lifespan,
    theme: Theme,
}

impl DailyNotifier {
    pub fn new(lifespan: Lifespan, theme: Theme) -> Self {
        Self { lifespan, theme }
    }

    /// Runs one daily pass over every registered user.
    ///
    /// Recoverable delivery failures skip the user (or just their chart);
    /// anything else stops the pass and is returned. Watermarks are updated
    /// for every user whose summary went out and saved once at the end, also
    /// when the pass stops early.
    pub async fn run_batch<T>(
        &self,
        registry: &mut Registry,
        transport: &T,
        today: NaiveDate,
    ) -> Result<BatchSummary, SchedulerError>
    where
        T: Transport + ?Sized,
    {
        let mut summary = BatchSummary::default();
        let outcome = self
            .notify_all(registry, transport, today, &mut summary)
            .await;

        let users = &registry.users;
        registry.watermarks.retain(|user| users.get(user).is_some());
        if let Err(e) = registry.watermarks.save() {
            warn!(error = %e, "failed to persist watermarks, next restart may resend charts");
        }

        outcome?;
        info!(
            users = summary.users,
            texts = summary.texts_sent,
            charts = summary.charts_sent,
            failures = summary.failures,
            "daily batch finished"
        );
        Ok(summary)
    }

    async fn notify_all<T>(
        &self,
        registry: &mut Registry,
        transport: &T,
        today: NaiveDate,
        summary: &mut BatchSummary,
    ) -> Result<(), SchedulerError>
    where
        T: Transport + ?Sized,
    {
        let users: Vec<(String, NaiveDate)> = registry
            .users
            .iter()
            .map(|(user, birthdate)| (user.to_string(), birthdate))
            .collect();

        for (user, birthdate) in users {
            summary.users += 1;
            let stats = LifeStats::compute(birthdate, today, &self.lifespan);
            let text = stats::summary_text(birthdate, today, &stats, &self.lifespan);

            match transport.send_text(&user, &text).await {
                Ok(()) => summary.texts_sent += 1,
                Err(e) if e.is_recoverable() => {
                    error!(user = %user, error = %e, "failed to send daily summary");
                    summary.failures += 1;
                    continue;
                }
                Err(source) => return Err(SchedulerError::Transport { user, source }),
            }

            if crossed_new_week(registry.watermarks.get(&user), stats.weeks_lived) {
                self.send_chart(transport, &user, stats.weeks_lived, summary)
                    .await?;
            }

            registry.watermarks.set(&user, stats.weeks_lived);
        }

        Ok(())
    }

    async fn send_chart<T>(
        &self,
        transport: &T,
        user: &str,
        weeks_lived: u64,
        summary: &mut BatchSummary,
    ) -> Result<(), SchedulerError>
    where
        T: Transport + ?Sized,
    {
        let png = match render_chart(weeks_lived, &self.lifespan, self.theme) {
            Ok(png) => png,
            Err(e) => {
                error!(user = %user, error = %e, "failed to render weekly chart");
                summary.failures += 1;
                return Ok(());
            }
        };

        let caption = stats::new_week_caption(weeks_lived);
        match transport.send_chart(user, &png, &caption).await {
            Ok(()) => summary.charts_sent += 1,
            Err(e) if e.is_recoverable() => {
                error!(user = %user, error = %e, "failed to send weekly chart");
                summary.failures += 1;
            }
            Err(source) => {
                return Err(SchedulerError::Transport {
                    user: user.to_string(),
                    source,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Sent {
        Text { chat: String, text: String },
        Chart { chat: String, caption: String },
    }

    /// Records deliveries; chats listed in `blocked` fail with 403 and chats
    /// in `fatal` fail with 401.
    #[derive(Default)]
    pub(crate) struct RecordingTransport {
        pub sent: Mutex<Vec<Sent>>,
        pub blocked: HashSet<String>,
        pub blocked_charts: HashSet<String>,
        pub fatal: HashSet<String>,
    }

    impl RecordingTransport {
        pub fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }

        fn check(&self, chat_id: &str, blocked: &HashSet<String>) -> Result<(), TransportError> {
            if self.fatal.contains(chat_id) {
                return Err(TransportError::Api {
                    method: "test",
                    code: 401,
                    description: "Unauthorized".to_string(),
                });
            }
            if blocked.contains(chat_id) {
                return Err(TransportError::Api {
                    method: "test",
                    code: 403,
                    description: "Forbidden: bot was blocked by the user".to_string(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send_text(&self, chat_id: &str, text: &str) -> Result<(), TransportError> {
            self.check(chat_id, &self.blocked)?;
            self.sent.lock().unwrap().push(Sent::Text {
                chat: chat_id.to_string(),
                text: text.to_string(),
            });
            Ok(())
        }

        async fn send_chart(&self, chat_id: &str, png: &[u8], caption: &str) -> Result<(), TransportError> {
            assert!(png.starts_with(b"\x89PNG"));
            self.check(chat_id, &self.blocked_charts)?;
            self.sent.lock().unwrap().push(Sent::Chart {
                chat: chat_id.to_string(),
                caption: caption.to_string(),
            });
            Ok(())
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn registry(dir: &TempDir, users: &[(&str, NaiveDate)]) -> Registry {
        let mut registry = Registry::open(
            dir.path().join("users.json"),
            Some(dir.path().join("weeks.json")),
        );
        for (user, birthdate) in users {
            registry.users.set(user, *birthdate).unwrap();
        }
        registry
    }

    fn charts(sent: &[Sent]) -> usize {
        sent.iter().filter(|s| matches!(s, Sent::Chart { .. })).count()
    }

    #[test]
    fn fires_later_today_or_tomorrow() {
        let ten = NaiveTime::from_hms_opt(10, 0, 0).unwrap();
        let morning = date(2024, 3, 20).and_hms_opt(9, 59, 0).unwrap();
        let exactly = date(2024, 3, 20).and_hms_opt(10, 0, 0).unwrap();
        let evening = date(2024, 3, 20).and_hms_opt(18, 0, 0).unwrap();

        assert_eq!(next_fire_after(morning, ten), date(2024, 3, 20).and_time(ten));
        assert_eq!(next_fire_after(exactly, ten), date(2024, 3, 21).and_time(ten));
        assert_eq!(next_fire_after(evening, ten), date(2024, 3, 21).and_time(ten));
    }

    #[test]
    fn new_week_rule() {
        assert!(crossed_new_week(None, 0));
        assert!(crossed_new_week(Some(1252), 1253));
        assert!(!crossed_new_week(Some(1253), 1253));
        assert!(!crossed_new_week(Some(1254), 1253));
    }

    #[tokio::test]
    async fn first_run_sends_summary_and_chart() {
        let dir = TempDir::new().unwrap();
        let mut registry = registry(&dir, &[("1", date(2000, 3, 15))]);
        let transport = RecordingTransport::default();
        let notifier = DailyNotifier::new(Lifespan::default(), Theme::Light);

        let summary = notifier
            .run_batch(&mut registry, &transport, date(2024, 3, 20))
            .await
            .unwrap();

        assert_eq!(summary.texts_sent, 1);
        assert_eq!(summary.charts_sent, 1);
        let sent = transport.sent();
        assert!(matches!(&sent[0], Sent::Text { text, .. } if text.contains("Weeks lived: 1253")));
        assert!(matches!(&sent[1], Sent::Chart { caption, .. } if caption.contains("#1253")));
        assert_eq!(registry.watermarks.get("1"), Some(1253));
    }

    #[tokio::test]
    async fn same_week_sends_no_chart() {
        let dir = TempDir::new().unwrap();
        let mut registry = registry(&dir, &[("1", date(2000, 3, 15))]);
        registry.watermarks.set("1", 1253);
        let transport = RecordingTransport::default();
        let notifier = DailyNotifier::new(Lifespan::default(), Theme::Light);

        notifier
            .run_batch(&mut registry, &transport, date(2024, 3, 21))
            .await
            .unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(charts(&sent), 0);
        assert_eq!(registry.watermarks.get("1"), Some(1253));
    }

    #[tokio::test]
    async fn week_boundary_sends_chart_once() {
        let dir = TempDir::new().unwrap();
        let mut registry = registry(&dir, &[("1", date(2000, 3, 15))]);
        registry.watermarks.set("1", 1253);
        let transport = RecordingTransport::default();
        let notifier = DailyNotifier::new(Lifespan::default(), Theme::Light);

        // 2024-03-27 is exactly one week later
        notifier
            .run_batch(&mut registry, &transport, date(2024, 3, 27))
            .await
            .unwrap();
        notifier
            .run_batch(&mut registry, &transport, date(2024, 3, 28))
            .await
            .unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(charts(&sent), 1);
        assert_eq!(registry.watermarks.get("1"), Some(1254));
    }

    #[tokio::test]
    async fn watermarks_survive_restart() {
        let dir = TempDir::new().unwrap();
        let notifier = DailyNotifier::new(Lifespan::default(), Theme::Light);
        {
            let mut registry = registry(&dir, &[("1", date(2000, 3, 15))]);
            notifier
                .run_batch(&mut registry, &RecordingTransport::default(), date(2024, 3, 20))
                .await
                .unwrap();
        }

        let mut reopened = Registry::open(
            dir.path().join("users.json"),
            Some(dir.path().join("weeks.json")),
        );
        let transport = RecordingTransport::default();
        notifier
            .run_batch(&mut reopened, &transport, date(2024, 3, 21))
            .await
            .unwrap();
        assert_eq!(charts(&transport.sent()), 0);
    }

    #[tokio::test]
    async fn blocked_user_does_not_stop_the_batch() {
        let dir = TempDir::new().unwrap();
        let mut registry = registry(
            &dir,
            &[("1", date(2000, 3, 15)), ("2", date(1990, 1, 1)), ("3", date(1980, 6, 1))],
        );
        let transport = RecordingTransport {
            blocked: HashSet::from(["2".to_string()]),
            blocked_charts: HashSet::from(["3".to_string()]),
            ..Default::default()
        };
        let notifier = DailyNotifier::new(Lifespan::default(), Theme::Light);

        let summary = notifier
            .run_batch(&mut registry, &transport, date(2024, 3, 20))
            .await
            .unwrap();

        assert_eq!(summary.users, 3);
        assert_eq!(summary.texts_sent, 2);
        assert_eq!(summary.charts_sent, 1);
        assert_eq!(summary.failures, 2);
        // a failed summary leaves the watermark alone, a failed chart does not
        assert_eq!(registry.watermarks.get("2"), None);
        assert!(registry.watermarks.get("3").is_some());
    }

    #[tokio::test]
    async fn unauthorized_aborts_the_batch() {
        let dir = TempDir::new().unwrap();
        let mut registry = registry(&dir, &[("1", date(2000, 3, 15)), ("2", date(1990, 1, 1))]);
        let transport = RecordingTransport {
            fatal: HashSet::from(["1".to_string()]),
            ..Default::default()
        };
        let notifier = DailyNotifier::new(Lifespan::default(), Theme::Light);

        let err = notifier
            .run_batch(&mut registry, &transport, date(2024, 3, 20))
            .await
            .unwrap_err();

        assert!(matches!(err, SchedulerError::Transport { ref user, .. } if user == "1"));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn aborted_batch_still_saves_watermarks() {
        let dir = TempDir::new().unwrap();
        let notifier = DailyNotifier::new(Lifespan::default(), Theme::Light);
        {
            let mut registry =
                registry(&dir, &[("1", date(2000, 3, 15)), ("2", date(1990, 1, 1))]);
            registry.watermarks.set("gone", 5);
            let transport = RecordingTransport {
                fatal: HashSet::from(["2".to_string()]),
                ..Default::default()
            };

            let err = notifier
                .run_batch(&mut registry, &transport, date(2024, 3, 20))
                .await
                .unwrap_err();
            assert!(matches!(err, SchedulerError::Transport { ref user, .. } if user == "2"));
            assert_eq!(charts(&transport.sent()), 1);
        }

        let reopened = Registry::open(
            dir.path().join("users.json"),
            Some(dir.path().join("weeks.json")),
        );
        assert_eq!(reopened.watermarks.get("1"), Some(1253));
        assert_eq!(reopened.watermarks.get("2"), None);
        assert_eq!(reopened.watermarks.get("gone"), None);
    }

    #[tokio::test]
    async fn watermarks_of_removed_users_are_pruned() {
        let dir = TempDir::new().unwrap();
        let mut registry = registry(&dir, &[("1", date(2000, 3, 15))]);
        registry.watermarks.set("gone", 5);
        let notifier = DailyNotifier::new(Lifespan::default(), Theme::Light);

        notifier
            .run_batch(&mut registry, &RecordingTransport::default(), date(2024, 3, 20))
            .await
            .unwrap();

        assert_eq!(registry.watermarks.get("gone"), None);
    }
}
