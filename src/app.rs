//! The bot's event loop.
//!
//! One task interleaves long-polling for chat updates with the daily timer.
//! Whichever finishes first is handled; an interrupted poll is simply
//! repeated, since Telegram only forgets updates once the next offset is
//! requested.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use tracing::{error, info, warn};

use crate::bot::{self, Bot};
use crate::config::Config;
use crate::scheduler::{self, DailyNotifier};
use crate::store::Registry;
use crate::telegram::{TelegramClient, Update};

enum Event {
    Tick,
    Updates(Result<Vec<Update>, crate::telegram::TransportError>),
    Shutdown,
}

fn until(deadline: NaiveDateTime) -> Duration {
    let now = Local::now().naive_local();
    (deadline - now).to_std().unwrap_or(Duration::ZERO)
}

pub async fn run(config: Config) -> Result<()> {
    let token = config.bot_token()?;
    let client = TelegramClient::new(
        &token,
        &config.telegram.api_base,
        Duration::from_secs(config.telegram.poll_timeout_secs),
    )
    .context("Failed to build Bot API client")?;

    let mut registry = Registry::open(
        &config.storage.users_file,
        config.storage.watermark_path(),
    );
    info!(
        users = registry.users.len(),
        path = %registry.users.path().display(),
        "user store loaded"
    );

    let trigger = config.schedule.trigger_time;
    let mut bot = Bot::new(config.lifespan, config.chart.theme, trigger);
    let notifier = DailyNotifier::new(config.lifespan, config.chart.theme);

    let mut offset = client
        .skip_pending()
        .await
        .context("Failed to reach the Bot API")?;

    let mut next_fire = scheduler::next_fire_after(Local::now().naive_local(), trigger);
    info!(next = %next_fire, "daily summary scheduled");

    loop {
        let event = tokio::select! {
            _ = tokio::time::sleep(until(next_fire)) => Event::Tick,
            updates = client.get_updates(offset) => Event::Updates(updates),
            _ = tokio::signal::ctrl_c() => Event::Shutdown,
        };

        match event {
            Event::Tick => {
                let now = Local::now().naive_local();
                info!("running daily summary");
                notifier
                    .run_batch(&mut registry, &client, now.date())
                    .await
                    .context("Daily summary aborted")?;
                next_fire = scheduler::next_fire_after(now, trigger);
                info!(next = %next_fire, "daily summary scheduled");
            }
            Event::Updates(Ok(updates)) => {
                for update in updates {
                    offset = offset.max(update.update_id + 1);
                    let Some(message) = update.message else {
                        continue;
                    };
                    let Some(text) = message.text else {
                        continue;
                    };

                    let chat_id = message.chat.id.to_string();
                    let today = Local::now().date_naive();
                    let replies = bot.handle(&mut registry, &chat_id, &text, today);

                    if let Err(e) = bot::deliver(&client, &chat_id, replies).await {
                        if !e.is_recoverable() {
                            return Err(e).context("Bot API refused a reply");
                        }
                        warn!(user = %chat_id, error = %e, "failed to reply");
                    }
                }
            }
            Event::Updates(Err(e)) if e.is_recoverable() => {
                error!(error = %e, "polling failed, retrying");
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Event::Updates(Err(e)) => {
                return Err(e).context("Polling for updates failed");
            }
            Event::Shutdown => {
                info!("shutdown signal received");
                return Ok(());
            }
        }
    }
}
