//! Chat command handling.
//!
//! Messages are turned into replies without touching the network, so the
//! run loop only has to deliver what comes back.

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveTime};
use tracing::{error, info};

use crate::age::Lifespan;
use crate::birthdate::{self, BirthdateError};
use crate::scheduler;
use crate::stats::{self, LifeStats};
use crate::store::Registry;
use crate::svg::Theme;
use crate::telegram::{Transport, TransportError};

pub const HELP_TEXT: &str = "Commands:\n\
/start - Enter or change your birthdate\n\
/weeks - How many weeks and days are lived and left\n\
/reset - Forget your birthdate and start over\n\
/help - This list\n\
/stats - Chart of lived and remaining weeks";

const NOT_REGISTERED: &str = "Send your birthdate with /start first.";
const ASK_BIRTHDATE: &str = "Hi! Send me your birthdate as DD.MM.YYYY:";
const SAVE_FAILED: &str = "Sorry, I could not save that. Please try again later.";
const CHART_FAILED: &str = "Sorry, I could not draw your chart right now.";

/// Where a chat is in the registration dialogue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Conversation {
    #[default]
    Idle,
    AwaitingBirthdate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Chart { png: Vec<u8>, caption: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Start,
    Weeks,
    Reset,
    Help,
    Stats,
    Unknown,
}

/// `/weeks@my_bot args` → `Weeks`. Plain text is `None`.
fn parse_command(text: &str) -> Option<Command> {
    let word = text.split_whitespace().next()?;
    let name = word.strip_prefix('/')?;
    let name = name.split('@').next().unwrap_or(name);
    Some(match name.to_ascii_lowercase().as_str() {
        "start" => Command::Start,
        "weeks" => Command::Weeks,
        "reset" => Command::Reset,
        "help" => Command::Help,
        "stats" => Command::Stats,
        _ => Command::Unknown,
    })
}

pub struct Bot {
    lifespan: Lifespan,
    theme: Theme,
    trigger_time: NaiveTime,
    conversations: HashMap<String, Conversation>,
}

impl Bot {
    /// `trigger_time` is only quoted back to users; the daily job keeps
    /// its own schedule.
    pub fn new(lifespan: Lifespan, theme: Theme, trigger_time: NaiveTime) -> Self {
        Self {
            lifespan,
            theme,
            trigger_time,
            conversations: HashMap::new(),
        }
    }

    pub fn conversation(&self, chat_id: &str) -> Conversation {
        self.conversations.get(chat_id).copied().unwrap_or_default()
    }

    /// Handles one incoming text message from `chat_id`.
    pub fn handle(
        &mut self,
        registry: &mut Registry,
        chat_id: &str,
        text: &str,
        today: NaiveDate,
    ) -> Vec<Reply> {
        match parse_command(text) {
            Some(Command::Start) => {
                self.conversations
                    .insert(chat_id.to_string(), Conversation::AwaitingBirthdate);
                vec![Reply::Text(ASK_BIRTHDATE.to_string())]
            }
            Some(Command::Weeks) => vec![self.report(registry, chat_id, today)],
            Some(Command::Stats) => vec![self.chart(registry, chat_id, today)],
            Some(Command::Help) => vec![Reply::Text(HELP_TEXT.to_string())],
            Some(Command::Reset) => vec![self.reset(registry, chat_id)],
            Some(Command::Unknown) => vec![Reply::Text(format!("Unknown command.\n\n{HELP_TEXT}"))],
            None => match self.conversation(chat_id) {
                Conversation::AwaitingBirthdate => self.register(registry, chat_id, text, today),
                Conversation::Idle => vec![Reply::Text(
                    "Send /start to set your birthdate or /help for the command list.".to_string(),
                )],
            },
        }
    }

    /// Same text as the daily summary, on demand.
    pub fn report(&self, registry: &Registry, chat_id: &str, today: NaiveDate) -> Reply {
        let Some(birthdate) = registry.users.get(chat_id) else {
            return Reply::Text(NOT_REGISTERED.to_string());
        };
        let stats = LifeStats::compute(birthdate, today, &self.lifespan);
        Reply::Text(stats::summary_text(birthdate, today, &stats, &self.lifespan))
    }

    /// Same chart as the daily new-week message, on demand.
    pub fn chart(&self, registry: &Registry, chat_id: &str, today: NaiveDate) -> Reply {
        let Some(birthdate) = registry.users.get(chat_id) else {
            return Reply::Text(NOT_REGISTERED.to_string());
        };
        let stats = LifeStats::compute(birthdate, today, &self.lifespan);
        match scheduler::render_chart(stats.weeks_lived, &self.lifespan, self.theme) {
            Ok(png) => Reply::Chart {
                png,
                caption: stats::CHART_CAPTION.to_string(),
            },
            Err(e) => {
                error!(user = %chat_id, error = %e, "failed to render chart");
                Reply::Text(CHART_FAILED.to_string())
            }
        }
    }

    fn reset(&mut self, registry: &mut Registry, chat_id: &str) -> Reply {
        self.conversations.remove(chat_id);
        match registry.unregister(chat_id) {
            Ok(true) => {
                info!(user = %chat_id, "user reset");
                Reply::Text("Your data has been removed. Send a new birthdate with /start.".to_string())
            }
            Ok(false) => Reply::Text(format!("Nothing to reset. {NOT_REGISTERED}")),
            Err(e) => {
                error!(user = %chat_id, error = %e, "failed to persist reset");
                Reply::Text(SAVE_FAILED.to_string())
            }
        }
    }

    fn register(
        &mut self,
        registry: &mut Registry,
        chat_id: &str,
        text: &str,
        today: NaiveDate,
    ) -> Vec<Reply> {
        let birthdate = match birthdate::parse_birthdate(text, today) {
            Ok(date) => date,
            Err(BirthdateError::InFuture(_)) => {
                return vec![Reply::Text(
                    "That date is in the future. Send your birthdate as DD.MM.YYYY.".to_string(),
                )];
            }
            Err(_) => {
                return vec![Reply::Text(
                    "Could not read that date. Send it as DD.MM.YYYY.".to_string(),
                )];
            }
        };

        if let Err(e) = registry.users.set(chat_id, birthdate) {
            error!(user = %chat_id, error = %e, "failed to persist birthdate");
            return vec![Reply::Text(SAVE_FAILED.to_string())];
        }

        info!(user = %chat_id, "birthdate registered");
        self.conversations.remove(chat_id);

        vec![
            Reply::Text(format!(
                "Birthdate saved.\n\
                 Let's assume you will live {years} years.\n\
                 Every day at {time} I will send you how many weeks are lived and left.\n\
                 Here is what I can do:",
                years = self.lifespan.total_years,
                time = self.trigger_time.format("%H:%M"),
            )),
            Reply::Text(HELP_TEXT.to_string()),
        ]
    }
}

/// Delivers replies to `chat_id`, stopping at the first failure.
pub async fn deliver<T>(transport: &T, chat_id: &str, replies: Vec<Reply>) -> Result<(), TransportError>
where
    T: Transport + ?Sized,
{
    for reply in replies {
        match reply {
            Reply::Text(text) => transport.send_text(chat_id, &text).await?,
            Reply::Chart { png, caption } => transport.send_chart(chat_id, &png, &caption).await?,
        }
    }
    Ok(())
}
