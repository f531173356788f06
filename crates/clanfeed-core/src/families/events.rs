// Event feeds: one new message per upstream event.

use serde::Deserialize;

use super::{POST_EMBEDS, parse_payload};
use crate::model::{Embed, Feed, LogConfig, LogType, MessagePayload, Period, Permission};
use crate::traits::{LogFamily, RenderError};

const JOINED_COLOR: u32 = 0x38d863;
const LEFT_COLOR: u32 = 0xeb3508;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum MemberEvent {
    Joined,
    Left,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Player {
    name: String,
    tag: String,
    #[serde(default)]
    town_hall_level: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct MemberPayload {
    event: MemberEvent,
    player: Player,
}

/// Member joined or left a clan
pub struct MemberLogFamily;

impl LogFamily for MemberLogFamily {
    fn log_type(&self) -> LogType {
        LogType::MemberLog
    }

    fn collection_name(&self) -> &'static str {
        "member_logs"
    }

    fn required_permissions(&self) -> &'static [Permission] {
        POST_EMBEDS
    }

    fn period(&self) -> Period {
        Period::Never
    }

    fn render(&self, feed: &Feed, log: &LogConfig) -> Result<MessagePayload, RenderError> {
        let payload: MemberPayload = parse_payload(feed, self.log_type())?;
        let (verb, fallback_color) = match payload.event {
            MemberEvent::Joined => ("joined", JOINED_COLOR),
            MemberEvent::Left => ("left", LEFT_COLOR),
        };

        let mut embed = Embed::new(format!("{} ({})", payload.player.name, payload.player.tag))
            .description(format!("{} {}", verb, feed.entity_tag))
            .color(log.color.or(Some(fallback_color)))
            .timestamp(feed.observed_at);
        if let Some(th) = payload.player.town_hall_level {
            embed = embed.field("Town Hall", th.to_string(), true);
        }

        Ok(MessagePayload::embed(embed))
    }
}

#[derive(Debug, Deserialize)]
struct Donation {
    name: String,
    count: u32,
}

#[derive(Debug, Deserialize)]
struct DonationPayload {
    #[serde(default)]
    donated: Vec<Donation>,
    #[serde(default)]
    received: Vec<Donation>,
}

fn donation_lines(donations: &[Donation]) -> String {
    donations
        .iter()
        .map(|d| format!("`{:>4}` {}", d.count, d.name))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Donations given and received since the previous batch
pub struct DonationLogFamily;

impl LogFamily for DonationLogFamily {
    fn log_type(&self) -> LogType {
        LogType::DonationLog
    }

    fn collection_name(&self) -> &'static str {
        "donation_logs"
    }

    fn required_permissions(&self) -> &'static [Permission] {
        POST_EMBEDS
    }

    fn period(&self) -> Period {
        Period::Never
    }

    fn render(&self, feed: &Feed, log: &LogConfig) -> Result<MessagePayload, RenderError> {
        let payload: DonationPayload = parse_payload(feed, self.log_type())?;
        if payload.donated.is_empty() && payload.received.is_empty() {
            return Err(RenderError::Unsupported("empty donation batch".to_string()));
        }

        let mut embed = Embed::new(format!("Donations in {}", feed.entity_tag))
            .color(log.color)
            .timestamp(feed.observed_at);
        if !payload.donated.is_empty() {
            embed = embed.field("Donated", donation_lines(&payload.donated), false);
        }
        if !payload.received.is_empty() {
            embed = embed.field("Received", donation_lines(&payload.received), false);
        }

        Ok(MessagePayload::embed(embed))
    }
}
