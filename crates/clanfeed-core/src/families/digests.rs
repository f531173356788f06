// Digests: one message per period, edited in place on every refresh.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{EDIT_EMBEDS, parse_payload};
use crate::model::{Embed, Feed, LogConfig, LogType, MessagePayload, Period, Permission};
use crate::traits::{LogFamily, RenderError};

/// Legend league days roll over at 05:00 UTC
pub const LEGEND_RESET_HOUR_UTC: u32 = 5;

const MAX_LINES: usize = 50;

fn digest_embed(title: String, lines: Vec<String>, log: &LogConfig, feed: &Feed) -> Embed {
    let mut description = lines.into_iter().take(MAX_LINES).collect::<Vec<_>>().join("\n");
    if description.is_empty() {
        description = "No data yet.".to_string();
    }
    Embed::new(title)
        .description(description)
        .color(log.color)
        .footer(format!("Last updated for {}", feed.entity_tag))
        .timestamp(feed.observed_at)
}

#[derive(Debug, Deserialize)]
struct LegendMember {
    name: String,
    trophies: u32,
    #[serde(default)]
    attacks: Vec<i32>,
    #[serde(default)]
    defenses: Vec<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegendPayload {
    clan_name: String,
    members: Vec<LegendMember>,
}

/// Legend league attacks and defenses of the current legend day
pub struct LegendDigestFamily;

impl LogFamily for LegendDigestFamily {
    fn log_type(&self) -> LogType {
        LogType::LegendDigest
    }

    fn collection_name(&self) -> &'static str {
        "legend_logs"
    }

    fn required_permissions(&self) -> &'static [Permission] {
        EDIT_EMBEDS
    }

    fn period(&self) -> Period {
        Period::Daily {
            reset_hour_utc: LEGEND_RESET_HOUR_UTC,
        }
    }

    fn render(&self, feed: &Feed, log: &LogConfig) -> Result<MessagePayload, RenderError> {
        let mut payload: LegendPayload = parse_payload(feed, self.log_type())?;
        payload.members.sort_by(|a, b| b.trophies.cmp(&a.trophies));

        let lines = payload
            .members
            .iter()
            .map(|m| {
                let gained: i64 = m.attacks.iter().copied().map(i64::from).sum();
                let lost: i64 = m.defenses.iter().copied().map(i64::from).sum();
                format!("`{:>5}` `{:<+4}` `{:<+4}` {}", m.trophies, gained, lost, m.name)
            })
            .collect();

        let title = format!("{} - Legend League Day", payload.clan_name);
        Ok(MessagePayload::embed(digest_embed(title, lines, log, feed)))
    }
}

#[derive(Debug, Deserialize)]
struct GamesMember {
    name: String,
    points: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GamesPayload {
    clan_name: String,
    members: Vec<GamesMember>,
    #[serde(default = "default_max_points")]
    max_points: u32,
}

fn default_max_points() -> u32 {
    4000
}

/// Clan games points of the current month
pub struct ClanGamesDigestFamily;

impl LogFamily for ClanGamesDigestFamily {
    fn log_type(&self) -> LogType {
        LogType::ClanGamesDigest
    }

    fn collection_name(&self) -> &'static str {
        "clan_games_logs"
    }

    fn required_permissions(&self) -> &'static [Permission] {
        EDIT_EMBEDS
    }

    fn period(&self) -> Period {
        Period::Monthly
    }

    fn render(&self, feed: &Feed, log: &LogConfig) -> Result<MessagePayload, RenderError> {
        let mut payload: GamesPayload = parse_payload(feed, self.log_type())?;
        payload.members.sort_by(|a, b| b.points.cmp(&a.points));

        let total: u32 = payload.members.iter().map(|m| m.points).sum();
        let max = payload.max_points;
        let lines = payload
            .members
            .iter()
            .map(|m| {
                let mark = if m.points >= max { "✓" } else { " " };
                format!("`{:>4}` {} {}", m.points.min(max), mark, m.name)
            })
            .collect();

        let title = format!("{} - Clan Games ({} points)", payload.clan_name, total);
        Ok(MessagePayload::embed(digest_embed(title, lines, log, feed)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CapitalMember {
    name: String,
    capital_resources_looted: u64,
    #[serde(default)]
    attacks: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CapitalPayload {
    clan_name: String,
    members: Vec<CapitalMember>,
}

/// Capital raid contributions of the current month
pub struct CapitalDigestFamily;

impl LogFamily for CapitalDigestFamily {
    fn log_type(&self) -> LogType {
        LogType::CapitalDigest
    }

    fn collection_name(&self) -> &'static str {
        "capital_logs"
    }

    fn required_permissions(&self) -> &'static [Permission] {
        EDIT_EMBEDS
    }

    fn period(&self) -> Period {
        Period::Monthly
    }

    fn render(&self, feed: &Feed, log: &LogConfig) -> Result<MessagePayload, RenderError> {
        let mut payload: CapitalPayload = parse_payload(feed, self.log_type())?;
        payload
            .members
            .sort_by(|a, b| b.capital_resources_looted.cmp(&a.capital_resources_looted));

        let lines = payload
            .members
            .iter()
            .map(|m| format!("`{:>7}` `{}/6` {}", m.capital_resources_looted, m.attacks, m.name))
            .collect();

        let title = format!("{} - Capital Raids", payload.clan_name);
        Ok(MessagePayload::embed(digest_embed(title, lines, log, feed)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeenMember {
    name: String,
    #[serde(default)]
    last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LastSeenPayload {
    clan_name: String,
    members: Vec<SeenMember>,
}

fn ago(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(then);
    if elapsed.num_days() > 0 {
        format!("{}d", elapsed.num_days())
    } else if elapsed.num_hours() > 0 {
        format!("{}h", elapsed.num_hours())
    } else {
        format!("{}m", elapsed.num_minutes().max(0))
    }
}

/// Member activity board, kept as a single message
pub struct LastSeenDigestFamily;

impl LogFamily for LastSeenDigestFamily {
    fn log_type(&self) -> LogType {
        LogType::LastSeenDigest
    }

    fn collection_name(&self) -> &'static str {
        "last_seen_logs"
    }

    fn required_permissions(&self) -> &'static [Permission] {
        EDIT_EMBEDS
    }

    fn period(&self) -> Period {
        Period::Forever
    }

    fn render(&self, feed: &Feed, log: &LogConfig) -> Result<MessagePayload, RenderError> {
        let mut payload: LastSeenPayload = parse_payload(feed, self.log_type())?;
        // Most recent first, never-seen members last
        payload.members.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));

        let lines = payload
            .members
            .iter()
            .map(|m| match m.last_seen {
                Some(seen) => format!("`{:>4}` {}", ago(seen, feed.observed_at), m.name),
                None => format!("`   -` {}", m.name),
            })
            .collect();

        let title = format!("{} - Last Seen", payload.clan_name);
        Ok(MessagePayload::embed(digest_embed(title, lines, log, feed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChannelId, DeliveryTarget, GuildId};
    use serde_json::json;

    fn log(log_type: LogType) -> LogConfig {
        LogConfig::new("1", GuildId(1), "#2PP", log_type, ChannelId(2), DeliveryTarget::new(3, "t"))
            .with_color(0x123456)
    }

    #[test]
    fn test_legend_digest_sorts_by_trophies() {
        let feed = Feed::new(
            LogType::LegendDigest,
            "#2PP",
            json!({
                "clanName": "Reddit",
                "members": [
                    { "name": "Low", "trophies": 5000, "attacks": [30, 32], "defenses": [-20] },
                    { "name": "High", "trophies": 5600 }
                ]
            }),
        );
        let payload = LegendDigestFamily.render(&feed, &log(LogType::LegendDigest)).unwrap();
        let description = payload.embeds[0].description.clone().unwrap();
        let first = description.lines().next().unwrap();
        assert!(first.ends_with("High"));
        assert!(description.contains("+62"));
        assert_eq!(payload.embeds[0].color, Some(0x123456));
    }

    #[test]
    fn test_legend_digest_signs_and_extreme_totals() {
        let feed = Feed::new(
            LogType::LegendDigest,
            "#2PP",
            json!({
                "clanName": "Reddit",
                "members": [
                    { "name": "Max", "trophies": 6000, "attacks": [i32::MAX, i32::MAX], "defenses": [i32::MIN, i32::MIN] },
                    { "name": "Odd", "trophies": 5000, "attacks": [-5], "defenses": [7] }
                ]
            }),
        );
        let payload = LegendDigestFamily.render(&feed, &log(LogType::LegendDigest)).unwrap();
        let description = payload.embeds[0].description.clone().unwrap();
        assert!(description.contains("+4294967294"));
        assert!(description.contains("-4294967296"));
        assert!(description.contains("`-5  ` `+7  ` Odd"));
        assert!(!description.contains("+-"));
        assert!(!description.contains("--"));
    }

    #[test]
    fn test_clan_games_caps_points_and_totals() {
        let feed = Feed::new(
            LogType::ClanGamesDigest,
            "#2PP",
            json!({
                "clanName": "Reddit",
                "members": [{ "name": "A", "points": 4500 }, { "name": "B", "points": 100 }]
            }),
        );
        let payload = ClanGamesDigestFamily.render(&feed, &log(LogType::ClanGamesDigest)).unwrap();
        let embed = &payload.embeds[0];
        assert!(embed.title.as_deref().unwrap().contains("4600 points"));
        assert!(embed.description.as_deref().unwrap().contains("4000"));
    }

    #[test]
    fn test_last_seen_handles_missing_timestamps() {
        let now = Utc::now();
        let feed = Feed::new(
            LogType::LastSeenDigest,
            "#2PP",
            json!({
                "clanName": "Reddit",
                "members": [
                    { "name": "Ghost" },
                    { "name": "Active", "lastSeen": now - chrono::Duration::hours(3) }
                ]
            }),
        );
        let payload = LastSeenDigestFamily.render(&feed, &log(LogType::LastSeenDigest)).unwrap();
        let description = payload.embeds[0].description.clone().unwrap();
        let lines: Vec<&str> = description.lines().collect();
        assert!(lines[0].contains("Active"));
        assert!(lines[1].contains("Ghost"));
    }

    #[test]
    fn test_digest_periods() {
        assert_eq!(LegendDigestFamily.period(), Period::Daily { reset_hour_utc: 5 });
        assert_eq!(ClanGamesDigestFamily.period(), Period::Monthly);
        assert_eq!(LastSeenDigestFamily.period(), Period::Forever);
    }

    #[test]
    fn test_digest_without_members_list_is_malformed() {
        let feed = Feed::new(LogType::CapitalDigest, "#2PP", json!({ "clanName": "Reddit" }));
        assert!(CapitalDigestFamily.render(&feed, &log(LogType::CapitalDigest)).is_err());
    }
}
