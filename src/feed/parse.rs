// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp::Reverse;

use chrono::{DateTime, FixedOffset};
use rss::extension::ExtensionMap;
use serde::{Deserialize, Serialize};

use crate::error::FeedError;

const UNTITLED: &str = "Untitled";

/// A single playable episode from the feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    /// Audio URL, or title + raw publish date when there is no audio
    pub id: String,
    pub title: String,
    pub description: String,
    /// Publish date exactly as it appeared in the feed
    pub pub_date_raw: String,
    pub published_at: Option<DateTime<FixedOffset>>,
    /// Empty when the item has neither an enclosure nor a media URL
    pub audio_url: String,
    pub image_url: Option<String>,
}

impl Episode {
    pub fn has_audio(&self) -> bool {
        !self.audio_url.is_empty()
    }

    /// Case-insensitive substring match over title and description
    pub fn matches(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        query.is_empty()
            || self.title.to_lowercase().contains(&query)
            || self.description.to_lowercase().contains(&query)
    }

    /// Milliseconds since the epoch; unparsable dates count as the epoch
    fn sort_key(&self) -> i64 {
        self.published_at
            .map(|dt| dt.timestamp_millis())
            .unwrap_or(0)
    }
}

/// Filter episodes by a free-text query, keeping feed order
pub fn search<'a>(episodes: &'a [Episode], query: &str) -> Vec<&'a Episode> {
    episodes.iter().filter(|ep| ep.matches(query)).collect()
}

/// Parse RSS feed XML into episodes sorted newest first
pub fn parse_feed(xml: &str) -> Result<Vec<Episode>, FeedError> {
    let channel = rss::Channel::read_from(xml.as_bytes())?;

    let channel_image = channel
        .image()
        .map(|img| img.url().to_string())
        .or_else(|| {
            channel
                .itunes_ext()
                .and_then(|ext| ext.image())
                .map(String::from)
        })
        .filter(|url| !url.is_empty());

    let mut episodes: Vec<Episode> = channel
        .items()
        .iter()
        .map(|item| parse_episode(item, channel_image.as_deref()))
        .collect();

    // Stable, so equal dates keep feed order
    episodes.sort_by_key(|ep| Reverse(ep.sort_key()));

    Ok(episodes)
}

fn parse_episode(item: &rss::Item, channel_image: Option<&str>) -> Episode {
    let title = item
        .title()
        .map(clean_text)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| UNTITLED.to_string());

    let description = item.description().map(clean_text).unwrap_or_default();

    let pub_date_raw = item.pub_date().unwrap_or_default().to_string();
    let published_at = parse_date(&pub_date_raw);

    let audio_url = item
        .enclosure()
        .map(|enc| enc.url().to_string())
        .or_else(|| extension_attr(item.extensions(), "media", "content", "url"))
        .unwrap_or_default();

    let image_url = item
        .itunes_ext()
        .and_then(|ext| ext.image())
        .map(String::from)
        .or_else(|| extension_attr(item.extensions(), "itunes", "image", "href"))
        .filter(|url| !url.is_empty())
        .or_else(|| channel_image.map(String::from));

    let id = if audio_url.is_empty() {
        format!("{}{}", title, pub_date_raw)
    } else {
        audio_url.clone()
    };

    Episode {
        id,
        title,
        description,
        pub_date_raw,
        published_at,
        audio_url,
        image_url,
    }
}

/// Look up `<prefix:name attr="...">` among the elements the rss crate
/// did not map to a known extension
fn extension_attr(extensions: &ExtensionMap, prefix: &str, name: &str, attr: &str) -> Option<String> {
    extensions
        .get(prefix)?
        .get(name)?
        .iter()
        .find_map(|ext| ext.attrs().get(attr).cloned())
        .filter(|value| !value.is_empty())
}

/// Parse a publish date, accepting RFC 2822 and a few common deviations
pub fn parse_date(date_str: &str) -> Option<DateTime<FixedOffset>> {
    let date_str = date_str.trim();
    if date_str.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(date_str) {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(date_str) {
        return Some(dt);
    }

    let formats = [
        "%a, %d %b %Y %H:%M:%S %z",
        "%d %b %Y %H:%M:%S %z",
        "%Y-%m-%d %H:%M:%S %z",
    ];
    formats
        .iter()
        .find_map(|format| DateTime::parse_from_str(date_str, format).ok())
}

/// Reduce an HTML fragment to plain text: drop tags, decode entities,
/// collapse whitespace
pub fn clean_text(html: &str) -> String {
    let mut stripped = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(open) = rest.find('<') {
        stripped.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let starts_tag = after
            .chars()
            .next()
            .is_some_and(|c| c == '/' || c == '!' || c.is_ascii_alphabetic());

        match after.find('>') {
            Some(close) if starts_tag => {
                stripped.push(' ');
                rest = &after[close + 1..];
            }
            // A bare `<` is text, e.g. "ages 3 < 5"
            _ => {
                stripped.push('<');
                rest = after;
            }
        }
    }
    stripped.push_str(rest);

    let decoded = html_escape::decode_html_entities(&stripped);
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}
