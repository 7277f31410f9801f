// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::FeedError;
use crate::fetch::{ResilientFetcher, ResponseKind};
use crate::http::HttpClient;
use crate::progress::{ProgressEvent, SharedProgressReporter};
use crate::store::SettingsStore;

use super::parse::{Episode, parse_feed};

/// Settings key holding the last successfully parsed episode list
pub const CACHED_EPISODES_KEY: &str = "cachedEpisodes";

/// Where a loaded episode list came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedOrigin {
    /// Freshly fetched and parsed
    Network,
    /// The feed was unavailable; this is the last cached copy
    Cache,
    /// The feed was unavailable and nothing was cached
    Empty,
}

/// Result of loading the feed
#[derive(Debug, Clone)]
pub struct LoadedFeed {
    pub episodes: Vec<Episode>,
    pub origin: FeedOrigin,
}

/// Fetch the feed through the fallback chain and parse it
pub async fn fetch_episodes<C: HttpClient>(
    fetcher: &ResilientFetcher<C>,
    feed_url: &str,
) -> Result<Vec<Episode>, FeedError> {
    let xml = fetcher.fetch(feed_url, ResponseKind::Text).await?.into_text();
    parse_feed(&xml)
}

/// Load episodes, falling back to the cached list when the feed is unavailable.
///
/// Never fails: without network and cache the list is simply empty.
pub async fn load_episodes<C: HttpClient>(
    fetcher: &ResilientFetcher<C>,
    feed_url: &str,
    settings: &SettingsStore,
    reporter: &SharedProgressReporter,
) -> LoadedFeed {
    reporter.report(ProgressEvent::FetchingFeed {
        url: feed_url.to_string(),
    });

    let loaded = match fetch_episodes(fetcher, feed_url).await {
        Ok(episodes) => {
            debug!(count = episodes.len(), "feed loaded from network");
            if let Err(e) = settings.set(CACHED_EPISODES_KEY, &episodes) {
                warn!(error = %e, "failed to cache episode list");
            }
            LoadedFeed {
                episodes,
                origin: FeedOrigin::Network,
            }
        }
        Err(e) => {
            warn!(error = %e, "feed unavailable, using cache if available");
            match settings.get::<Vec<Episode>>(CACHED_EPISODES_KEY) {
                Some(episodes) => LoadedFeed {
                    episodes,
                    origin: FeedOrigin::Cache,
                },
                None => LoadedFeed {
                    episodes: Vec::new(),
                    origin: FeedOrigin::Empty,
                },
            }
        }
    };

    reporter.report(ProgressEvent::FeedLoaded {
        episode_count: loaded.episodes.len(),
        origin: loaded.origin,
    });

    loaded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchStrategy;
    use crate::progress::NoopReporter;
    use crate::test_support::FakeHttpClient;

    const FEED_URL: &str = "https://example.com/feed.xml";
    const RELAY_A: &str = "https://relay-a.test/raw?url=";
    const RELAY_B: &str = "https://relay-b.test/?";

    const FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Stories</title>
    <description>Stories</description>
    <item>
      <title>Older</title>
      <pubDate>Mon, 01 Jan 2024 12:00:00 +0000</pubDate>
      <enclosure url="https://example.com/older.mp3" type="audio/mpeg"/>
    </item>
    <item>
      <title>Newer</title>
      <pubDate>Tue, 02 Jan 2024 12:00:00 +0000</pubDate>
      <enclosure url="https://example.com/newer.mp3" type="audio/mpeg"/>
    </item>
  </channel>
</rss>"#;

    fn relayed(base: &str) -> String {
        FetchStrategy::Relay {
            base: base.to_string(),
        }
        .endpoint_for(FEED_URL)
    }

    #[tokio::test]
    async fn direct_success_is_cached() {
        let client = FakeHttpClient::new().route(FEED_URL, 200, FEED);
        let fetcher = ResilientFetcher::new(client, [RELAY_A]);
        let settings = SettingsStore::in_memory();

        let loaded = load_episodes(&fetcher, FEED_URL, &settings, &NoopReporter::shared()).await;

        assert_eq!(loaded.origin, FeedOrigin::Network);
        assert_eq!(loaded.episodes[0].title, "Newer");
        let cached: Vec<Episode> = settings.get(CACHED_EPISODES_KEY).unwrap();
        assert_eq!(cached, loaded.episodes);
    }

    #[tokio::test]
    async fn second_relay_gives_same_episodes_as_direct() {
        let direct_client = FakeHttpClient::new().route(FEED_URL, 200, FEED);
        let direct = fetch_episodes(&ResilientFetcher::new(direct_client, [RELAY_A, RELAY_B]), FEED_URL)
            .await
            .unwrap();

        let relay_client = FakeHttpClient::new()
            .route(FEED_URL, 403, "")
            .route(relayed(RELAY_A), 503, "")
            .route(relayed(RELAY_B), 200, FEED);
        let settings = SettingsStore::in_memory();
        let loaded = load_episodes(
            &ResilientFetcher::new(relay_client, [RELAY_A, RELAY_B]),
            FEED_URL,
            &settings,
            &NoopReporter::shared(),
        )
        .await;

        assert_eq!(loaded.origin, FeedOrigin::Network);
        assert_eq!(loaded.episodes, direct);
    }

    #[tokio::test]
    async fn unavailable_feed_falls_back_to_cache() {
        let settings = SettingsStore::in_memory();
        let online = FakeHttpClient::new().route(FEED_URL, 200, FEED);
        let first = load_episodes(
            &ResilientFetcher::new(online, [RELAY_A]),
            FEED_URL,
            &settings,
            &NoopReporter::shared(),
        )
        .await;

        let offline = FakeHttpClient::new();
        let second = load_episodes(
            &ResilientFetcher::new(offline, [RELAY_A]),
            FEED_URL,
            &settings,
            &NoopReporter::shared(),
        )
        .await;

        assert_eq!(second.origin, FeedOrigin::Cache);
        assert_eq!(second.episodes, first.episodes);
    }

    #[tokio::test]
    async fn unparsable_feed_without_cache_is_empty() {
        let client = FakeHttpClient::new().route(FEED_URL, 200, "<html>oops</html>");
        let settings = SettingsStore::in_memory();

        let loaded = load_episodes(
            &ResilientFetcher::new(client, [RELAY_A]),
            FEED_URL,
            &settings,
            &NoopReporter::shared(),
        )
        .await;

        assert_eq!(loaded.origin, FeedOrigin::Empty);
        assert!(loaded.episodes.is_empty());
    }
}
