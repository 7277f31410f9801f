// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;

use serde::Deserialize;
use url::Url;

use crate::error::ConfigError;

/// Prefix for environment variables, e.g. `STORYCAST_FEED_URL`
pub const ENV_PREFIX: &str = "STORYCAST_";

pub const DEFAULT_FEED_URL: &str = "https://anchor.fm/s/2d3bd0d0/podcast/rss";

pub const DEFAULT_RELAYS: [&str; 3] = [
    "https://api.allorigins.win/raw?url=",
    "https://corsproxy.io/?",
    "https://api.codetabs.com/v1/proxy?quest=",
];

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Config {
    #[serde(default = "default_feed_url")]
    pub feed_url: String,
    /// Relay base URLs tried in order after the direct request
    #[serde(default = "default_relays")]
    pub relays: Vec<String>,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_feed_url() -> String {
    DEFAULT_FEED_URL.to_string()
}

fn default_relays() -> Vec<String> {
    DEFAULT_RELAYS.iter().map(|r| r.to_string()).collect()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".storycast")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed_url: default_feed_url(),
            relays: default_relays(),
            data_dir: default_data_dir(),
        }
    }
}

impl Config {
    /// Read `STORYCAST_*` variables from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(envy::prefixed(ENV_PREFIX).from_env::<Config>()?)
    }

    /// Read configuration from explicit key/value pairs
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Ok(envy::prefixed(ENV_PREFIX).from_iter::<_, Config>(vars)?)
    }

    /// Check that the feed URL and every relay are absolute URLs
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_url("feed", &self.feed_url)?;
        for relay in &self.relays {
            check_url("relay", relay)?;
        }
        Ok(())
    }

    /// Directory holding downloaded audio
    pub fn audio_dir(&self) -> PathBuf {
        self.data_dir.join("audio")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join(crate::store::SETTINGS_FILENAME)
    }
}

fn check_url(what: &'static str, value: &str) -> Result<(), ConfigError> {
    Url::parse(value)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidUrl {
            what,
            value: value.to_string(),
            source: e,
        })
}
