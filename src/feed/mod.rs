mod load;
mod parse;

pub use load::{CACHED_EPISODES_KEY, FeedOrigin, LoadedFeed, fetch_episodes, load_episodes};
pub use parse::{Episode, clean_text, parse_date, parse_feed, search};
