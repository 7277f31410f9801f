use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use colored::Colorize;
use console::Emoji;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use storycast::{
    Config, DownloadManager, DownloadOutcome, Episode, FeedOrigin, FsBlobStore, HeadlessMedia,
    Library, MediaSource, NoopReporter, PlaybackController, PlaybackState, ProgressEvent,
    ProgressReporter, ReqwestClient, ResilientFetcher, SettingsStore, SharedBlobStore,
    SharedProgressReporter, load_episodes,
};

// Emoji with fallback for terminals without Unicode support
static BOOK: Emoji<'_, '_> = Emoji("📚 ", "");
static SEARCH: Emoji<'_, '_> = Emoji("🔍 ", "[~] ");
static HEADPHONES: Emoji<'_, '_> = Emoji("🎧 ", "[i] ");
static DOWNLOAD: Emoji<'_, '_> = Emoji("📥 ", "[v] ");
static SUCCESS: Emoji<'_, '_> = Emoji("✅ ", "[+] ");
static FAILURE: Emoji<'_, '_> = Emoji("❌ ", "[!] ");
static HEART: Emoji<'_, '_> = Emoji("❤️  ", "<3 ");
static TRASH: Emoji<'_, '_> = Emoji("🗑️  ", "[-] ");

/// Listen to and keep children's stories from a podcast feed
#[derive(Parser, Debug)]
#[command(name = "storycast")]
#[command(about = "Listen to and keep children's stories from a podcast feed")]
#[command(version)]
struct Args {
    /// RSS feed URL (overrides STORYCAST_FEED_URL)
    #[arg(long, global = true)]
    feed: Option<String>,

    /// Directory for downloaded audio and settings (overrides STORYCAST_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Relay base URL to try when a direct request fails; repeat for more
    #[arg(long = "relay", global = true)]
    relays: Vec<String>,

    /// Quiet mode - suppress progress output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List episodes, newest first
    List {
        /// Only episodes whose title or description contains this text
        #[arg(short, long)]
        search: Option<String>,

        /// Only episodes available offline
        #[arg(long)]
        offline: bool,

        /// Only favorite episodes
        #[arg(long)]
        favorites: bool,
    },

    /// Download an episode for offline listening, or remove it if already downloaded
    Download {
        /// Episode number as shown by `list`
        number: usize,
    },

    /// Show downloaded episodes
    Downloads,

    /// Remove a downloaded episode
    Remove {
        /// Episode number as shown by `list`
        number: usize,
    },

    /// Start playing an episode
    Play {
        /// Episode number as shown by `list`
        number: usize,
    },

    /// Mark or unmark an episode as favorite
    Favorite {
        /// Episode number as shown by `list`
        number: usize,
    },

    /// Show recently played episodes
    History,

    /// Show or change preferences
    Prefs {
        #[arg(long)]
        age_group: Option<String>,

        #[arg(long)]
        language: Option<String>,
    },

    /// Repair disagreement between download records and stored audio
    Reconcile,
}

/// Progress reporter using indicatif for terminal output
struct IndicatifReporter {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
    main_bar: ProgressBar,
}

impl IndicatifReporter {
    fn new() -> Self {
        let multi = MultiProgress::new();

        let main_style = ProgressStyle::default_bar()
            .template("{spinner:.green} {wide_msg}")
            .unwrap();

        let main_bar = multi.add(ProgressBar::new_spinner());
        main_bar.set_style(main_style);
        main_bar.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            multi,
            bars: Mutex::new(HashMap::new()),
            main_bar,
        }
    }

    fn get_or_create_bar(&self, episode_id: &str) -> ProgressBar {
        let mut bars = self.bars.lock().unwrap();

        if let Some(bar) = bars.get(episode_id) {
            return bar.clone();
        }

        let style = ProgressStyle::default_bar()
            .template(&format!(
                "  {DOWNLOAD}[{{bar:30.cyan/blue}}] {{bytes}}/{{total_bytes}} {{wide_msg}}"
            ))
            .unwrap()
            .progress_chars("█▓░");

        let bar = self.multi.add(ProgressBar::new(0));
        bar.set_style(style);
        bars.insert(episode_id.to_string(), bar.clone());
        bar
    }

    fn finish_bar(&self, episode_id: &str) {
        let mut bars = self.bars.lock().unwrap();
        if let Some(bar) = bars.remove(episode_id) {
            bar.finish_and_clear();
        }
    }
}

impl Drop for IndicatifReporter {
    fn drop(&mut self) {
        // Commands that never load the feed leave the spinner running
        self.main_bar.finish_and_clear();
    }
}

impl ProgressReporter for IndicatifReporter {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::FetchingFeed { url } => {
                self.main_bar
                    .set_message(format!("{SEARCH}Fetching feed: {}", url.cyan()));
            }

            ProgressEvent::AttemptFailed { endpoint, .. } => {
                self.main_bar.set_message(format!(
                    "{SEARCH}Retrying, {} did not answer",
                    truncate_title(&endpoint, 50).dimmed()
                ));
            }

            ProgressEvent::FeedLoaded {
                episode_count,
                origin,
            } => {
                let note = match origin {
                    FeedOrigin::Network => "".normal(),
                    FeedOrigin::Cache => " (offline, showing cached list)".yellow(),
                    FeedOrigin::Empty => " (feed unavailable)".red(),
                };
                self.main_bar.finish_and_clear();
                println!(
                    "{HEADPHONES}{} stories{}",
                    episode_count.to_string().cyan(),
                    note
                );
            }

            ProgressEvent::DownloadStarting {
                episode_id,
                episode_title,
            } => {
                let bar = self.get_or_create_bar(&episode_id);
                bar.set_position(0);
                bar.set_message(truncate_title(&episode_title, 40));
            }

            ProgressEvent::DownloadProgress {
                episode_id,
                bytes_downloaded,
                total_bytes,
            } => {
                let bar = self.get_or_create_bar(&episode_id);
                if let Some(total) = total_bytes {
                    bar.set_length(total);
                }
                bar.set_position(bytes_downloaded);
            }

            ProgressEvent::DownloadCompleted {
                episode_id,
                episode_title,
                bytes_downloaded,
            } => {
                let bar = self.get_or_create_bar(&episode_id);
                bar.set_position(bytes_downloaded);
                self.finish_bar(&episode_id);
                println!(
                    "{SUCCESS}{} saved for offline listening",
                    truncate_title(&episode_title, 40).green()
                );
            }

            ProgressEvent::DownloadFailed {
                episode_id,
                episode_title,
                error,
            } => {
                let bar = self.get_or_create_bar(&episode_id);
                bar.abandon_with_message(format!(
                    "{FAILURE}{} - {}",
                    truncate_title(&episode_title, 30).red(),
                    error.red()
                ));
                self.finish_bar(&episode_id);
            }

            ProgressEvent::DownloadRemoved { episode_title, .. } => {
                println!("{TRASH}{} removed", truncate_title(&episode_title, 40).yellow());
            }

            ProgressEvent::Reconciled {
                orphaned_metadata,
                orphaned_blobs,
            } => {
                if orphaned_metadata + orphaned_blobs > 0 {
                    println!(
                        "{} dropped {} stale records and {} unreferenced audio files",
                        "Repaired downloads:".yellow(),
                        orphaned_metadata,
                        orphaned_blobs
                    );
                }
            }
        }
    }
}

fn truncate_title(title: &str, max_len: usize) -> String {
    if title.chars().count() <= max_len {
        title.to_string()
    } else {
        let kept: String = title.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

fn format_date(episode: &Episode) -> String {
    episode
        .published_at
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| episode.pub_date_raw.clone())
}

/// Flags of the `list` command; an episode is shown only if it passes all of them
struct ListFilter {
    query: Option<String>,
    offline: bool,
    favorites: bool,
}

impl ListFilter {
    fn accepts(&self, episode: &Episode, downloaded: bool, favorite: bool) -> bool {
        (!self.offline || downloaded)
            && (!self.favorites || favorite)
            && self.query.as_deref().is_none_or(|q| episode.matches(q))
    }
}

/// Pick an episode by its 1-based position in the list
fn episode_at(episodes: &[Episode], number: usize) -> Result<(usize, &Episode)> {
    match number.checked_sub(1).and_then(|i| episodes.get(i).map(|ep| (i, ep))) {
        Some(found) => Ok(found),
        None => bail!(
            "No episode #{} (the feed has {} episodes)",
            number,
            episodes.len()
        ),
    }
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = Config::from_env().context("Failed to read configuration")?;
    if let Some(feed) = &args.feed {
        config.feed_url = feed.clone();
    }
    if let Some(data_dir) = &args.data_dir {
        config.data_dir = data_dir.clone();
    }
    if !args.relays.is_empty() {
        config.relays = args.relays.clone();
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    if !args.quiet {
        println!(
            "\n{}{} {}\n",
            BOOK,
            "storycast".bold().magenta(),
            "- Stories for little listeners".dimmed()
        );
    }

    let reporter: SharedProgressReporter = if args.quiet {
        NoopReporter::shared()
    } else {
        Arc::new(IndicatifReporter::new())
    };

    let settings = Arc::new(
        SettingsStore::open(config.settings_path()).context("Failed to open settings")?,
    );
    let blobs: SharedBlobStore = Arc::new(FsBlobStore::new(config.audio_dir()));
    let fetcher = Arc::new(
        ResilientFetcher::new(ReqwestClient::new(), config.relays.clone())
            .with_reporter(reporter.clone()),
    );
    let library = Library::new(settings.clone());
    let downloads = DownloadManager::new(
        fetcher.clone(),
        blobs.clone(),
        settings.clone(),
        reporter.clone(),
    );

    // A broken download store must not lock the user out of other commands
    if !matches!(args.command, Command::Reconcile)
        && let Err(e) = downloads.reconcile().await
    {
        warn!(error = %e, "startup check of downloaded episodes failed");
    }

    match args.command {
        Command::List {
            search: query,
            offline,
            favorites,
        } => {
            let loaded = load_episodes(&fetcher, &config.feed_url, &settings, &reporter).await;
            let favorite_ids = library.favorites();
            let filter = ListFilter {
                query,
                offline,
                favorites,
            };
            let mut shown = 0;

            for (i, episode) in loaded.episodes.iter().enumerate() {
                let downloaded = downloads.is_downloaded(&episode.id);
                let favorite = favorite_ids.contains(&episode.id);
                if !filter.accepts(episode, downloaded, favorite) {
                    continue;
                }

                println!(
                    "{:>4}  {}  {}{}{}",
                    (i + 1).to_string().cyan(),
                    format_date(episode).dimmed(),
                    truncate_title(&episode.title, 60),
                    if downloaded { "  [offline]".green() } else { "".normal() },
                    if favorite { "  ♥".red() } else { "".normal() },
                );
                shown += 1;
            }

            if shown == 0 && !loaded.episodes.is_empty() {
                println!("{}", "No stories match your filters.".dimmed());
            }
        }

        Command::Download { number } => {
            let loaded = load_episodes(&fetcher, &config.feed_url, &settings, &reporter).await;
            let (_, episode) = episode_at(&loaded.episodes, number)?;

            let outcome = downloads
                .toggle_download(episode)
                .await
                .context("Failed to store episode")?;
            if let DownloadOutcome::Failed { reason } = outcome {
                eprintln!("{FAILURE}{}", reason.red());
                std::process::exit(1);
            }
        }

        Command::Downloads => {
            let list = downloads.downloads();
            if list.is_empty() {
                println!("{}", "No downloads.".dimmed());
            }
            for (_, record) in list {
                println!(
                    "{DOWNLOAD}{}  {} MB  {}",
                    truncate_title(&record.title, 50),
                    format!("{:.2}", record.size_mb).cyan(),
                    record.downloaded_at.format("%Y-%m-%d %H:%M").to_string().dimmed()
                );
            }
        }

        Command::Remove { number } => {
            let loaded = load_episodes(&fetcher, &config.feed_url, &settings, &reporter).await;
            let (_, episode) = episode_at(&loaded.episodes, number)?;

            if !downloads.is_downloaded(&episode.id) {
                println!("{}", "That story is not downloaded.".dimmed());
                return Ok(());
            }
            downloads
                .remove(&episode.id)
                .await
                .context("Failed to remove download")?;
        }

        Command::Play { number } => {
            let loaded = load_episodes(&fetcher, &config.feed_url, &settings, &reporter).await;
            let (index, _) = episode_at(&loaded.episodes, number)?;

            let mut controller =
                PlaybackController::new(HeadlessMedia::new(), blobs.clone(), library.clone());
            controller.replace_episodes(loaded.episodes);
            if let Err(e) = controller.select_episode(index).await {
                eprintln!("{FAILURE}{}", e.to_string().red());
                std::process::exit(1);
            }

            let title = controller
                .current_episode()
                .map(|ep| ep.title.clone())
                .unwrap_or_default();
            let state = match controller.state() {
                PlaybackState::Playing => "Playing".green(),
                _ => "Ready".yellow(),
            };
            match controller.media().source() {
                Some(MediaSource::Local { data, .. }) => println!(
                    "{HEADPHONES}{} {} from offline copy ({} bytes)",
                    state,
                    title.bold(),
                    data.len()
                ),
                Some(MediaSource::Remote { url }) => println!(
                    "{HEADPHONES}{} {} streaming from {}",
                    state,
                    title.bold(),
                    url.cyan()
                ),
                None => {}
            }
        }

        Command::Favorite { number } => {
            let loaded = load_episodes(&fetcher, &config.feed_url, &settings, &reporter).await;
            let (_, episode) = episode_at(&loaded.episodes, number)?;

            let favorite = library
                .toggle_favorite(&episode.id)
                .context("Failed to save favorites")?;
            if favorite {
                println!("{HEART}{} added to favorites", episode.title.bold());
            } else {
                println!("{} removed from favorites", episode.title.bold());
            }
        }

        Command::History => {
            let history = library.history();
            if history.is_empty() {
                println!("{}", "Nothing played yet.".dimmed());
            }
            let cached: Vec<Episode> = settings
                .get(storycast::feed::CACHED_EPISODES_KEY)
                .unwrap_or_default();
            for entry in history {
                let title = cached
                    .iter()
                    .find(|ep| ep.id == entry.id)
                    .map(|ep| ep.title.clone())
                    .unwrap_or(entry.id);
                println!(
                    "{}  {}",
                    entry.played_at.format("%Y-%m-%d %H:%M").to_string().dimmed(),
                    truncate_title(&title, 60)
                );
            }
        }

        Command::Prefs {
            age_group,
            language,
        } => {
            if let Some(age_group) = age_group {
                library
                    .set_age_group(&age_group)
                    .context("Failed to save age group")?;
            }
            if let Some(language) = language {
                library
                    .set_language(&language)
                    .context("Failed to save language")?;
            }
            let prefs = library.preferences();
            println!("Age group: {}", prefs.age_group.cyan());
            println!("Language:  {}", prefs.language.cyan());
        }

        Command::Reconcile => {
            let report = downloads
                .reconcile()
                .await
                .context("Failed to check downloaded episodes")?;
            println!(
                "{SUCCESS}{} downloads; dropped {} stale records and {} unreferenced audio files",
                downloads.downloads().len().to_string().green(),
                report.orphaned_metadata,
                report.orphaned_blobs
            );
        }
    }

    Ok(())
}
