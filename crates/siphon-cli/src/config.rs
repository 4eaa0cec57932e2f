use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use siphon_client::DEFAULT_API_BASE;
use siphon_core::{Dimension, SearchType, SyncOptions};
use std::path::PathBuf;

/// CLI configuration parsed from command line arguments and environment variables
#[derive(Parser, Debug)]
#[command(name = "siphon")]
#[command(
    author,
    version,
    about = "Sync search analytics into a local SQLite store"
)]
#[command(after_help = "Examples:
  siphon properties
  siphon sync sc-domain:example.com --start 2024-01-01
  siphon sync-all --dimensions query,country
  siphon prune --preview

Credentials:
  SIPHON_ACCESS_TOKEN must hold an OAuth bearer token with read access
  to the reporting API. It is only needed by commands that call the API.")]
pub struct Config {
    /// SQLite database URL
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://siphon.db")]
    pub database_url: String,

    /// Bearer token for the reporting API
    #[arg(long, env = "SIPHON_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Base URL of the reporting API
    #[arg(long, env = "SIPHON_API_BASE", default_value = DEFAULT_API_BASE)]
    pub api_base: String,

    /// Custom path to siphon.toml (defaults to ~/.config/siphon/siphon.toml)
    #[arg(short, long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sync one property into the local store
    #[command(after_help = "Examples:
  siphon sync sc-domain:example.com                        # Resume from the last stored day
  siphon sync https://example.com/ --start 2024-01-01      # Explicit start, ignores stored data
  siphon sync sc-domain:example.com --search-type image    # Image search rows only")]
    Sync {
        /// Property to sync (URL-prefix or sc-domain: property)
        #[arg(value_name = "PROPERTY")]
        property: String,

        #[command(flatten)]
        options: SyncArgs,
    },
    /// Discover every accessible property and sync all of them in one job
    SyncAll {
        #[command(flatten)]
        options: SyncArgs,
    },
    /// Delete low-value historical rows according to the retention policy
    #[command(after_help = "Examples:
  siphon prune --preview                     # Counts only, for every stored property
  siphon prune sc-domain:example.com         # Prune one property")]
    Prune {
        /// Property to prune (defaults to every stored property)
        #[arg(value_name = "PROPERTY")]
        property: Option<String>,

        /// Only report what would be deleted
        #[arg(long)]
        preview: bool,
    },
    /// List properties the credentials can read
    Properties,
}

/// Bounds and filters shared by `sync` and `sync-all`.
#[derive(Args, Debug, Clone, Default)]
pub struct SyncArgs {
    /// First day to fetch (YYYY-MM-DD); resumes from stored data when omitted
    #[arg(long, value_name = "DATE")]
    pub start: Option<NaiveDate>,

    /// Last day to fetch (YYYY-MM-DD); defaults to a few days before today
    #[arg(long, value_name = "DATE")]
    pub end: Option<NaiveDate>,

    /// Comma-separated dimensions (date is always included)
    #[arg(long, value_name = "LIST", value_delimiter = ',')]
    pub dimensions: Vec<Dimension>,

    /// Search type: web, image, video, news, discover or googleNews
    #[arg(long, value_name = "TYPE")]
    pub search_type: Option<SearchType>,
}

impl SyncArgs {
    pub fn into_options(self) -> SyncOptions {
        SyncOptions {
            start_date: self.start,
            end_date: self.end,
            dimensions: (!self.dimensions.is_empty()).then_some(self.dimensions),
            search_type: self.search_type,
        }
    }
}
