use std::str::FromStr;

use clap::{Parser, Subcommand, ValueEnum};

use crate::models::Granularity;

/// How the driver decides which datestamp granularity is in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GranularityPolicy {
    /// Ask the repository (`Identify`) for its declared granularity.
    #[default]
    Auto,
    /// Use the given granularity without consulting the repository.
    Explicit(Granularity),
}

impl FromStr for GranularityPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(GranularityPolicy::Auto),
            Granularity::DAY_TOKEN => Ok(GranularityPolicy::Explicit(Granularity::Day)),
            Granularity::SECONDS_TOKEN => Ok(GranularityPolicy::Explicit(Granularity::Seconds)),
            other => Err(format!(
                "unknown granularity {:?}; expected auto, {} or {}",
                other,
                Granularity::DAY_TOKEN,
                Granularity::SECONDS_TOKEN
            )),
        }
    }
}

/// Immutable input describing one harvest target.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// Base URL of the OAI-PMH endpoint.
    pub url: String,
    /// Optional HTTP basic-auth credentials.
    pub http_user: Option<String>,
    pub http_pass: Option<String>,
    /// Metadata format requested from the repository.
    pub metadata_prefix: String,
    /// Sets to harvest, in order. Empty means no set filter.
    pub sets: Vec<String>,
    /// Caller-supplied lower datestamp bound.
    pub from: Option<String>,
    /// Caller-supplied upper datestamp bound, passed through verbatim.
    pub until: Option<String>,
    pub granularity: GranularityPolicy,
    /// Request long-lived operation from the host. No execution-time cap
    /// exists to lift on this platform, so this only records intent.
    pub long_running: bool,
}

impl HarvestConfig {
    pub const DEFAULT_METADATA_PREFIX: &'static str = "oai_dc";

    pub fn new(url: impl Into<String>) -> Self {
        HarvestConfig {
            url: url.into(),
            http_user: None,
            http_pass: None,
            metadata_prefix: Self::DEFAULT_METADATA_PREFIX.to_string(),
            sets: Vec::new(),
            from: None,
            until: None,
            granularity: GranularityPolicy::Auto,
            long_running: true,
        }
    }

    /// The configured sets as an ordered sequence of filters.
    ///
    /// An empty configuration becomes a single `None` entry, the
    /// "no set filter" sentinel, so the harvest loop always has at least
    /// one pass to drive.
    pub fn normalized_sets(&self) -> Vec<Option<String>> {
        if self.sets.is_empty() {
            vec![None]
        } else {
            self.sets.iter().cloned().map(Some).collect()
        }
    }
}

/// Validates a caller-supplied datestamp against the two shapes OAI-PMH
/// defines. The value itself is never rewritten; repositories receive it
/// verbatim.
pub fn validate_datestamp(s: &str) -> Result<String, String> {
    if chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
        || chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%SZ").is_ok()
    {
        Ok(s.to_string())
    } else {
        Err(format!(
            "{:?} is not an OAI-PMH datestamp (expected {} or {})",
            s,
            Granularity::DAY_TOKEN,
            Granularity::SECONDS_TOKEN
        ))
    }
}

/// CLI configuration parsed from command line arguments and environment
/// variables.
#[derive(Parser, Debug)]
#[command(name = "demeter")]
#[command(author, version, about = "OAI-PMH 2.0 metadata harvester with checkpointed resume")]
#[command(after_help = "Examples:
  demeter harvest https://repo.example.org/oai
  demeter harvest https://repo.example.org/oai --set serials --set theses --from 2016-01-01
  demeter sets https://repo.example.org/oai --format json")]
pub struct Cli {
    /// Print debug-level progress information
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Harvest metadata records from a repository
    #[command(after_help = "Example: demeter harvest https://repo.example.org/oai --from 2016-01-01")]
    Harvest {
        /// Base URL of the OAI-PMH endpoint
        url: String,
        /// Metadata format to request
        #[arg(long, default_value = HarvestConfig::DEFAULT_METADATA_PREFIX)]
        metadata_prefix: String,
        /// Set to harvest; repeat to harvest several sets in order
        #[arg(long = "set")]
        sets: Vec<String>,
        /// Lower datestamp bound (defaults to the last successful harvest)
        #[arg(long, value_parser = validate_datestamp)]
        from: Option<String>,
        /// Upper datestamp bound (defaults to the repository's clock)
        #[arg(long, value_parser = validate_datestamp)]
        until: Option<String>,
        /// Datestamp granularity: auto, YYYY-MM-DD or YYYY-MM-DDThh:mm:ssZ
        #[arg(long, default_value = "auto")]
        granularity: GranularityPolicy,
        /// Directory receiving one XML file per harvested record
        #[arg(long, default_value = "harvest")]
        output_dir: String,
        /// Directory holding last_state.txt and last_harvest.txt
        #[arg(long, default_value = ".")]
        state_dir: String,
        /// HTTP basic-auth user
        #[arg(long, env = "OAI_HTTP_USER")]
        http_user: Option<String>,
        /// HTTP basic-auth password
        #[arg(long, env = "OAI_HTTP_PASS", hide_env_values = true)]
        http_pass: Option<String>,
    },
    /// List the sets a repository exposes
    #[command(after_help = "Example: demeter sets https://repo.example.org/oai")]
    Sets {
        /// Base URL of the OAI-PMH endpoint
        url: String,
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: SetsFormat,
        /// HTTP basic-auth user
        #[arg(long, env = "OAI_HTTP_USER")]
        http_user: Option<String>,
        /// HTTP basic-auth password
        #[arg(long, env = "OAI_HTTP_PASS", hide_env_values = true)]
        http_pass: Option<String>,
    },
}

/// Output formats for the `sets` subcommand
#[derive(Debug, Clone, ValueEnum)]
pub enum SetsFormat {
    /// Aligned plain-text table
    Table,
    /// JSON array
    Json,
}
