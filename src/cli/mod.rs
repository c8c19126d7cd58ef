pub mod commands;
pub mod config;

use std::path::PathBuf;
use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::info;

use crate::audit::Checks;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write logs to a file (the platform data directory when no path is given)
    #[arg(long, global = true, num_args = 0..=1, value_name = "PATH")]
    pub log_file: Option<Option<PathBuf>>,

    /// Configuration profile to load instead of the default one
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Analyzer selection shared by `check` and `crawl`
#[derive(Args, Debug, Clone, Copy, Default)]
pub struct CheckFlags {
    /// Report 404 / 500 pages, frames and assets
    #[arg(long)]
    pub check404: bool,

    /// Detect responses serving identical content
    #[arg(long)]
    pub duplicate: bool,

    /// Extract on-page SEO metadata
    #[arg(long)]
    pub seo: bool,

    /// Run every check
    #[arg(long)]
    pub all: bool,
}

impl From<CheckFlags> for Checks {
    fn from(flags: CheckFlags) -> Self {
        Checks {
            check404: flags.check404,
            duplicate: flags.duplicate,
            seo: flags.seo,
            all: flags.all,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run checks over a batch of URLs
    Check {
        /// URLs to audit (scheme defaults to https)
        #[arg(required = true)]
        urls: Vec<String>,

        #[command(flatten)]
        checks: CheckFlags,

        /// Pretty-print the JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Crawl a site breadth-first, optionally checking every page found
    Crawl {
        /// Start URL
        #[arg(required = true)]
        url: String,

        /// Maximum link depth from the start URL
        #[arg(short, long)]
        depth: Option<u32>,

        /// Follow links to other domains too
        #[arg(long)]
        all_domains: bool,

        #[command(flatten)]
        checks: CheckFlags,

        /// Print the crawl as a nested tree
        #[arg(long)]
        tree: bool,

        /// Pretty-print the JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Manage configuration profiles
    Config {
        /// Profile name to show, or create when missing
        #[arg(required = false, value_name = "PROFILE")]
        name: Option<String>,

        /// List all available profiles
        #[arg(short, long)]
        list: bool,
    },
}

/// Parse command line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Process the command
pub async fn process_command(cli: Cli) -> Result<()> {
    let profile = cli.profile;

    match cli.command {
        Commands::Check { urls, checks, pretty } => {
            let mut checks = Checks::from(checks);
            if !checks.any() {
                checks = Checks::everything();
            }
            info!("Checking {} URLs", urls.len());
            commands::check(urls, checks, profile, pretty).await
        },
        Commands::Crawl { url, depth, all_domains, checks, tree, pretty } => {
            info!("Starting crawl on {}", url);
            let options = commands::CrawlOptions {
                depth,
                all_domains,
                checks: checks.into(),
                tree,
                pretty,
            };
            commands::crawl(url, options, profile).await
        },
        Commands::Config { name, list } => {
            if list {
                info!("Listing all configuration profiles");
                commands::list_profiles()
            } else if let Some(profile_name) = name {
                info!("Managing configuration profile: {}", profile_name);
                commands::manage_profile(profile_name)
            } else {
                info!("Showing current configuration");
                commands::show_config()
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert()
    }

    #[test]
    fn test_check_flags_parse() {
        let cli = Cli::try_parse_from(["site-auditor", "-v", "check", "a.com", "b.com", "--seo"]).unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Check { urls, checks, pretty } => {
                assert_eq!(urls, vec!["a.com", "b.com"]);
                assert!(checks.seo && !checks.check404);
                assert!(!pretty);
            }
            _ => panic!("expected check command"),
        }
    }

    #[test]
    fn test_crawl_args_parse() {
        let cli = Cli::try_parse_from([
            "site-auditor", "crawl", "example.com", "--depth", "2", "--all-domains", "--tree", "--profile", "staging",
        ])
        .unwrap();
        assert_eq!(cli.profile.as_deref(), Some("staging"));
        match cli.command {
            Commands::Crawl { url, depth, all_domains, checks, tree, .. } => {
                assert_eq!(url, "example.com");
                assert_eq!(depth, Some(2));
                assert!(all_domains && tree);
                assert!(!Checks::from(checks).any());
            }
            _ => panic!("expected crawl command"),
        }
    }

    #[test]
    fn test_log_file_path_is_optional() {
        let cli = Cli::try_parse_from(["site-auditor", "--log-file", "audit.log", "config"]).unwrap();
        assert_eq!(cli.log_file, Some(Some(PathBuf::from("audit.log"))));

        let cli = Cli::try_parse_from(["site-auditor", "config", "--log-file"]).unwrap();
        assert_eq!(cli.log_file, Some(None));
    }

    #[test]
    fn test_check_requires_url() {
        assert!(Cli::try_parse_from(["site-auditor", "check"]).is_err());
    }
}
