use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::audit::{Auditor, CheckResults, Checks};
use crate::cli::config::AuditConfig;
use crate::crawler::build_crawl_tree;

/// Options of the `crawl` command
#[derive(Debug, Clone, Copy)]
pub struct CrawlOptions {
    pub depth: Option<u32>,
    pub all_domains: bool,
    pub checks: Checks,
    pub tree: bool,
    pub pretty: bool,
}

fn load_config(profile: Option<&str>) -> Result<AuditConfig> {
    match profile {
        Some(profile) => AuditConfig::load_profile(profile)
            .context(format!("Failed to load profile: {}", profile)),
        None => AuditConfig::load_default().context("Failed to load default configuration"),
    }
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let output = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .context("Failed to serialize report")?;

    println!("{}", output);
    Ok(())
}

/// Check response payload: the requested checks plus the duplicate summary
fn check_response(results: &CheckResults) -> Result<serde_json::Value> {
    let mut result = serde_json::to_value(results).context("Failed to serialize check results")?;
    if let (Some(summary), Some(object)) = (results.duplicate_summary(), result.as_object_mut()) {
        object.insert("duplicateSummary".to_string(), serde_json::to_value(summary)?);
    }
    Ok(json!({ "error": false, "result": result }))
}

/// Run the selected checks over a batch of URLs
pub async fn check(urls: Vec<String>, checks: Checks, profile: Option<String>, pretty: bool) -> Result<()> {
    let config = load_config(profile.as_deref())?;
    let auditor = Auditor::new(config);

    let results = auditor
        .run_checks(&urls, checks)
        .await
        .context("Audit failed")?;

    print_json(&check_response(&results)?, pretty)
}

/// Crawl from `url`, running the selected checks over every page found
pub async fn crawl(url: String, options: CrawlOptions, profile: Option<String>) -> Result<()> {
    let mut config = load_config(profile.as_deref())?;

    // Override configuration with command line parameters if provided
    if let Some(depth) = options.depth {
        config.crawler.max_depth = depth;
    }
    if options.all_domains {
        config.crawler.same_domain_only = false;
    }

    let max_depth = config.crawler.max_depth;
    let same_domain_only = config.crawler.same_domain_only;
    let auditor = Auditor::new(config);

    let report = auditor
        .crawl_and_check(&url, max_depth, same_domain_only, options.checks)
        .await
        .context(format!("Crawl of {} failed", url))?;

    info!("Crawl finished: {} pages visited", report.total_visited);

    if options.tree {
        if options.checks.any() {
            warn!("Check results are not included in tree output");
        }
        let tree = build_crawl_tree(&report.nodes());
        return print_json(&tree, options.pretty);
    }

    print_json(&report, options.pretty)
}

/// List all available configuration profiles
pub fn list_profiles() -> Result<()> {
    let profiles = AuditConfig::list_profiles()?;

    println!("Available configuration profiles:");
    for profile in profiles {
        println!("  - {}", profile);
    }

    Ok(())
}

/// Show a profile, creating it with default values when it does not exist
pub fn manage_profile(profile_name: String) -> Result<()> {
    match AuditConfig::load_profile(&profile_name) {
        Ok(config) => {
            println!("Profile: {}", profile_name);
            println!("{}", serde_yaml::to_string(&config)?);
        },
        Err(_) => {
            warn!("Profile '{}' does not exist. Creating a default profile.", profile_name);
            let config = AuditConfig::default();
            config.save_as_profile(&profile_name)?;
            println!("Created default profile: {}", profile_name);
        }
    }

    Ok(())
}

/// Show the current configuration
pub fn show_config() -> Result<()> {
    let config = AuditConfig::load_default()?;
    println!("Current configuration:");
    println!("{}", serde_yaml::to_string(&config)?);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::CheckOutcome;
    use crate::error::CheckFailure;

    #[test]
    fn test_check_response_shape() {
        let results = CheckResults {
            check404: Some(CheckOutcome::Failed(CheckFailure::new("404", "chrome not found"))),
            ..Default::default()
        };

        let response = check_response(&results).unwrap();
        assert_eq!(response["error"], false);
        assert_eq!(response["result"]["check404"]["error"], true);
        assert!(response["result"].get("duplicate").is_none());
        assert!(response["result"].get("duplicateSummary").is_none());
    }
}
