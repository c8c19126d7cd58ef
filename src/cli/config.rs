use anyhow::{Result, Context};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::fs;
use tracing::{info, debug, error};

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AuditConfig {
    pub browser: BrowserSettings,
    pub reachability: ReachabilitySettings,
    pub duplicate: DuplicateSettings,
    pub seo: SeoSettings,
    pub crawler: CrawlerSettings,
}

/// Browser launch settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct BrowserSettings {
    pub headless: bool,
    /// Pass `--no-sandbox`; needed when running as root inside containers
    pub no_sandbox: bool,
    /// Chrome/Chromium binary; autodetected when unset
    pub executable: Option<PathBuf>,
    pub user_agent: Option<String>,
    pub viewport: Viewport,
    /// Timeout for a single DevTools command
    pub request_timeout_ms: u64,
}

/// Browser viewport settings
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Broken-link checker settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ReachabilitySettings {
    pub navigation_timeout_ms: u64,
    /// Time to keep listening after the DOM is ready
    pub settle_ms: u64,
    /// Report label used when a target carries no category
    pub default_category: String,
}

/// Duplicate content detector settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DuplicateSettings {
    pub navigation_timeout_ms: u64,
    pub settle_ms: u64,
    /// Wait after scrolling to the bottom of the page
    pub scroll_settle_ms: u64,
    pub frame_timeout_ms: u64,
    pub frame_settle_ms: u64,
    /// Maximum number of iframe sources loaded per target
    pub max_frames: usize,
    /// Bodies larger than this are not fingerprinted
    pub max_body_bytes: usize,
}

/// SEO analyzer settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SeoSettings {
    pub navigation_timeout_ms: u64,
    /// Timeout for the plain HTTP probes (root URL, robots.txt, sitemap.xml)
    pub probe_timeout_ms: u64,
}

/// Crawler-specific settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct CrawlerSettings {
    pub max_depth: u32,
    pub same_domain_only: bool,
    pub navigation_timeout_ms: u64,
    /// Maximum pages visited per depth; depths not listed are unlimited
    pub depth_quotas: BTreeMap<u32, usize>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            no_sandbox: false,
            executable: None,
            user_agent: Some("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()),
            viewport: Viewport {
                width: 1920,
                height: 1080,
            },
            request_timeout_ms: 30_000,
        }
    }
}

impl Default for ReachabilitySettings {
    fn default() -> Self {
        Self {
            navigation_timeout_ms: 15_000,
            settle_ms: 1_200,
            default_category: "Manual Input links".to_string(),
        }
    }
}

impl Default for DuplicateSettings {
    fn default() -> Self {
        Self {
            navigation_timeout_ms: 45_000,
            settle_ms: 1_500,
            scroll_settle_ms: 1_000,
            frame_timeout_ms: 30_000,
            frame_settle_ms: 800,
            max_frames: 6,
            max_body_bytes: 5 * 1024 * 1024,
        }
    }
}

impl Default for SeoSettings {
    fn default() -> Self {
        Self {
            navigation_timeout_ms: 20_000,
            probe_timeout_ms: 10_000,
        }
    }
}

impl Default for CrawlerSettings {
    fn default() -> Self {
        Self {
            max_depth: 1,
            same_domain_only: true,
            navigation_timeout_ms: 20_000,
            depth_quotas: BTreeMap::from([(0, 1), (1, 20), (2, 50)]),
        }
    }
}

impl AuditConfig {
    /// Get the path to the config directory
    fn config_dir() -> PathBuf {
        let mut path = if let Some(proj_dirs) = directories::ProjectDirs::from("com", "site-auditor", "site-auditor") {
            proj_dirs.config_dir().to_path_buf()
        } else {
            PathBuf::from("./config")
        };

        // Create the sites directory if it doesn't exist
        path.push("sites");
        if !path.exists() {
            if let Err(e) = fs::create_dir_all(&path) {
                error!("Failed to create config directory: {}", e);
            }
        }

        path.pop();
        path
    }

    /// Load the default configuration, writing it out on first use
    pub fn load_default() -> Result<Self> {
        let config_path = Self::config_dir().join("default.yaml");

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            info!("Default configuration not found. Creating...");
            let config = Self::default();
            config.save_as_default()?;
            Ok(config)
        }
    }

    /// Load a configuration profile
    pub fn load_profile(profile: &str) -> Result<Self> {
        let profile_path = Self::config_dir().join("sites").join(format!("{}.yaml", profile));

        if profile_path.exists() {
            Self::load_from_file(&profile_path)
        } else {
            anyhow::bail!("Profile '{}' not found", profile)
        }
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());
        let contents = fs::read_to_string(path)
            .context(format!("Failed to read configuration file: {}", path.display()))?;

        Self::from_yaml(&contents)
            .context(format!("Failed to parse configuration file: {}", path.display()))
    }

    /// Parse a YAML document; missing sections and fields take their defaults
    pub fn from_yaml(contents: &str) -> Result<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Save the configuration as the default
    pub fn save_as_default(&self) -> Result<()> {
        let config_path = Self::config_dir().join("default.yaml");
        self.save_to_file(&config_path)
    }

    /// Save the configuration as a profile
    pub fn save_as_profile(&self, profile: &str) -> Result<()> {
        let profile_path = Self::config_dir().join("sites").join(format!("{}.yaml", profile));
        self.save_to_file(&profile_path)
    }

    /// Save the configuration to a file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        debug!("Saving configuration to: {}", path.display());

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .context(format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let contents = serde_yaml::to_string(self)
            .context("Failed to serialize configuration")?;

        fs::write(path, contents)
            .context(format!("Failed to write configuration file: {}", path.display()))?;

        Ok(())
    }

    /// List all available profiles
    pub fn list_profiles() -> Result<Vec<String>> {
        let sites_dir = Self::config_dir().join("sites");

        if !sites_dir.exists() {
            return Ok(vec![]);
        }

        let mut profiles = Vec::new();

        for entry in fs::read_dir(sites_dir)? {
            let path = entry?.path();

            if path.is_file() && path.extension().map_or(false, |ext| ext == "yaml") {
                if let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) {
                    profiles.push(name.to_string());
                }
            }
        }

        profiles.sort();
        Ok(profiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AuditConfig::default();
        assert!(config.browser.headless);
        assert_eq!(config.reachability.navigation_timeout_ms, 15_000);
        assert_eq!(config.reachability.default_category, "Manual Input links");
        assert_eq!(config.duplicate.max_frames, 6);
        assert_eq!(config.duplicate.max_body_bytes, 5 * 1024 * 1024);
        assert_eq!(config.crawler.depth_quotas.get(&1), Some(&20));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config = AuditConfig::from_yaml("crawler:\n  max_depth: 2\nbrowser:\n  no_sandbox: true\n").unwrap();
        assert_eq!(config.crawler.max_depth, 2);
        assert!(config.crawler.same_domain_only);
        assert_eq!(config.crawler.depth_quotas.get(&2), Some(&50));
        assert!(config.browser.no_sandbox);
        assert!(config.browser.headless);
        assert_eq!(config.seo, SeoSettings::default());
    }

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(AuditConfig::from_yaml("").unwrap(), AuditConfig::default());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let path = std::env::temp_dir()
            .join(format!("site-auditor-test-{}", uuid::Uuid::new_v4()))
            .join("profile.yaml");

        let mut config = AuditConfig::default();
        config.crawler.depth_quotas.insert(3, 5);
        config.save_to_file(&path).unwrap();

        let loaded = AuditConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
