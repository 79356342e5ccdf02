use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Source refresh interval in minutes
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
    #[serde(default)]
    pub feed: FeedSettings,
    #[serde(default)]
    pub sensor: SensorSettings,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

fn default_refresh_interval() -> u64 {
    15
}

/// Tuning for the related-article feed under each article page.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct FeedSettings {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_initial_batch")]
    pub initial_batch: usize,
    #[serde(default = "default_replenish_batch")]
    pub replenish_batch: usize,
    #[serde(default = "default_replenish_delay_ms")]
    pub replenish_delay_ms: u64,
    #[serde(default = "default_session_ttl_minutes")]
    pub session_ttl_minutes: u64,
    /// Open feeds kept at once; the least recently used is dropped first
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

fn default_page_size() -> usize {
    5
}

fn default_initial_batch() -> usize {
    20
}

fn default_replenish_batch() -> usize {
    30
}

fn default_replenish_delay_ms() -> u64 {
    1000
}

fn default_session_ttl_minutes() -> u64 {
    30
}

fn default_max_sessions() -> usize {
    500
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            initial_batch: default_initial_batch(),
            replenish_batch: default_replenish_batch(),
            replenish_delay_ms: default_replenish_delay_ms(),
            session_ttl_minutes: default_session_ttl_minutes(),
            max_sessions: default_max_sessions(),
        }
    }
}

impl FeedSettings {
    pub fn replenish_delay(&self) -> Duration {
        Duration::from_millis(self.replenish_delay_ms)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_minutes * 60)
    }
}

/// Parameters of the load-more sentinel.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SensorSettings {
    /// Minimum visible fraction of the sentinel before it counts as intersecting
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Extra pixels below the viewport where the sentinel already counts
    #[serde(default = "default_root_margin_px")]
    pub root_margin_px: u32,
}

fn default_threshold() -> f64 {
    0.1
}

fn default_root_margin_px() -> u32 {
    100
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            root_margin_px: default_root_margin_px(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
    pub category: String,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        if config.feed.page_size == 0 {
            anyhow::bail!("feed.page_size must be at least 1");
        }
        if config.feed.max_sessions == 0 {
            anyhow::bail!("feed.max_sessions must be at least 1");
        }
        let threshold = config.sensor.threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            anyhow::bail!("sensor.threshold must be in (0, 1], got {}", threshold);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_refresh_interval() {
        assert_eq!(default_refresh_interval(), 15);
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
            refresh_interval = 30

            [feed]
            page_size = 8
            replenish_delay_ms = 0

            [sensor]
            threshold = 0.25

            [[sources]]
            name = "DeFi Wire"
            url = "https://defi.example.com/feed.xml"
            category = "DeFi"

            [[sources]]
            name = "Health Desk"
            url = "https://health.example.org/rss"
            category = "Health"
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.refresh_interval, 30);
        assert_eq!(config.feed.page_size, 8);
        assert_eq!(config.feed.initial_batch, 20);
        assert_eq!(config.feed.replenish_delay(), Duration::ZERO);
        assert_eq!(config.sensor.threshold, 0.25);
        assert_eq!(config.sensor.root_margin_px, 100);
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[0].name, "DeFi Wire");
        assert_eq!(config.sources[0].category, "DeFi");
        assert_eq!(config.sources[1].url, "https://health.example.org/rss");
    }

    #[test]
    fn test_feed_defaults_when_section_missing() {
        let config = Config::from_str("").unwrap();

        assert_eq!(config.refresh_interval, 15);
        assert_eq!(config.feed, FeedSettings::default());
        assert_eq!(config.feed.page_size, 5);
        assert_eq!(config.feed.initial_batch, 20);
        assert_eq!(config.feed.replenish_batch, 30);
        assert_eq!(config.feed.replenish_delay(), Duration::from_secs(1));
        assert_eq!(config.feed.session_ttl(), Duration::from_secs(30 * 60));
        assert_eq!(config.sensor, SensorSettings::default());
        assert!(config.sources.is_empty());
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = Config::load("/nonexistent/path/portal.toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let content = "this is not valid toml {{{";

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();

        let result = Config::load(temp_file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_source_missing_category() {
        let content = r#"
            [[sources]]
            name = "Test Source"
            url = "https://example.com/feed.xml"
        "#;

        let result = Config::from_str(content);
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let content = r#"
            [feed]
            page_size = 0
        "#;

        assert!(Config::from_str(content).is_err());
    }

    #[test]
    fn test_zero_max_sessions_rejected() {
        let content = r#"
            [feed]
            max_sessions = 0
        "#;

        assert!(Config::from_str(content).is_err());
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        for threshold in ["0.0", "-0.5", "1.5", "nan"] {
            let content = format!("[sensor]\nthreshold = {}\n", threshold);
            let err = Config::from_str(&content).unwrap_err();
            assert!(
                err.to_string().contains("sensor.threshold"),
                "{} accepted: {}",
                threshold,
                err
            );
        }
    }

    #[test]
    fn test_threshold_of_one_accepted() {
        let config = Config::from_str("[sensor]\nthreshold = 1.0\n").unwrap();
        assert_eq!(config.sensor.threshold, 1.0);
    }
}
