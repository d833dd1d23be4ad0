use once_cell::sync::Lazy;
use std::{env, path::PathBuf, time::Duration};
use thiserror::Error;

use crate::driver::WindowGeometry;
use crate::poll::PollPolicy;
use crate::remote::RemoteProfile;

pub const ASSET_EXTENSION: &str = "glb";

static DEFAULT_DOWNLOAD_DIRS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    env::var_os("HOME")
        .map(PathBuf::from)
        .map(|home| vec![home.join("Downloads"), home.join("Desktop")])
        .unwrap_or_default()
});

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable `{0}`")]
    Missing(&'static str),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub catalog: CatalogConfig,
    pub pipeline: PipelineConfig,
    pub driver: DriverConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            catalog: CatalogConfig::from_env()?,
            pipeline: PipelineConfig::from_env()?,
            driver: DriverConfig::from_env(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub base_url: String,
    pub service_key: String,
    pub table: String,
}

impl CatalogConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = required("SUPABASE_URL")?;
        let service_key = env::var("SUPABASE_SERVICE_ROLE_KEY")
            .or_else(|_| env::var("SUPABASE_KEY"))
            .map_err(|_| ConfigError::Missing("SUPABASE_SERVICE_ROLE_KEY"))?;
        Ok(Self {
            base_url,
            service_key,
            table: env::var("CATALOG_TABLE").unwrap_or_else(|_| "furniture".into()),
        })
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub target_url: String,
    pub listing_url: String,
    /// Cost the generate button must display before it may be clicked.
    pub expected_cost: String,
    pub asset_dir: PathBuf,
    pub download_dirs: Vec<PathBuf>,
    pub min_asset_bytes: u64,
    pub readiness: PollPolicy,
    pub upload_check: PollPolicy,
    pub generation: PollPolicy,
    pub download: PollPolicy,
    pub profile: RemoteProfile,
}

impl PipelineConfig {
    pub fn new(target_url: impl Into<String>, asset_dir: impl Into<PathBuf>) -> Self {
        let target_url = target_url.into();
        Self {
            listing_url: target_url.clone(),
            target_url,
            expected_cost: "25".into(),
            asset_dir: asset_dir.into(),
            download_dirs: DEFAULT_DOWNLOAD_DIRS.clone(),
            min_asset_bytes: 10 * 1024,
            readiness: PollPolicy::checks(30, Duration::from_secs(1)),
            upload_check: PollPolicy::checks(10, Duration::from_secs(1)),
            generation: PollPolicy::new(Duration::from_secs(5), Duration::from_secs(600)),
            download: PollPolicy::new(Duration::from_secs(2), Duration::from_secs(120)),
            profile: RemoteProfile::default(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let target_url = required("GENERATOR_URL")?;
        let asset_dir = env::var("ASSET_DIR").unwrap_or_else(|_| "./models".into());
        let mut config = Self::new(target_url, asset_dir);

        if let Ok(listing) = env::var("GENERATOR_LISTING_URL")
            && !listing.trim().is_empty()
        {
            config.listing_url = listing;
        }
        if let Ok(cost) = env::var("EXPECTED_GENERATION_COST")
            && !cost.trim().is_empty()
        {
            config.expected_cost = cost.trim().to_string();
        }
        if let Ok(dirs) = env::var("DOWNLOAD_DIRS") {
            let dirs: Vec<PathBuf> = env::split_paths(&dirs)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
            if !dirs.is_empty() {
                config.download_dirs = dirs;
            }
        }
        config.min_asset_bytes = env_u64("MIN_ASSET_BYTES", config.min_asset_bytes);
        config.generation = PollPolicy::new(
            Duration::from_secs(env_u64("GENERATION_POLL_SECS", 5).max(1)),
            Duration::from_secs(env_u64("GENERATION_TIMEOUT_SECS", 600)),
        );
        config.download = PollPolicy::new(
            config.download.interval,
            Duration::from_secs(env_u64("DOWNLOAD_TIMEOUT_SECS", 120)),
        );
        Ok(config)
    }
}

#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub browser: String,
    pub script_timeout: Duration,
    pub geometry: WindowGeometry,
}

impl DriverConfig {
    pub fn from_env() -> Self {
        let defaults = WindowGeometry::default();
        Self {
            browser: env::var("BROWSER_APP").unwrap_or_else(|_| "Google Chrome".into()),
            script_timeout: Duration::from_secs(env_u64("SCRIPT_TIMEOUT_SECS", 30).max(1)),
            geometry: WindowGeometry {
                width: env_u64("WINDOW_WIDTH", defaults.width.into()) as u32,
                height: env_u64("WINDOW_HEIGHT", defaults.height.into()) as u32,
                click_x: env_u64("UPLOAD_CLICK_X", defaults.click_x.into()) as u32,
                click_y: env_u64("UPLOAD_CLICK_Y", defaults.click_y.into()) as u32,
            },
        }
    }
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(key))
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_remote_workflow() {
        let config = PipelineConfig::new("https://gen.example/image-to-3d", "/tmp/models");
        assert_eq!(config.listing_url, config.target_url);
        assert_eq!(config.expected_cost, "25");
        assert_eq!(config.readiness.timeout, Duration::from_secs(30));
        assert_eq!(config.upload_check, PollPolicy::checks(10, Duration::from_secs(1)));
        assert_eq!(config.generation.interval, Duration::from_secs(5));
    }

    #[test]
    fn unparsable_numbers_fall_back() {
        assert_eq!(env_u64("STAGER_TEST_UNSET_NUMBER", 42), 42);
    }
}
