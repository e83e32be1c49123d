// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Application configuration management.
//!
//! This module handles persistent configuration storage using TOML format.
//! It covers overlay source definitions, layer toggles, overlay cache sizing,
//! the spots backend and a home location override.

use std::time::Duration;

use airspace_overlay::{GeometryError, GeometrySimplifier, LayerMask, OverlayCategory, StoreConfig, TileGrid};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const APP_NAME: &str = "dronespots";
const CONFIG_NAME: &str = "config";

/// Current configuration schema version
pub const CONFIG_VERSION: u32 = 1;

/// Configuration for a single GeoJSON overlay feed
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct OverlaySourceConfig {
    /// Unique identifier for this source (stable across renames)
    pub id: String,

    /// User-friendly display name
    pub name: String,

    /// URL with `{min_lat}`, `{min_lon}`, `{max_lat}`, `{max_lon}`, `{layers}` placeholders
    pub url_template: String,

    /// Categories this feed provides
    pub categories: Vec<OverlayCategory>,

    /// GeoJSON property holding the category (single-category feeds may omit it)
    #[serde(default)]
    pub category_property: Option<String>,

    /// Header used to send the API key
    #[serde(default)]
    pub api_key_header: Option<String>,

    /// Environment variable holding the API key (takes precedence)
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// API key stored in the config file
    #[serde(default)]
    pub api_key: Option<String>,

    /// Whether this source is queried
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl OverlaySourceConfig {
    /// Create a new source configuration with a generated UUID
    pub fn new(name: String, url_template: String, categories: Vec<OverlayCategory>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            url_template,
            categories,
            category_property: None,
            api_key_header: None,
            api_key_env: None,
            api_key: None,
            enabled: true,
        }
    }

    /// Categories as a mask
    pub fn layer_mask(&self) -> LayerMask {
        self.categories.iter().copied().collect()
    }

    /// Resolve API key from environment variable or config
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(var) = &self.api_key_env {
            if let Ok(key) = std::env::var(var) {
                if !key.is_empty() {
                    return Some(key);
                }
            }
        }

        self.api_key.clone().filter(|s| !s.is_empty())
    }
}

/// Application configuration stored in TOML format
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    /// Configuration schema version for migrations
    #[serde(default = "default_config_version")]
    pub config_version: u32,

    /// Configured overlay feeds
    #[serde(default)]
    pub overlay_sources: Vec<OverlaySourceConfig>,

    /// Overlay layers shown by default
    #[serde(default = "default_enabled_layers")]
    pub enabled_layers: Vec<OverlayCategory>,

    /// Overlay tile edge in degrees
    #[serde(default = "default_tile_size_deg")]
    pub tile_size_deg: f64,

    /// Number of overlay tiles kept in memory
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Below this zoom no overlays are loaded
    #[serde(default = "default_min_overlay_zoom")]
    pub min_overlay_zoom: f64,

    /// Largest viewport, in tiles, that is loaded in one go
    #[serde(default = "default_max_tiles_per_query")]
    pub max_tiles_per_query: usize,

    /// Default map zoom level
    #[serde(default = "default_zoom")]
    pub default_zoom: f64,

    /// Hours an overlay response stays in the disk cache
    #[serde(default = "default_response_cache_hours")]
    pub response_cache_hours: u64,

    /// Override home latitude (for devices without GPS)
    #[serde(default)]
    pub override_home_latitude: Option<f64>,

    /// Override home longitude (for devices without GPS)
    #[serde(default)]
    pub override_home_longitude: Option<f64>,

    /// Base URL of the spots backend
    #[serde(default)]
    pub spots_backend_url: Option<String>,

    /// Spots backend API key (SPOTS_API_KEY env var takes precedence)
    #[serde(default)]
    pub spots_api_key: Option<String>,

    /// Seconds between background spot syncs
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,

    /// Default search radius for nearby spots
    #[serde(default = "default_nearby_radius_km")]
    pub nearby_radius_km: f64,
}

// Default value functions for serde
fn default_config_version() -> u32 {
    CONFIG_VERSION
}

fn default_true() -> bool {
    true
}

fn default_enabled_layers() -> Vec<OverlayCategory> {
    vec![
        OverlayCategory::ControlledAirspace,
        OverlayCategory::RestrictedArea,
        OverlayCategory::ProhibitedArea,
        OverlayCategory::TemporaryRestriction,
    ]
}

fn default_tile_size_deg() -> f64 {
    0.5
}

fn default_cache_capacity() -> usize {
    256
}

fn default_min_overlay_zoom() -> f64 {
    6.0
}

fn default_max_tiles_per_query() -> usize {
    64
}

fn default_zoom() -> f64 {
    11.0
}

fn default_response_cache_hours() -> u64 {
    24
}

fn default_sync_interval_secs() -> u64 {
    300
}

fn default_nearby_radius_km() -> f64 {
    25.0
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            overlay_sources: Vec::new(),
            enabled_layers: default_enabled_layers(),
            tile_size_deg: default_tile_size_deg(),
            cache_capacity: default_cache_capacity(),
            min_overlay_zoom: default_min_overlay_zoom(),
            max_tiles_per_query: default_max_tiles_per_query(),
            default_zoom: default_zoom(),
            response_cache_hours: default_response_cache_hours(),
            override_home_latitude: None,
            override_home_longitude: None,
            spots_backend_url: None,
            spots_api_key: None,
            sync_interval_secs: default_sync_interval_secs(),
            nearby_radius_km: default_nearby_radius_km(),
        }
    }
}

impl AppConfig {
    /// Load configuration from disk, creating defaults on first run
    pub fn load() -> Result<Self, confy::ConfyError> {
        let mut config: AppConfig = confy::load(APP_NAME, CONFIG_NAME)?;

        if config.config_version < CONFIG_VERSION {
            log::info!(
                "Upgrading configuration from version {} to {}",
                config.config_version,
                CONFIG_VERSION
            );
            config.config_version = CONFIG_VERSION;
            config.save()?;
        }

        Ok(config)
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<(), confy::ConfyError> {
        confy::store(APP_NAME, CONFIG_NAME, self)
    }

    /// Get the config file path for display to user
    pub fn get_config_path() -> Result<std::path::PathBuf, confy::ConfyError> {
        confy::get_configuration_file_path(APP_NAME, CONFIG_NAME)
    }

    /// Default layer toggles as a mask
    pub fn layer_mask(&self) -> LayerMask {
        self.enabled_layers.iter().copied().collect()
    }

    /// Overlay store settings derived from this configuration
    pub fn store_config(&self) -> Result<StoreConfig, GeometryError> {
        Ok(StoreConfig {
            grid: TileGrid::new(self.tile_size_deg)?,
            capacity: self.cache_capacity,
            min_zoom: self.min_overlay_zoom,
            max_tiles_per_query: self.max_tiles_per_query,
            simplifier: GeometrySimplifier::default(),
            ..StoreConfig::default()
        })
    }

    /// How long overlay responses stay on disk
    pub fn response_cache_max_age(&self) -> Duration {
        Duration::from_secs(self.response_cache_hours * 60 * 60)
    }

    /// Interval between background spot syncs
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(10))
    }

    /// Home location override, if both coordinates are set
    pub fn home_location(&self) -> Option<(f64, f64)> {
        self.override_home_latitude.zip(self.override_home_longitude)
    }

    /// Resolve the spots API key from environment variable or config
    pub fn resolve_spots_api_key(&self) -> Option<String> {
        if let Ok(key) = std::env::var("SPOTS_API_KEY") {
            if !key.is_empty() {
                return Some(key);
            }
        }

        self.spots_api_key.clone().filter(|s| !s.is_empty())
    }

    /// Get an overlay source by ID
    pub fn get_source(&self, id: &str) -> Option<&OverlaySourceConfig> {
        self.overlay_sources.iter().find(|s| s.id == id)
    }

    /// Add a new overlay source
    pub fn add_source(&mut self, source: OverlaySourceConfig) {
        self.overlay_sources.push(source);
    }

    /// Remove an overlay source by ID
    pub fn remove_source(&mut self, id: &str) -> bool {
        if let Some(pos) = self.overlay_sources.iter().position(|s| s.id == id) {
            self.overlay_sources.remove(pos);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: AppConfig = serde_json::from_str(r#"{"tile_size_deg": 0.25}"#).unwrap();
        assert_eq!(config.config_version, CONFIG_VERSION);
        assert!((config.tile_size_deg - 0.25).abs() < f64::EPSILON);
        assert_eq!(config.cache_capacity, 256);
        assert!(config.layer_mask().contains(OverlayCategory::RestrictedArea));
        assert!(!config.layer_mask().contains(OverlayCategory::PowerLine));
    }

    #[test]
    fn test_store_config_rejects_bad_grid() {
        let config = AppConfig {
            tile_size_deg: 0.0,
            ..AppConfig::default()
        };
        assert!(config.store_config().is_err());
        assert!(AppConfig::default().store_config().is_ok());
    }

    #[test]
    fn test_add_remove_source() {
        let mut config = AppConfig::default();
        let source = OverlaySourceConfig::new(
            "Reserves".to_string(),
            "https://example.invalid/reserves".to_string(),
            vec![OverlayCategory::NatureReserve],
        );
        let id = source.id.clone();
        config.add_source(source);
        assert!(config.get_source(&id).is_some());
        assert!(config.remove_source(&id));
        assert!(!config.remove_source(&id));
    }

    #[test]
    fn test_api_key_from_config() {
        let mut source = OverlaySourceConfig::new(
            "Airspace".to_string(),
            "https://example.invalid/airspace".to_string(),
            vec![OverlayCategory::ControlledAirspace],
        );
        assert_eq!(source.resolve_api_key(), None);
        source.api_key = Some("secret".to_string());
        source.api_key_env = Some("DRONESPOTS_TEST_UNSET_KEY".to_string());
        assert_eq!(source.resolve_api_key().as_deref(), Some("secret"));
    }

    #[test]
    fn test_home_location_requires_both() {
        let mut config = AppConfig {
            override_home_latitude: Some(47.0),
            ..AppConfig::default()
        };
        assert_eq!(config.home_location(), None);
        config.override_home_longitude = Some(8.0);
        assert_eq!(config.home_location(), Some((47.0, 8.0)));
    }
}
