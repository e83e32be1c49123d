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

//! Wiring between the configuration and the overlay store.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use airspace_overlay::{
    AirspaceOverlayStore, GeoJsonDecoder, HttpGeoJsonSource, OverlayFeature, OverlaySet, OverlaySource,
    ResponseCache, StaticSource,
};
use log::{info, warn};

use crate::config::{AppConfig, OverlaySourceConfig};

/// Root of the on-disk overlay response cache
pub fn overlay_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("dronespots").join("overlays"))
}

fn decoder_for(source: &OverlaySourceConfig) -> GeoJsonDecoder {
    match (source.categories.as_slice(), &source.category_property) {
        ([single], None) => GeoJsonDecoder::for_category(*single),
        (_, property) => GeoJsonDecoder {
            category_property: property.clone().unwrap_or_else(|| GeoJsonDecoder::default().category_property),
            ..GeoJsonDecoder::default()
        },
    }
}

/// Build an HTTP source from its configuration.
///
/// A response cache is attached under `cache_root/<source id>` when given.
/// Cache setup failures are logged and the source runs uncached.
pub fn http_source(source: &OverlaySourceConfig, cache_root: Option<&Path>, max_age: Duration) -> HttpGeoJsonSource {
    let mut http = HttpGeoJsonSource::new(
        source.name.clone(),
        source.url_template.clone(),
        source.layer_mask(),
        decoder_for(source),
    );

    if let Some(key) = source.resolve_api_key() {
        let header = source.api_key_header.clone().unwrap_or_else(|| "x-api-key".to_string());
        http = http.with_api_key(header, key);
    }

    if let Some(root) = cache_root {
        match ResponseCache::new(root.join(&source.id), max_age) {
            Ok(cache) => {
                cache.prune();
                http = http.with_cache(cache);
            }
            Err(e) => warn!("Overlay cache disabled for {}: {}", source.name, e),
        }
    }

    http
}

/// Build the overlay store from configuration, plus an optional local GeoJSON file.
pub fn build_store(
    config: &AppConfig,
    geojson: Option<&Path>,
    cache_root: Option<&Path>,
) -> Result<AirspaceOverlayStore, Box<dyn std::error::Error>> {
    let mut sources: Vec<Arc<dyn OverlaySource>> = Vec::new();

    for source in config.overlay_sources.iter().filter(|s| s.enabled) {
        if source.categories.is_empty() {
            warn!("Overlay source {} has no categories, skipping", source.name);
            continue;
        }
        sources.push(Arc::new(http_source(source, cache_root, config.response_cache_max_age())));
    }

    if let Some(path) = geojson {
        let name = path
            .file_name()
            .map_or_else(|| "local".to_string(), |n| n.to_string_lossy().into_owned());
        let local = StaticSource::from_geojson_file(name, path, &GeoJsonDecoder::default())?;
        if local.is_empty() {
            warn!("No usable overlay features in {}", path.display());
        }
        sources.push(Arc::new(local));
    }

    if sources.is_empty() {
        info!("No overlay sources configured");
    }

    Ok(AirspaceOverlayStore::new(config.store_config()?, sources))
}

/// One-line description of a feature for terminal output
pub fn describe_feature(feature: &OverlayFeature) -> String {
    format!(
        "{:<22} {:<40} {:>5} pts  {}",
        feature.category.display_name(),
        feature.label(),
        feature.geometry.vertex_count(),
        feature.id
    )
}

/// Summary line for a query result
pub fn describe_set(set: &OverlaySet) -> String {
    let mut summary = format!(
        "{} features from {} tiles ({} cached, {} fetched)",
        set.features.len(),
        set.tiles_total,
        set.tiles_from_cache,
        set.tiles_fetched
    );
    if !set.is_complete() {
        summary.push_str(&format!(", {} source failures", set.failed_sources));
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use airspace_overlay::{BoundingBox, LayerMask, OverlayCategory};
    use std::io::Write;

    const RESERVE: &str = r#"{
        "type": "FeatureCollection",
        "features": [{
            "type": "Feature",
            "id": "reserve-1",
            "properties": {"name": "Wetlands", "category": "nature_reserve"},
            "geometry": {"type": "Polygon", "coordinates": [[[8.1, 47.1], [8.3, 47.1], [8.3, 47.3], [8.1, 47.3], [8.1, 47.1]]]}
        }]
    }"#;

    #[test]
    fn test_single_category_source_uses_fixed_decoder() {
        let source = OverlaySourceConfig::new(
            "TFRs".to_string(),
            "https://example.invalid/tfr".to_string(),
            vec![OverlayCategory::TemporaryRestriction],
        );
        let decoder = decoder_for(&source);
        assert_eq!(decoder.fixed_category, Some(OverlayCategory::TemporaryRestriction));

        let http = http_source(&source, None, Duration::from_secs(60));
        assert_eq!(http.name(), "TFRs");
        assert_eq!(
            http.categories(),
            LayerMask::empty().with(OverlayCategory::TemporaryRestriction)
        );
    }

    #[test]
    fn test_multi_category_source_reads_property() {
        let mut source = OverlaySourceConfig::new(
            "openAIP".to_string(),
            "https://example.invalid/airspaces".to_string(),
            vec![OverlayCategory::ControlledAirspace, OverlayCategory::DangerArea],
        );
        source.category_property = Some("type".to_string());
        let decoder = decoder_for(&source);
        assert_eq!(decoder.fixed_category, None);
        assert_eq!(decoder.category_property, "type");
    }

    #[test]
    fn test_http_source_gets_cache_dir() {
        let dir = tempfile::tempdir().unwrap();
        let source = OverlaySourceConfig::new(
            "Reserves".to_string(),
            "https://example.invalid/reserves".to_string(),
            vec![OverlayCategory::NatureReserve],
        );
        let _ = http_source(&source, Some(dir.path()), Duration::from_secs(60));
        assert!(dir.path().join(&source.id).is_dir());
    }

    #[tokio::test]
    async fn test_build_store_with_local_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(RESERVE.as_bytes()).unwrap();
        file.flush().unwrap();

        let mut config = AppConfig::default();
        let mut disabled = OverlaySourceConfig::new(
            "Disabled".to_string(),
            "https://example.invalid/x".to_string(),
            vec![OverlayCategory::Airport],
        );
        disabled.enabled = false;
        config.add_source(disabled);

        let store = build_store(&config, Some(file.path()), None).unwrap();
        assert_eq!(
            store.available_layers(),
            LayerMask::empty().with(OverlayCategory::NatureReserve)
        );

        let viewport = BoundingBox::new(47.0, 8.0, 47.4, 8.4).unwrap();
        let layers = LayerMask::empty().with(OverlayCategory::NatureReserve);
        let set = store.overlays(&viewport, 12.0, layers).await.unwrap();
        assert_eq!(set.features.len(), 1);
        assert!(describe_set(&set).starts_with("1 features"));
        assert!(describe_feature(&set.features[0]).contains("Wetlands"));
    }

    #[test]
    fn test_build_store_missing_file_is_error() {
        let config = AppConfig::default();
        let result = build_store(&config, Some(Path::new("/nonexistent/overlays.geojson")), None);
        assert!(result.is_err());
    }
}
