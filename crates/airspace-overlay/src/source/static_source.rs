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

//! In-memory overlay source for bundled or locally loaded data sets.

use std::path::Path;

use async_trait::async_trait;
use log::info;

use super::{GeoJsonDecoder, OverlaySource, SourceError};
use crate::feature::OverlayFeature;
use crate::geometry::BoundingBox;
use crate::layer::LayerMask;

/// Overlay source answering bounding-box queries from a fixed feature list.
#[derive(Debug, Clone)]
pub struct StaticSource {
    name: String,
    features: Vec<(Option<BoundingBox>, OverlayFeature)>,
    categories: LayerMask,
}

impl StaticSource {
    /// Create a source over the given features.
    #[must_use]
    pub fn new(name: impl Into<String>, features: Vec<OverlayFeature>) -> Self {
        let categories = features.iter().map(|f| f.category).collect();
        let features = features
            .into_iter()
            .map(|f| (f.geometry.bounds(), f))
            .collect();
        Self {
            name: name.into(),
            features,
            categories,
        }
    }

    /// Load a GeoJSON file from disk.
    pub fn from_geojson_file<P: AsRef<Path>>(
        name: impl Into<String>,
        path: P,
        decoder: &GeoJsonDecoder,
    ) -> Result<Self, SourceError> {
        let bytes = std::fs::read(path.as_ref())?;
        let features = decoder.decode(&bytes)?;
        info!("Loaded {} overlay features from {}", features.len(), path.as_ref().display());
        Ok(Self::new(name, features))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

#[async_trait]
impl OverlaySource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn categories(&self) -> LayerMask {
        self.categories
    }

    async fn fetch(&self, bounds: &BoundingBox, layers: LayerMask) -> Result<Vec<OverlayFeature>, SourceError> {
        Ok(self
            .features
            .iter()
            .filter(|(feature_bounds, feature)| {
                layers.contains(feature.category)
                    && feature_bounds.is_some_and(|b| b.intersects(bounds))
            })
            .map(|(_, feature)| feature.clone())
            .collect())
    }
}
