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

//! Overlay source layer.
//!
//! A source produces features of one or more categories for a bounding box.
//! The store queries every enabled source per tile, so implementations only
//! need to answer "what is inside this box".

mod geojson;
mod http;
mod static_source;

pub use geojson::GeoJsonDecoder;
pub use http::{HttpGeoJsonSource, ResponseCache, DEFAULT_CACHE_MAX_AGE};
pub use static_source::StaticSource;

use async_trait::async_trait;
use thiserror::Error;

use crate::feature::OverlayFeature;
use crate::geometry::BoundingBox;
use crate::layer::LayerMask;

/// Errors that can occur while fetching overlay features.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported request: {0}")]
    Unsupported(String),
}

/// Trait for overlay feature providers.
///
/// Implement this trait to plug a new remote or local data set into the
/// [`AirspaceOverlayStore`](crate::AirspaceOverlayStore).
#[async_trait]
pub trait OverlaySource: Send + Sync {
    /// Short name used in logs and events.
    fn name(&self) -> &str;

    /// Categories this source can produce.
    fn categories(&self) -> LayerMask;

    /// Fetch features intersecting `bounds` for the enabled `layers`.
    ///
    /// `layers` is already narrowed to [`categories`](Self::categories).
    async fn fetch(&self, bounds: &BoundingBox, layers: LayerMask) -> Result<Vec<OverlayFeature>, SourceError>;
}
