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

//! Airspace overlay library for map viewports.
//!
//! This library turns "what restrictions are visible in this part of the
//! map" into a cached, deduplicated and zoom-appropriate list of vector
//! features. It is organised in layers that can be used on their own:
//!
//! - **Tile layer**: quantizes a viewport into a fixed degree-aligned grid
//!   and builds cache keys from (tile, zoom bucket, layer toggles)
//! - **Source layer**: async providers of features for a bounding box
//!   (GeoJSON over HTTP with a disk cache, or in-memory data sets)
//! - **Simplification layer**: Douglas-Peucker with a tolerance derived
//!   from the zoom level
//! - **Store layer**: bounded LRU of tiles in front of all sources, with
//!   partial-failure tolerance and deduplication by feature id
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use airspace_overlay::{
//!     AirspaceOverlayStore, BoundingBox, GeoJsonDecoder, HttpGeoJsonSource, LayerMask,
//!     OverlayCategory, StoreConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let restricted = LayerMask::empty().with(OverlayCategory::RestrictedArea);
//!     let source = HttpGeoJsonSource::new(
//!         "restricted",
//!         "https://example.com/areas?bbox={min_lon},{min_lat},{max_lon},{max_lat}",
//!         restricted,
//!         GeoJsonDecoder::for_category(OverlayCategory::RestrictedArea),
//!     );
//!     let store = AirspaceOverlayStore::new(StoreConfig::default(), vec![Arc::new(source)]);
//!
//!     let viewport = BoundingBox::new(47.2, 8.3, 47.6, 8.8).unwrap();
//!     let set = store.overlays(&viewport, 10.5, restricted).await.unwrap();
//!     for feature in &set.features {
//!         println!("{}", feature.label());
//!     }
//! }
//! ```
//!
//! # Using Individual Layers
//!
//! ```
//! use airspace_overlay::{BoundingBox, TileGrid, zoom_bucket};
//!
//! let grid = TileGrid::new(0.5).unwrap();
//! let viewport = BoundingBox::new(47.2, 8.2, 47.7, 8.8).unwrap();
//! assert_eq!(grid.covering(&viewport).len(), 4);
//! assert_eq!(zoom_bucket(10.7), 10);
//! ```

pub mod feature;
pub mod geometry;
pub mod layer;
pub mod projection;
pub mod simplify;
pub mod source;
pub mod store;
pub mod tile;

pub use feature::{AltitudeLimit, AltitudeReference, AltitudeUnit, OverlayFeature};
pub use geometry::{haversine_km, BoundingBox, GeometryError, OverlayGeometry};
pub use layer::{LayerMask, OverlayCategory};
pub use projection::WebMercator;
pub use simplify::GeometrySimplifier;
pub use source::{GeoJsonDecoder, HttpGeoJsonSource, OverlaySource, ResponseCache, SourceError, StaticSource};
pub use store::{AirspaceOverlayStore, CacheStats, OverlaySet, StoreConfig, StoreError, StoreEvent};
pub use tile::{zoom_bucket, CacheKey, TileGrid, TileKey};
