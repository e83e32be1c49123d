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

//! Zoom-dependent geometry simplification (Douglas-Peucker).

use geo::{LineString, Polygon, Simplify};

use crate::feature::OverlayFeature;
use crate::geometry::OverlayGeometry;
use crate::projection::WebMercator;

/// A closed ring needs three distinct vertices plus the closing one.
const MIN_RING_COORDS: usize = 4;

/// Simplifies overlay geometry so vertex count tracks what is visible at a zoom.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometrySimplifier {
    /// Maximum deviation in screen pixels.
    pub pixel_tolerance: f64,
    /// At or above this zoom geometry is returned untouched.
    pub full_detail_zoom: f64,
}

impl Default for GeometrySimplifier {
    fn default() -> Self {
        Self {
            pixel_tolerance: 1.0,
            full_detail_zoom: 14.0,
        }
    }
}

impl GeometrySimplifier {
    /// Douglas-Peucker epsilon in degrees for the given zoom.
    #[must_use]
    pub fn tolerance_for_zoom(&self, zoom: f64) -> f64 {
        if zoom.is_nan() || zoom >= self.full_detail_zoom || self.pixel_tolerance <= 0.0 {
            return 0.0;
        }
        self.pixel_tolerance * WebMercator::degrees_per_pixel(zoom.max(0.0))
    }

    /// Simplify one geometry with an explicit tolerance in degrees.
    #[must_use]
    pub fn simplify(&self, geometry: &OverlayGeometry, tolerance: f64) -> OverlayGeometry {
        if tolerance <= 0.0 {
            return geometry.clone();
        }
        match geometry {
            OverlayGeometry::Polyline(line) => OverlayGeometry::Polyline(line.simplify(&tolerance)),
            OverlayGeometry::Polygon(polygon) => OverlayGeometry::Polygon(simplify_polygon(polygon, tolerance)),
        }
    }

    /// Simplify every feature for display at `zoom`.
    #[must_use]
    pub fn simplify_features(&self, features: Vec<OverlayFeature>, zoom: f64) -> Vec<OverlayFeature> {
        let tolerance = self.tolerance_for_zoom(zoom);
        if tolerance <= 0.0 {
            return features;
        }
        features
            .into_iter()
            .map(|mut feature| {
                feature.geometry = self.simplify(&feature.geometry, tolerance);
                feature
            })
            .collect()
    }
}

fn simplify_polygon(polygon: &Polygon<f64>, tolerance: f64) -> Polygon<f64> {
    let exterior = simplify_ring(polygon.exterior(), tolerance).unwrap_or_else(|| polygon.exterior().clone());
    let interiors: Vec<LineString<f64>> = polygon
        .interiors()
        .iter()
        .filter_map(|ring| simplify_ring(ring, tolerance))
        .collect();
    Polygon::new(exterior, interiors)
}

/// Simplified ring, or `None` if it would degenerate.
fn simplify_ring(ring: &LineString<f64>, tolerance: f64) -> Option<LineString<f64>> {
    let simplified = ring.simplify(&tolerance);
    (simplified.0.len() >= MIN_RING_COORDS).then_some(simplified)
}
