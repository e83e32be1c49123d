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

//! Geographic primitives shared by the tile, source and store layers.
//!
//! Coordinates follow the `geo` convention of `x = longitude` and
//! `y = latitude`, both in degrees.

use geo::{BoundingRect, CoordsIter, LineString, Polygon};
use thiserror::Error;

/// Mean Earth radius in kilometres (IUGG).
const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Errors produced when constructing geographic values.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeometryError {
    #[error("invalid bounds: {0}")]
    InvalidBounds(String),
}

/// Great-circle distance between two points in kilometres (haversine).
#[must_use]
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// An axis-aligned latitude/longitude box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    /// Create a validated bounding box.
    pub fn new(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Result<Self, GeometryError> {
        let values = [min_lat, min_lon, max_lat, max_lon];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(GeometryError::InvalidBounds("non-finite coordinate".to_string()));
        }
        if !(-90.0..=90.0).contains(&min_lat) || !(-90.0..=90.0).contains(&max_lat) {
            return Err(GeometryError::InvalidBounds(format!(
                "latitude out of range: {min_lat}..{max_lat}"
            )));
        }
        if !(-180.0..=180.0).contains(&min_lon) || !(-180.0..=180.0).contains(&max_lon) {
            return Err(GeometryError::InvalidBounds(format!(
                "longitude out of range: {min_lon}..{max_lon}"
            )));
        }
        if min_lat > max_lat || min_lon > max_lon {
            return Err(GeometryError::InvalidBounds(format!(
                "min exceeds max: ({min_lat}, {min_lon}) > ({max_lat}, {max_lon})"
            )));
        }

        Ok(Self {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        })
    }

    /// Smallest box containing every `(lat, lon)` point, or `None` for no points.
    #[must_use]
    pub fn from_points<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let mut iter = points.into_iter();
        let (lat, lon) = iter.next()?;
        let mut bounds = Self {
            min_lat: lat,
            min_lon: lon,
            max_lat: lat,
            max_lon: lon,
        };
        for (lat, lon) in iter {
            bounds.expand_to_include(lat, lon);
        }
        Some(bounds)
    }

    /// Grow the box so it contains the given point.
    pub fn expand_to_include(&mut self, lat: f64, lon: f64) {
        self.min_lat = self.min_lat.min(lat);
        self.max_lat = self.max_lat.max(lat);
        self.min_lon = self.min_lon.min(lon);
        self.max_lon = self.max_lon.max(lon);
    }

    /// Check if a point lies inside the box (edges inclusive).
    #[must_use]
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lon >= self.min_lon && lon <= self.max_lon
    }

    /// Check if two boxes overlap (touching edges count).
    #[must_use]
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lat <= other.max_lat
            && self.max_lat >= other.min_lat
            && self.min_lon <= other.max_lon
            && self.max_lon >= other.min_lon
    }

    /// Center point as `(lat, lon)`.
    #[must_use]
    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lon + self.max_lon) / 2.0,
        )
    }
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{:.4},{:.4} .. {:.4},{:.4}]",
            self.min_lat, self.min_lon, self.max_lat, self.max_lon
        )
    }
}

/// Vector geometry of an overlay feature.
#[derive(Debug, Clone, PartialEq)]
pub enum OverlayGeometry {
    /// Closed area such as an airspace volume.
    Polygon(Polygon<f64>),
    /// Open line such as a power line or corridor.
    Polyline(LineString<f64>),
}

impl OverlayGeometry {
    /// Bounding box of the geometry, `None` when it has no coordinates.
    #[must_use]
    pub fn bounds(&self) -> Option<BoundingBox> {
        let rect = match self {
            Self::Polygon(polygon) => polygon.bounding_rect()?,
            Self::Polyline(line) => line.bounding_rect()?,
        };
        Some(BoundingBox {
            min_lat: rect.min().y,
            min_lon: rect.min().x,
            max_lat: rect.max().y,
            max_lon: rect.max().x,
        })
    }

    /// Total number of coordinates, including interior rings.
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        match self {
            Self::Polygon(polygon) => polygon.coords_count(),
            Self::Polyline(line) => line.0.len(),
        }
    }
}
