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

//! Web Mercator projection utilities.

use std::f64::consts::PI;

/// Rendered map tile edge in pixels.
pub const TILE_SIZE_PX: f64 = 256.0;

/// Web Mercator projection at fractional zoom levels.
#[derive(Debug, Clone, Copy)]
pub struct WebMercator;

impl WebMercator {
    /// Convert longitude to a tile-space X coordinate at the given zoom.
    #[must_use]
    pub fn lon_to_x(lon: f64, zoom: f64) -> f64 {
        ((lon + 180.0) / 360.0) * 2_f64.powf(zoom)
    }

    /// Convert latitude to a tile-space Y coordinate at the given zoom.
    #[must_use]
    pub fn lat_to_y(lat: f64, zoom: f64) -> f64 {
        let lat_rad = lat.to_radians();
        let y = (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0;
        y * 2_f64.powf(zoom)
    }

    /// Convert a tile-space X coordinate back to longitude.
    #[must_use]
    pub fn tile_to_lon(x: f64, zoom: f64) -> f64 {
        x / 2_f64.powf(zoom) * 360.0 - 180.0
    }

    /// Convert a tile-space Y coordinate back to latitude.
    #[must_use]
    pub fn tile_to_lat(y: f64, zoom: f64) -> f64 {
        let n = 2_f64.powf(zoom);
        (PI * (1.0 - 2.0 * y / n)).sinh().atan().to_degrees()
    }

    /// Longitude degrees covered by one screen pixel at the given zoom.
    #[must_use]
    pub fn degrees_per_pixel(zoom: f64) -> f64 {
        360.0 / (TILE_SIZE_PX * 2_f64.powf(zoom))
    }
}
