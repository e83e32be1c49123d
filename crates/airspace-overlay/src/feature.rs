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

//! Overlay feature model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::geometry::OverlayGeometry;
use crate::layer::OverlayCategory;

/// Unit of an altitude limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AltitudeUnit {
    Feet,
    Meters,
    FlightLevel,
}

/// Datum an altitude limit is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AltitudeReference {
    /// Mean sea level
    Msl,
    /// Above ground level
    Agl,
    /// Standard pressure (flight levels)
    Std,
}

/// Vertical limit of an airspace volume.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AltitudeLimit {
    pub value: f64,
    pub unit: AltitudeUnit,
    pub reference: AltitudeReference,
}

impl AltitudeLimit {
    /// Limit expressed in feet, ignoring the reference datum.
    #[must_use]
    pub fn to_feet(&self) -> f64 {
        match self.unit {
            AltitudeUnit::Feet => self.value,
            AltitudeUnit::Meters => self.value * 3.280_84,
            AltitudeUnit::FlightLevel => self.value * 100.0,
        }
    }
}

impl std::fmt::Display for AltitudeLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.unit, self.reference) {
            (AltitudeUnit::FlightLevel, _) => write!(f, "FL{:03.0}", self.value),
            (_, AltitudeReference::Agl) if self.value.abs() < f64::EPSILON => f.write_str("GND"),
            (unit, reference) => {
                let unit = if unit == AltitudeUnit::Meters { "m" } else { "ft" };
                let reference = if reference == AltitudeReference::Agl { "AGL" } else { "MSL" };
                write!(f, "{:.0} {unit} {reference}", self.value)
            }
        }
    }
}

/// A single vector overlay: an airspace volume, reserve, line, etc.
///
/// `id` is the identity used to drop duplicates when a feature is
/// returned for several adjacent tiles.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayFeature {
    pub id: String,
    pub category: OverlayCategory,
    pub name: Option<String>,
    pub geometry: OverlayGeometry,
    pub lower_limit: Option<AltitudeLimit>,
    pub upper_limit: Option<AltitudeLimit>,
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl OverlayFeature {
    /// Create a new feature with no name, limits or properties
    #[must_use]
    pub fn new(id: impl Into<String>, category: OverlayCategory, geometry: OverlayGeometry) -> Self {
        Self {
            id: id.into(),
            category,
            name: None,
            geometry,
            lower_limit: None,
            upper_limit: None,
            properties: BTreeMap::new(),
        }
    }

    /// Builder method to add a name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Builder method to add vertical limits
    #[must_use]
    pub fn with_limits(mut self, lower: Option<AltitudeLimit>, upper: Option<AltitudeLimit>) -> Self {
        self.lower_limit = lower;
        self.upper_limit = upper;
        self
    }

    /// Label for lists and tooltips
    #[must_use]
    pub fn label(&self) -> String {
        let name = self.name.as_deref().unwrap_or(&self.id);
        match (&self.lower_limit, &self.upper_limit) {
            (Some(lower), Some(upper)) => format!("{name} ({lower} - {upper})"),
            _ => name.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::line_string;

    fn limit(value: f64, unit: AltitudeUnit, reference: AltitudeReference) -> AltitudeLimit {
        AltitudeLimit { value, unit, reference }
    }

    #[test]
    fn test_altitude_display() {
        assert_eq!(limit(95.0, AltitudeUnit::FlightLevel, AltitudeReference::Std).to_string(), "FL095");
        assert_eq!(limit(0.0, AltitudeUnit::Feet, AltitudeReference::Agl).to_string(), "GND");
        assert_eq!(limit(2500.0, AltitudeUnit::Feet, AltitudeReference::Msl).to_string(), "2500 ft MSL");
    }

    #[test]
    fn test_to_feet() {
        assert!((limit(100.0, AltitudeUnit::Meters, AltitudeReference::Msl).to_feet() - 328.084).abs() < 1e-6);
        assert!((limit(65.0, AltitudeUnit::FlightLevel, AltitudeReference::Std).to_feet() - 6500.0).abs() < 1e-9);
    }

    #[test]
    fn test_label() {
        let geometry = OverlayGeometry::Polyline(line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 1.0)]);
        let feature = OverlayFeature::new("r-1", OverlayCategory::RestrictedArea, geometry)
            .with_name("LSR 23")
            .with_limits(
                Some(limit(0.0, AltitudeUnit::Feet, AltitudeReference::Agl)),
                Some(limit(95.0, AltitudeUnit::FlightLevel, AltitudeReference::Std)),
            );
        assert_eq!(feature.label(), "LSR 23 (GND - FL095)");
    }
}
