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

//! GeoJSON `FeatureCollection` decoding into overlay features.
//!
//! Supports `Polygon`, `MultiPolygon`, `LineString` and `MultiLineString`.
//! Multi-part geometries become one feature per part with `#n` id suffixes.
//! Altitude limits follow the openAIP layout (`lowerLimit`/`upperLimit`
//! objects with numeric or textual `unit` and `referenceDatum`).

use std::collections::BTreeMap;

use geo::{Coord, LineString, Polygon};
use log::debug;
use serde::Deserialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::SourceError;
use crate::feature::{AltitudeLimit, AltitudeReference, AltitudeUnit, OverlayFeature};
use crate::geometry::OverlayGeometry;
use crate::layer::OverlayCategory;

type Position = Vec<f64>;

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(default)]
    features: Vec<RawFeature>,
}

#[derive(Debug, Deserialize)]
struct RawFeature {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    geometry: Option<RawGeometry>,
    #[serde(default)]
    properties: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum RawGeometry {
    Polygon { coordinates: Vec<Vec<Position>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Position>>> },
    LineString { coordinates: Vec<Position> },
    MultiLineString { coordinates: Vec<Vec<Position>> },
    #[serde(other)]
    Unsupported,
}

/// Decoder settings for a GeoJSON overlay feed.
#[derive(Debug, Clone)]
pub struct GeoJsonDecoder {
    /// Property holding the category name.
    pub category_property: String,
    /// Category used when the property is absent or unknown.
    pub fixed_category: Option<OverlayCategory>,
    /// Prefix prepended to every feature id, to keep feeds apart.
    pub id_prefix: Option<String>,
}

impl Default for GeoJsonDecoder {
    fn default() -> Self {
        Self {
            category_property: "category".to_string(),
            fixed_category: None,
            id_prefix: None,
        }
    }
}

impl GeoJsonDecoder {
    /// Decoder that tags every feature with one category.
    #[must_use]
    pub fn for_category(category: OverlayCategory) -> Self {
        Self {
            fixed_category: Some(category),
            ..Self::default()
        }
    }

    /// Decode a `FeatureCollection` document.
    pub fn decode(&self, bytes: &[u8]) -> Result<Vec<OverlayFeature>, SourceError> {
        let collection: FeatureCollection =
            serde_json::from_slice(bytes).map_err(|e| SourceError::Decode(e.to_string()))?;

        let mut features = Vec::with_capacity(collection.features.len());
        for raw in collection.features {
            self.decode_feature(raw, &mut features);
        }
        Ok(features)
    }

    fn decode_feature(&self, raw: RawFeature, out: &mut Vec<OverlayFeature>) {
        let Some(geometry) = raw.geometry else {
            debug!("Skipping feature without geometry");
            return;
        };
        let mut properties = raw.properties.unwrap_or_default();

        let Some(category) = self.resolve_category(&properties) else {
            debug!("Skipping feature with unknown category");
            return;
        };

        let parts = match convert_geometry(geometry) {
            Some(parts) if !parts.is_empty() => parts,
            _ => {
                debug!("Skipping feature with unsupported or empty geometry");
                return;
            }
        };

        let base_id = raw
            .id
            .as_ref()
            .and_then(value_to_id)
            .or_else(|| properties.get("id").and_then(value_to_id))
            .unwrap_or_else(|| geometry_hash(&parts));
        let base_id = match &self.id_prefix {
            Some(prefix) => format!("{prefix}:{base_id}"),
            None => base_id,
        };

        let name = properties
            .remove("name")
            .and_then(|v| v.as_str().map(str::to_string));
        let lower_limit = properties.remove("lowerLimit").as_ref().and_then(parse_limit);
        let upper_limit = properties.remove("upperLimit").as_ref().and_then(parse_limit);
        properties.remove(&self.category_property);
        properties.remove("id");
        let properties: BTreeMap<String, Value> = properties.into_iter().collect();

        let multi = parts.len() > 1;
        for (index, geometry) in parts.into_iter().enumerate() {
            let id = if multi {
                format!("{base_id}#{index}")
            } else {
                base_id.clone()
            };
            out.push(OverlayFeature {
                id,
                category,
                name: name.clone(),
                geometry,
                lower_limit,
                upper_limit,
                properties: properties.clone(),
            });
        }
    }

    fn resolve_category(&self, properties: &Map<String, Value>) -> Option<OverlayCategory> {
        properties
            .get(&self.category_property)
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .or(self.fixed_category)
    }
}

fn value_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn to_line(positions: Vec<Position>) -> LineString<f64> {
    positions
        .into_iter()
        .filter(|p| p.len() >= 2)
        .map(|p| Coord { x: p[0], y: p[1] })
        .collect()
}

fn to_polygon(rings: Vec<Vec<Position>>) -> Option<Polygon<f64>> {
    let mut rings = rings.into_iter().map(to_line);
    let exterior = rings.next()?;
    if exterior.0.len() < 3 {
        return None;
    }
    Some(Polygon::new(exterior, rings.collect()))
}

fn convert_geometry(geometry: RawGeometry) -> Option<Vec<OverlayGeometry>> {
    let parts = match geometry {
        RawGeometry::Polygon { coordinates } => to_polygon(coordinates)
            .map(OverlayGeometry::Polygon)
            .into_iter()
            .collect(),
        RawGeometry::MultiPolygon { coordinates } => coordinates
            .into_iter()
            .filter_map(to_polygon)
            .map(OverlayGeometry::Polygon)
            .collect(),
        RawGeometry::LineString { coordinates } => {
            let line = to_line(coordinates);
            if line.0.len() < 2 {
                Vec::new()
            } else {
                vec![OverlayGeometry::Polyline(line)]
            }
        }
        RawGeometry::MultiLineString { coordinates } => coordinates
            .into_iter()
            .map(to_line)
            .filter(|line| line.0.len() >= 2)
            .map(OverlayGeometry::Polyline)
            .collect(),
        RawGeometry::Unsupported => return None,
    };
    Some(parts)
}

/// Stable id derived from coordinates, for feeds without ids.
fn geometry_hash(parts: &[OverlayGeometry]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        let coords: Box<dyn Iterator<Item = &Coord<f64>>> = match part {
            OverlayGeometry::Polygon(polygon) => Box::new(
                polygon
                    .exterior()
                    .0
                    .iter()
                    .chain(polygon.interiors().iter().flat_map(|ring| ring.0.iter())),
            ),
            OverlayGeometry::Polyline(line) => Box::new(line.0.iter()),
        };
        for coord in coords {
            hasher.update(coord.x.to_le_bytes());
            hasher.update(coord.y.to_le_bytes());
        }
    }
    let hash = format!("{:x}", hasher.finalize());
    format!("geom-{}", &hash[..16])
}

fn parse_limit(value: &Value) -> Option<AltitudeLimit> {
    let object = value.as_object()?;
    let amount = object.get("value")?.as_f64()?;

    // openAIP codes: unit 0 = m, 1 = ft, 6 = FL; datum 0 = GND, 1 = MSL, 2 = STD
    let unit = match object.get("unit") {
        Some(Value::Number(n)) => match n.as_u64()? {
            0 => AltitudeUnit::Meters,
            1 => AltitudeUnit::Feet,
            6 => AltitudeUnit::FlightLevel,
            _ => return None,
        },
        Some(Value::String(s)) => match s.to_ascii_lowercase().as_str() {
            "m" | "meters" | "metres" => AltitudeUnit::Meters,
            "ft" | "feet" => AltitudeUnit::Feet,
            "fl" => AltitudeUnit::FlightLevel,
            _ => return None,
        },
        _ => AltitudeUnit::Feet,
    };

    let reference = match object.get("referenceDatum") {
        Some(Value::Number(n)) => match n.as_u64()? {
            0 => AltitudeReference::Agl,
            1 => AltitudeReference::Msl,
            2 => AltitudeReference::Std,
            _ => return None,
        },
        Some(Value::String(s)) => match s.to_ascii_uppercase().as_str() {
            "GND" | "AGL" | "SFC" => AltitudeReference::Agl,
            "MSL" | "AMSL" => AltitudeReference::Msl,
            "STD" => AltitudeReference::Std,
            _ => return None,
        },
        _ if unit == AltitudeUnit::FlightLevel => AltitudeReference::Std,
        _ => AltitudeReference::Msl,
    };

    Some(AltitudeLimit {
        value: amount,
        unit,
        reference,
    })
}
