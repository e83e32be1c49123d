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

//! Spot data model and CSV import.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::RepositoryError;

/// Kind of flying a spot is good for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpotCategory {
    Freestyle,
    Cinematic,
    Racing,
    Scenic,
    Urban,
    #[default]
    #[serde(other)]
    Other,
}

impl SpotCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            SpotCategory::Freestyle => "freestyle",
            SpotCategory::Cinematic => "cinematic",
            SpotCategory::Racing => "racing",
            SpotCategory::Scenic => "scenic",
            SpotCategory::Urban => "urban",
            SpotCategory::Other => "other",
        }
    }
}

impl std::fmt::Display for SpotCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpotCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "freestyle" => Ok(SpotCategory::Freestyle),
            "cinematic" => Ok(SpotCategory::Cinematic),
            "racing" => Ok(SpotCategory::Racing),
            "scenic" => Ok(SpotCategory::Scenic),
            "urban" => Ok(SpotCategory::Urban),
            "other" | "" => Ok(SpotCategory::Other),
            other => Err(format!("unknown spot category: {other}")),
        }
    }
}

/// A flying spot as stored by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spot {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: SpotCategory,
    pub latitude: f64,
    pub longitude: f64,
    /// Average rating, 0 to 5
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub rating_count: u32,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    /// Reverse-geocoded place name
    #[serde(default)]
    pub location_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Tombstone marker for deletions
    #[serde(default)]
    pub deleted: bool,
}

impl Spot {
    /// Create a new spot with a generated id, timestamped now
    pub fn new(name: impl Into<String>, latitude: f64, longitude: f64, category: SpotCategory) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: None,
            category,
            latitude,
            longitude,
            rating: None,
            rating_count: 0,
            author: None,
            image_url: None,
            location_name: None,
            created_at: now,
            updated_at: now,
            deleted: false,
        }
    }

    /// Builder method to set the description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Check the coordinates are on the globe
    pub fn has_valid_position(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// One row of a spots CSV file
#[derive(Debug, Deserialize)]
struct CsvSpotRow {
    #[serde(default)]
    id: Option<String>,
    name: String,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    rating: Option<f64>,
}

impl CsvSpotRow {
    fn into_spot(self) -> Result<Spot, String> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err("empty name".to_string());
        }

        let category = match self.category.as_deref() {
            Some(value) => value.parse()?,
            None => SpotCategory::Other,
        };

        let mut spot = Spot::new(name, self.latitude, self.longitude, category);
        if !spot.has_valid_position() {
            return Err(format!("position out of range: {}, {}", self.latitude, self.longitude));
        }

        if let Some(id) = self.id.filter(|id| !id.trim().is_empty()) {
            spot.id = id.trim().to_string();
        }
        spot.description = self.description.filter(|d| !d.trim().is_empty());
        if let Some(rating) = self.rating {
            if !(0.0..=5.0).contains(&rating) {
                return Err(format!("rating out of range: {rating}"));
            }
            spot.rating = Some(rating);
        }

        Ok(spot)
    }
}

/// Load spots from a CSV file with a header row.
///
/// Columns are `name, latitude, longitude, category, description, rating`
/// plus an optional `id`. Rows that fail to parse are skipped.
pub fn load_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Spot>, RepositoryError> {
    let file = File::open(path.as_ref())?;
    let reader = BufReader::new(file);
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    csv_reader.headers()?;

    let mut spots = Vec::new();
    let mut skipped = 0;
    for (index, result) in csv_reader.deserialize::<CsvSpotRow>().enumerate() {
        // Header is line 1
        let line = index + 2;
        match result.map_err(|e| e.to_string()).and_then(CsvSpotRow::into_spot) {
            Ok(spot) => spots.push(spot),
            Err(e) => {
                warn!("Skipping spot on line {}: {}", line, e);
                skipped += 1;
            }
        }
    }

    info!(
        "Loaded {} spots from {} ({} skipped)",
        spots.len(),
        path.as_ref().display(),
        skipped
    );
    Ok(spots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_spot_json_is_camel_case() {
        let spot = Spot::new("Quarry", 47.1, 8.2, SpotCategory::Freestyle);
        let json = serde_json::to_value(&spot).unwrap();
        assert!(json.get("updatedAt").is_some());
        assert!(json.get("ratingCount").is_some());
        assert_eq!(json["category"], "freestyle");
    }

    #[test]
    fn test_unknown_category_deserializes_as_other() {
        let json = r#"{
            "id": "a", "name": "Beach", "category": "underwater",
            "latitude": 1.0, "longitude": 2.0,
            "createdAt": "2024-05-01T10:00:00Z", "updatedAt": "2024-05-01T10:00:00Z"
        }"#;
        let spot: Spot = serde_json::from_str(json).unwrap();
        assert_eq!(spot.category, SpotCategory::Other);
        assert!(!spot.deleted);
    }

    #[test]
    fn test_load_csv_skips_invalid_rows() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "id,name,latitude,longitude,category,description,rating").unwrap();
        writeln!(file, "s1,Old Mill,47.37,8.54,cinematic,River bend,4.5").unwrap();
        writeln!(file, ",Rooftop,47.38,8.53,urban,,").unwrap();
        writeln!(file, "s3,Nowhere,123.0,8.0,scenic,,").unwrap();
        writeln!(file, "s4,Field,not-a-number,8.0,racing,,").unwrap();
        writeln!(file, "s5,Hill,47.0,8.0,skydiving,,").unwrap();
        file.flush().unwrap();

        let spots = load_csv(file.path()).unwrap();
        assert_eq!(spots.len(), 2);
        assert_eq!(spots[0].id, "s1");
        assert_eq!(spots[0].category, SpotCategory::Cinematic);
        assert_eq!(spots[0].rating, Some(4.5));
        assert_eq!(spots[1].name, "Rooftop");
        assert_eq!(spots[1].description, None);
        assert!(!spots[1].id.is_empty());
    }
}
