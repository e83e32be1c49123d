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

//! Overlay categories and the layer toggle mask.
//!
//! The mask is part of every cache key, so flipping a toggle simply
//! addresses a different set of cache entries.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Category of an overlay feature, one per user-facing map layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayCategory {
    ControlledAirspace,
    RestrictedArea,
    ProhibitedArea,
    DangerArea,
    TemporaryRestriction,
    Airport,
    NatureReserve,
    PowerLine,
}

impl OverlayCategory {
    /// Every category in bit order.
    pub const ALL: [OverlayCategory; 8] = [
        OverlayCategory::ControlledAirspace,
        OverlayCategory::RestrictedArea,
        OverlayCategory::ProhibitedArea,
        OverlayCategory::DangerArea,
        OverlayCategory::TemporaryRestriction,
        OverlayCategory::Airport,
        OverlayCategory::NatureReserve,
        OverlayCategory::PowerLine,
    ];

    /// Stable bit position inside a [`LayerMask`].
    #[must_use]
    pub fn bit(self) -> u32 {
        match self {
            OverlayCategory::ControlledAirspace => 0,
            OverlayCategory::RestrictedArea => 1,
            OverlayCategory::ProhibitedArea => 2,
            OverlayCategory::DangerArea => 3,
            OverlayCategory::TemporaryRestriction => 4,
            OverlayCategory::Airport => 5,
            OverlayCategory::NatureReserve => 6,
            OverlayCategory::PowerLine => 7,
        }
    }

    /// Identifier used in config files, CLI flags and GeoJSON properties.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            OverlayCategory::ControlledAirspace => "controlled_airspace",
            OverlayCategory::RestrictedArea => "restricted_area",
            OverlayCategory::ProhibitedArea => "prohibited_area",
            OverlayCategory::DangerArea => "danger_area",
            OverlayCategory::TemporaryRestriction => "temporary_restriction",
            OverlayCategory::Airport => "airport",
            OverlayCategory::NatureReserve => "nature_reserve",
            OverlayCategory::PowerLine => "power_line",
        }
    }

    /// Human-readable name
    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            OverlayCategory::ControlledAirspace => "Controlled Airspace",
            OverlayCategory::RestrictedArea => "Restricted Area",
            OverlayCategory::ProhibitedArea => "Prohibited Area",
            OverlayCategory::DangerArea => "Danger Area",
            OverlayCategory::TemporaryRestriction => "Temporary Restriction",
            OverlayCategory::Airport => "Airport",
            OverlayCategory::NatureReserve => "Nature Reserve",
            OverlayCategory::PowerLine => "Power Line",
        }
    }
}

impl std::fmt::Display for OverlayCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OverlayCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        OverlayCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| format!("unknown overlay category: {s}"))
    }
}

/// Bitmask of enabled overlay categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LayerMask(u32);

impl LayerMask {
    /// No categories enabled.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Every known category enabled.
    #[must_use]
    pub fn all() -> Self {
        OverlayCategory::ALL.into_iter().collect()
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub fn contains(self, category: OverlayCategory) -> bool {
        self.0 & (1 << category.bit()) != 0
    }

    /// Check if any category is enabled in both masks.
    #[must_use]
    pub fn intersects(self, other: LayerMask) -> bool {
        self.0 & other.0 != 0
    }

    #[must_use]
    pub fn intersection(self, other: LayerMask) -> LayerMask {
        Self(self.0 & other.0)
    }

    #[must_use]
    pub fn union(self, other: LayerMask) -> LayerMask {
        Self(self.0 | other.0)
    }

    /// Builder method to enable a category
    #[must_use]
    pub fn with(self, category: OverlayCategory) -> Self {
        Self(self.0 | (1 << category.bit()))
    }

    /// Builder method to disable a category
    #[must_use]
    pub fn without(self, category: OverlayCategory) -> Self {
        Self(self.0 & !(1 << category.bit()))
    }

    /// Flip a category in place.
    pub fn toggle(&mut self, category: OverlayCategory) {
        self.0 ^= 1 << category.bit();
    }

    /// Iterate enabled categories in bit order.
    pub fn iter(self) -> impl Iterator<Item = OverlayCategory> {
        OverlayCategory::ALL.into_iter().filter(move |c| self.contains(*c))
    }
}

impl FromIterator<OverlayCategory> for LayerMask {
    fn from_iter<T: IntoIterator<Item = OverlayCategory>>(iter: T) -> Self {
        iter.into_iter().fold(Self::empty(), LayerMask::with)
    }
}

impl std::fmt::Display for LayerMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.iter().map(OverlayCategory::as_str).collect();
        write!(f, "{}", names.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_changes_mask() {
        let mut mask = LayerMask::empty().with(OverlayCategory::RestrictedArea);
        let before = mask;
        mask.toggle(OverlayCategory::PowerLine);
        assert_ne!(before, mask);
        assert!(mask.contains(OverlayCategory::PowerLine));
        mask.toggle(OverlayCategory::PowerLine);
        assert_eq!(before, mask);
    }

    #[test]
    fn test_all_contains_every_category() {
        let mask = LayerMask::all();
        assert_eq!(mask.iter().count(), OverlayCategory::ALL.len());
        assert_eq!(mask.bits(), 0xFF);
    }

    #[test]
    fn test_without_and_intersects() {
        let mask = LayerMask::all().without(OverlayCategory::Airport);
        assert!(!mask.contains(OverlayCategory::Airport));
        let airports = LayerMask::empty().with(OverlayCategory::Airport);
        assert!(!mask.intersects(airports));
        assert!(LayerMask::all().intersects(airports));
    }

    #[test]
    fn test_category_from_str() {
        assert_eq!(
            "restricted-area".parse::<OverlayCategory>(),
            Ok(OverlayCategory::RestrictedArea)
        );
        assert_eq!(
            "Power Line".parse::<OverlayCategory>(),
            Ok(OverlayCategory::PowerLine)
        );
        assert!("runway".parse::<OverlayCategory>().is_err());
    }

    #[test]
    fn test_display_lists_enabled() {
        let mask: LayerMask = [OverlayCategory::Airport, OverlayCategory::ControlledAirspace]
            .into_iter()
            .collect();
        assert_eq!(mask.to_string(), "controlled_airspace,airport");
    }
}
