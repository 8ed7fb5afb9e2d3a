use serde::{Deserialize, Serialize};

use super::super::domain::Grade;

/// Score breakpoints for each letter grade; anything below `d` is Dead.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradeThresholds {
    pub a: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
}

impl Default for GradeThresholds {
    fn default() -> Self {
        Self {
            a: 85,
            b: 70,
            c: 50,
            d: 30,
        }
    }
}

impl GradeThresholds {
    pub fn grade_for(&self, score: u8) -> Grade {
        if score >= self.a {
            Grade::A
        } else if score >= self.b {
            Grade::B
        } else if score >= self.c {
            Grade::C
        } else if score >= self.d {
            Grade::D
        } else {
            Grade::Dead
        }
    }

    pub fn is_descending(&self) -> bool {
        self.a > self.b && self.b > self.c && self.c > self.d
    }
}

/// Relative weight of each checklist item.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CheckWeights {
    pub property_type: u16,
    pub beds_baths: u16,
    pub sqft: u16,
    pub year_built: u16,
    pub condition: u16,
    pub price: u16,
    pub arv: u16,
    pub location: u16,
}

impl Default for CheckWeights {
    fn default() -> Self {
        Self {
            property_type: 15,
            beds_baths: 10,
            sqft: 10,
            year_built: 5,
            condition: 15,
            price: 25,
            arv: 10,
            location: 10,
        }
    }
}

/// Checklist items a weight can be tuned for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    PropertyType,
    BedsBaths,
    Sqft,
    YearBuilt,
    Condition,
    Price,
    Arv,
    Location,
}

impl CheckKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::PropertyType => "property_type",
            Self::BedsBaths => "beds_baths",
            Self::Sqft => "sqft",
            Self::YearBuilt => "year_built",
            Self::Condition => "condition",
            Self::Price => "price",
            Self::Arv => "arv",
            Self::Location => "location",
        }
    }
}

impl CheckWeights {
    pub fn weight(&self, kind: CheckKind) -> u16 {
        match kind {
            CheckKind::PropertyType => self.property_type,
            CheckKind::BedsBaths => self.beds_baths,
            CheckKind::Sqft => self.sqft,
            CheckKind::YearBuilt => self.year_built,
            CheckKind::Condition => self.condition,
            CheckKind::Price => self.price,
            CheckKind::Arv => self.arv,
            CheckKind::Location => self.location,
        }
    }

    pub fn with_weight(mut self, kind: CheckKind, value: u16) -> Self {
        let slot = match kind {
            CheckKind::PropertyType => &mut self.property_type,
            CheckKind::BedsBaths => &mut self.beds_baths,
            CheckKind::Sqft => &mut self.sqft,
            CheckKind::YearBuilt => &mut self.year_built,
            CheckKind::Condition => &mut self.condition,
            CheckKind::Price => &mut self.price,
            CheckKind::Arv => &mut self.arv,
            CheckKind::Location => &mut self.location,
        };
        *slot = value;
        self
    }
}

/// Rubric configuration for lead grading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub thresholds: GradeThresholds,
    pub weights: CheckWeights,
    pub exclusion_penalty: u8,
    /// Hard property-damage phrases scanned for every buy box.
    pub major_exclusions: Vec<String>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            thresholds: GradeThresholds::default(),
            weights: CheckWeights::default(),
            exclusion_penalty: 20,
            major_exclusions: default_major_exclusions(),
        }
    }
}

pub fn default_major_exclusions() -> Vec<String> {
    [
        "fire damage",
        "foundation failure",
        "sinkhole",
        "condemned",
        "structural collapse",
        "flood damage",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}
