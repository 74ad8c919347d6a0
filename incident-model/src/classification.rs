use crate::{ModelError, Severity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    WaterEmergency,
    FireEmergency,
    MedicalEmergency,
    StructuralEmergency,
    Evacuation,
    GeneralEmergency,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::WaterEmergency => "WATER_EMERGENCY",
            Category::FireEmergency => "FIRE_EMERGENCY",
            Category::MedicalEmergency => "MEDICAL_EMERGENCY",
            Category::StructuralEmergency => "STRUCTURAL_EMERGENCY",
            Category::Evacuation => "EVACUATION",
            Category::GeneralEmergency => "GENERAL_EMERGENCY",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Triage result derived from an [`IncidentData`] snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub severity: Severity,
    pub priority: f64,
    pub category: Category,
    pub tags: BTreeSet<String>,
}

/// Raw attributes a reporter supplies for a new incident.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IncidentData {
    pub title: String,
    pub description: String,
    pub location: String,
    pub incident_type: String,
    /// Hours until the situation escalates; smaller is more urgent.
    pub time_sensitivity: f64,
    /// Persons per unit area.
    pub population_density: f64,
    /// 0.0 ..= 1.0
    pub vulnerability_index: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weather_conditions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_impact: Option<String>,
}

pub fn validate_incident_data(data: &IncidentData) -> Result<(), ModelError> {
    if data.title.trim().is_empty() {
        return Err(ModelError::Missing { field: "title" });
    }
    if data.incident_type.trim().is_empty() {
        return Err(ModelError::Missing {
            field: "incident_type",
        });
    }
    if !data.time_sensitivity.is_finite() || data.time_sensitivity < 0.0 {
        return Err(ModelError::OutOfRange {
            field: "time_sensitivity",
            value: data.time_sensitivity,
        });
    }
    if !data.population_density.is_finite() || data.population_density < 0.0 {
        return Err(ModelError::OutOfRange {
            field: "population_density",
            value: data.population_density,
        });
    }
    if !(0.0..=1.0).contains(&data.vulnerability_index) {
        return Err(ModelError::OutOfRange {
            field: "vulnerability_index",
            value: data.vulnerability_index,
        });
    }
    Ok(())
}
