use incident_model::{Category, Classification, IncidentData, Severity};
use std::collections::BTreeSet;

const TIME_WEIGHT: f64 = 0.30;
const POPULATION_WEIGHT: f64 = 0.20;
const VULNERABILITY_WEIGHT: f64 = 0.20;
const INFRASTRUCTURE_WEIGHT: f64 = 0.15;
const WEATHER_WEIGHT: f64 = 0.15;

/// Derives severity, priority, category and tags from raw incident data.
/// Pure: the same input always yields the same classification.
pub fn classify(data: &IncidentData) -> Classification {
    let severity = severity_for_score(weighted_score(data));
    Classification {
        severity,
        priority: priority(severity, data),
        category: categorize(&data.incident_type),
        tags: tags(severity, data),
    }
}

fn time_score(data: &IncidentData) -> f64 {
    (data.time_sensitivity / 24.0).min(1.0)
}

fn population_score(data: &IncidentData) -> f64 {
    (data.population_density / 1000.0).min(1.0)
}

fn has_infrastructure_impact(data: &IncidentData) -> bool {
    data.infrastructure_impact
        .as_deref()
        .is_some_and(|impact| !impact.is_empty())
}

fn has_severe_weather(data: &IncidentData) -> bool {
    data.weather_conditions.as_deref() == Some("SEVERE")
}

pub fn weighted_score(data: &IncidentData) -> f64 {
    let infrastructure = if has_infrastructure_impact(data) { 1.0 } else { 0.0 };
    let weather = if has_severe_weather(data) { 1.0 } else { 0.0 };

    TIME_WEIGHT * time_score(data)
        + POPULATION_WEIGHT * population_score(data)
        + VULNERABILITY_WEIGHT * data.vulnerability_index
        + INFRASTRUCTURE_WEIGHT * infrastructure
        + WEATHER_WEIGHT * weather
}

pub fn severity_for_score(score: f64) -> Severity {
    if score >= 0.8 {
        Severity::Extreme
    } else if score >= 0.6 {
        Severity::High
    } else if score >= 0.4 {
        Severity::Moderate
    } else {
        Severity::Low
    }
}

/// Bucket weight dominates; the raw inputs break ties within a bucket.
pub fn priority(severity: Severity, data: &IncidentData) -> f64 {
    0.4 * f64::from(severity.weight())
        + 0.3 * time_score(data)
        + 0.2 * population_score(data)
        + 0.1 * data.vulnerability_index
}

/// First matching keyword wins, so "Flood Medical Response" is water.
pub fn categorize(incident_type: &str) -> Category {
    let kind = incident_type.to_lowercase();

    if kind.contains("flood") || kind.contains("water") {
        Category::WaterEmergency
    } else if kind.contains("fire") {
        Category::FireEmergency
    } else if kind.contains("medical") {
        Category::MedicalEmergency
    } else if kind.contains("structural") {
        Category::StructuralEmergency
    } else if kind.contains("evacuation") {
        Category::Evacuation
    } else {
        Category::GeneralEmergency
    }
}

pub fn tags(severity: Severity, data: &IncidentData) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    tags.insert(severity.as_str().to_lowercase());

    // Tiers are cumulative; each threshold a value clears adds its tag.
    let hours = data.time_sensitivity;
    for (below, tag) in [(6.0, "urgent"), (12.0, "high-priority"), (24.0, "medium-priority")] {
        if hours < below {
            tags.insert(tag.to_string());
        }
    }
    for (above, tag) in [(800.0, "high-density"), (500.0, "medium-density")] {
        if data.population_density > above {
            tags.insert(tag.to_string());
        }
    }
    for (above, tag) in [(0.7, "high-vulnerability"), (0.5, "medium-vulnerability")] {
        if data.vulnerability_index > above {
            tags.insert(tag.to_string());
        }
    }

    if has_severe_weather(data) {
        tags.insert("severe-weather".to_string());
    }
    if has_infrastructure_impact(data) {
        tags.insert("infrastructure-affected".to_string());
    }
    tags
}
