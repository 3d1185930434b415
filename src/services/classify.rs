//! Power-failure classification.
//!
//! Only off readings are classified. Transformer readings are always
//! `Transformer`. Domestic/public readings go through an ordered, first match
//! wins text scan:
//!
//! 1. id equal to `h22` (case-insensitive) is domestic
//! 2. location against domestic indicators, then public indicators
//! 3. id against domestic indicators, then public indicators
//! 4. otherwise public
//!
//! Indicators are plain substrings of the lowercased text; list order decides
//! which indicator is reported, not the position in the text.

use crate::models::alert::{AlertKind, Classification};
use crate::models::sensor::{ChannelKind, SensorReading, Status};

pub const DOMESTIC_SOURCE_ID: &str = "h22";

pub const DOMESTIC_INDICATORS: [&str; 10] = [
    "domestic",
    "home",
    "house",
    "residential",
    "apartment",
    "flat",
    "villa",
    "bungalow",
    "cottage",
    "private",
];

pub const PUBLIC_INDICATORS: [&str; 16] = [
    "public",
    "commercial",
    "office",
    "shop",
    "store",
    "mall",
    "hospital",
    "school",
    "college",
    "university",
    "government",
    "street",
    "road",
    "highway",
    "park",
    "market",
];

pub const DEFAULT_REASON: &str = "No specific indicators found, defaulting to Public";
pub const TRANSFORMER_REASON: &str = "Transformer channel reported failure";

/// Classify a reading, or `None` when it is not an off reading.
pub fn classify(reading: &SensorReading) -> Option<Classification> {
    if reading.status != Some(Status::Off) {
        return None;
    }

    match reading.channel {
        ChannelKind::Transformer => Some(Classification {
            kind: AlertKind::Transformer,
            reason: TRANSFORMER_REASON.to_string(),
        }),
        ChannelKind::DomesticOrPublic => Some(classify_line(
            reading.id.as_deref().unwrap_or_default(),
            reading.site.as_deref().unwrap_or_default(),
        )),
    }
}

/// Text classification of a domestic/public node by its id and location.
pub fn classify_line(id: &str, location: &str) -> Classification {
    let id = id.to_lowercase();
    let location = location.to_lowercase();

    if id == DOMESTIC_SOURCE_ID {
        return Classification {
            kind: AlertKind::Domestic,
            reason: "ID is H22".to_string(),
        };
    }

    scan("Location", &location)
        .or_else(|| scan("ID", &id))
        .unwrap_or_else(|| Classification {
            kind: AlertKind::Public,
            reason: DEFAULT_REASON.to_string(),
        })
}

fn scan(field: &str, text: &str) -> Option<Classification> {
    let groups: [(AlertKind, &str, &[&str]); 2] = [
        (AlertKind::Domestic, "domestic", &DOMESTIC_INDICATORS),
        (AlertKind::Public, "public", &PUBLIC_INDICATORS),
    ];

    groups.into_iter().find_map(|(kind, label, indicators)| {
        indicators
            .iter()
            .find(|indicator| text.contains(*indicator))
            .map(|indicator| Classification {
                kind,
                reason: format!("{} contains {} indicator: {}", field, label, indicator),
            })
    })
}
