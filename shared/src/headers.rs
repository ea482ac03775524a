// Helpers for the Via header. Outgoing provider calls carry it so providers can
// tell broker traffic apart from direct consumer traffic.

use http::Version;
use http::header::{HeaderMap, HeaderValue, VIA};

pub const BROKER_NAME: &str = "mobility-broker";

fn version_str(version: Version) -> Option<&'static str> {
    match version {
        Version::HTTP_09 => Some("0.9"),
        Version::HTTP_10 => Some("1.0"),
        Version::HTTP_11 => Some("1.1"),
        Version::HTTP_2 => Some("2"),
        Version::HTTP_3 => Some("3"),
        _ => None,
    }
}

/// Adds a Via header naming this broker. Appends to existing if Via is already present.
pub fn add_via_header(headers: &mut HeaderMap, version: Version) {
    let Some(version_str) = version_str(version) else {
        tracing::warn!(?version, "Unknown/future HTTP version, skipping Via header");
        return;
    };

    let via_value = format!("{version_str} {BROKER_NAME}");

    if let Some(existing) = headers.get(VIA) {
        if let Ok(existing_str) = existing.to_str() {
            let combined = format!("{existing_str}, {via_value}");
            if let Ok(new_value) = HeaderValue::from_str(&combined) {
                headers.insert(VIA, new_value);
            }
        }
    } else if let Ok(new_value) = HeaderValue::from_str(&via_value) {
        headers.insert(VIA, new_value);
    }
}
