use crate::errors::ValidationError;
use registry::types::normalize_tags;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime};

/// How far in the past a requested time may lie before it is rejected.
/// Absorbs clock skew between consumer and broker.
pub const TIME_GRACE: Duration = Duration::from_secs(60);

/// WGS84 position, `lat,lon` on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lon: f64) -> Result<Self, ValidationError> {
        let coordinates = Coordinates { lat, lon };
        coordinates.validate()?;
        Ok(coordinates)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let lat_ok = self.lat.is_finite() && (-90.0..=90.0).contains(&self.lat);
        let lon_ok = self.lon.is_finite() && (-180.0..=180.0).contains(&self.lon);
        if lat_ok && lon_ok {
            Ok(())
        } else {
            Err(ValidationError::InvalidCoordinates(self.to_string()))
        }
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.lat, self.lon)
    }
}

impl FromStr for Coordinates {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidCoordinates(s.to_string());
        let (lat, lon) = s.split_once(',').ok_or_else(invalid)?;
        let lat = lat.trim().parse::<f64>().map_err(|_| invalid())?;
        let lon = lon.trim().parse::<f64>().map_err(|_| invalid())?;
        Coordinates::new(lat, lon)
    }
}

/// Search for transport options.
///
/// Empty filter sets mean "no constraint". Mode and mobility type filters
/// are only set through `with_*`, which normalizes them the way the registry
/// stores tags. `radius_meters` and `limit` are forwarded only when they
/// carry a meaningful value.
#[derive(Clone, Debug, PartialEq)]
pub struct OptionsQuery {
    pub from: Coordinates,
    pub to: Option<Coordinates>,
    pub start_time: Option<SystemTime>,
    pub end_time: Option<SystemTime>,
    pub radius_meters: Option<i64>,
    pub sharing_allowed: Option<bool>,
    modes: BTreeSet<String>,
    mobility_types: BTreeSet<String>,
    /// Explicit provider allow-list. Every id must exist in the registry.
    pub provider_ids: BTreeSet<String>,
    pub limit: Option<u32>,
}

impl OptionsQuery {
    pub fn new(from: Coordinates) -> Self {
        OptionsQuery {
            from,
            to: None,
            start_time: None,
            end_time: None,
            radius_meters: None,
            sharing_allowed: None,
            modes: BTreeSet::new(),
            mobility_types: BTreeSet::new(),
            provider_ids: BTreeSet::new(),
            limit: None,
        }
    }

    pub fn with_modes<I, S>(mut self, modes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.modes = normalize_tags(Some(modes));
        self
    }

    pub fn with_mobility_types<I, S>(mut self, mobility_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.mobility_types = normalize_tags(Some(mobility_types));
        self
    }

    pub fn modes(&self) -> &BTreeSet<String> {
        &self.modes
    }

    pub fn mobility_types(&self) -> &BTreeSet<String> {
        &self.mobility_types
    }

    pub fn with_provider_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.provider_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Checks the query against `now`. Both ends of the time window may be
    /// given; how a provider combines them is up to the provider.
    pub fn validate(&self, now: SystemTime) -> Result<(), ValidationError> {
        self.from.validate()?;
        if let Some(to) = &self.to {
            to.validate()?;
        }

        let earliest = now.checked_sub(TIME_GRACE).unwrap_or(now);
        if let Some(start) = self.start_time
            && start < earliest
        {
            return Err(ValidationError::TimeInPast { field: "startTime" });
        }
        if let Some(end) = self.end_time
            && end < earliest
        {
            return Err(ValidationError::TimeInPast { field: "endTime" });
        }
        if let (Some(start), Some(end)) = (self.start_time, self.end_time)
            && end <= start
        {
            return Err(ValidationError::EndNotAfterStart);
        }

        Ok(())
    }
}

/// Listing of the consumer's bookings across providers.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BookingsQuery {
    /// Only bookings in this state, forwarded as `?state=`.
    pub state: Option<String>,
    /// Explicit provider allow-list. Every id must exist in the registry.
    pub provider_ids: BTreeSet<String>,
}
