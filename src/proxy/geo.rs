//! Geolocation lookup for observed egress IPs using an MMDB database
//!
//! The database is a black box to the rest of the engine: a missing file,
//! a malformed IP or an absent entry all degrade to "no geography" and
//! never fail a check.

use crate::Result;
use maxminddb::{geoip2, Reader};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

/// Country and region for one IP, both optional
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GeoInfo {
    /// Country name in English
    pub country: Option<String>,
    /// Most specific subdivision name in English
    pub region: Option<String>,
}

impl GeoInfo {
    pub fn is_empty(&self) -> bool {
        self.country.is_none() && self.region.is_none()
    }
}

impl std::fmt::Display for GeoInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.country, &self.region) {
            (Some(country), Some(region)) => write!(f, "{}, {}", country, region),
            (Some(country), None) => write!(f, "{}", country),
            (None, Some(region)) => write!(f, "{}", region),
            (None, None) => write!(f, "Unknown"),
        }
    }
}

/// Shared, read-only resolver over a GeoLite2 City database.
///
/// Cloning shares the underlying reader, so all workers can hold one
/// without locking.
pub struct GeoLocator {
    reader: Arc<Reader<Vec<u8>>>,
}

impl GeoLocator {
    /// Open an MMDB file, e.g. `GeoLite2-City.mmdb`
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = Reader::open_readfile(path)?;
        Ok(Self {
            reader: Arc::new(reader),
        })
    }

    /// Look up the geography for an IP address string
    pub fn lookup(&self, ip_str: &str) -> Result<GeoInfo> {
        let ip: IpAddr = ip_str.parse()?;
        self.lookup_ip(ip)
    }

    /// Look up the geography for an already-parsed address
    pub fn lookup_ip(&self, ip: IpAddr) -> Result<GeoInfo> {
        let lookup_result = self.reader.lookup(ip)?;
        let city: Option<geoip2::City> = lookup_result.decode()?;

        let Some(city) = city else {
            return Ok(GeoInfo::default());
        };

        let country = city.country.names.english.map(String::from);
        // The most specific subdivision is the last one listed.
        let region = city
            .subdivisions
            .last()
            .and_then(|sub| sub.names.english)
            .map(String::from);

        Ok(GeoInfo { country, region })
    }
}

impl Clone for GeoLocator {
    fn clone(&self) -> Self {
        Self {
            reader: Arc::clone(&self.reader),
        }
    }
}
