//! Advertised-name codec
//!
//! Devices identify themselves with a 3-character alphanumeric tag carried as
//! service data under the well-known service UUID. Every consumer of an
//! advertised name goes through [`AdvertisedName::decode`], so malformed
//! payloads are uniformly treated as "no identity" rather than an error.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Validation failure for a candidate advertised name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("advertised name must be exactly 3 ASCII alphanumeric characters, got {0:?}")]
pub struct NameError(pub String);

/// A validated 3-character alphanumeric identity tag.
///
/// Construction is only possible through [`AdvertisedName::parse`] or
/// [`AdvertisedName::decode`], so a value of this type always matches
/// `[A-Za-z0-9]{3}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AdvertisedName(String);

/// Length of an advertised name in bytes.
pub const NAME_LEN: usize = 3;

impl AdvertisedName {
    /// Validate a candidate tag.
    pub fn parse(candidate: &str) -> Result<Self, NameError> {
        if candidate.len() == NAME_LEN
            && candidate.bytes().all(|b| b.is_ascii_alphanumeric())
        {
            Ok(Self(candidate.to_owned()))
        } else {
            Err(NameError(candidate.to_owned()))
        }
    }

    /// Decode service data from an advertisement payload.
    ///
    /// Returns `Some` only if the data exists and, interpreted as ASCII, is
    /// exactly 3 alphanumeric characters. Pure function, no side effects.
    pub fn decode(service_data: Option<&[u8]>) -> Option<Self> {
        let bytes = service_data?;
        let text = std::str::from_utf8(bytes).ok()?;
        Self::parse(text).ok()
    }

    /// ASCII-encode the tag for an outgoing advertisement payload.
    ///
    /// Infallible: invalid names are unrepresentable, rejection happens at
    /// the mutator that accepts the candidate string.
    pub fn encode(&self) -> Vec<u8> {
        self.0.as_bytes().to_vec()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for AdvertisedName {
    /// The factory tag broadcast before the caller sets one.
    fn default() -> Self {
        Self("New".to_owned())
    }
}

impl fmt::Display for AdvertisedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AdvertisedName {
    type Error = NameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AdvertisedName> for String {
    fn from(name: AdvertisedName) -> Self {
        name.0
    }
}
