//! Jurisdiction codes and identifier normalization

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Member-state prefixes accepted by VIES (Greece is `EL`, Northern Ireland `XI`).
pub const VIES_JURISDICTIONS: [&str; 28] = [
    "AT", "BE", "BG", "CY", "CZ", "DE", "DK", "EE", "EL", "ES", "FI", "FR", "HR", "HU", "IE",
    "IT", "LT", "LU", "LV", "MT", "NL", "PL", "PT", "RO", "SE", "SI", "SK", "XI",
];

/// Sentinel jurisdiction for identifiers that could not be resolved.
pub const UNKNOWN_JURISDICTION: &str = "UNKNOWN";

/// Set of recognized two-letter jurisdiction codes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JurisdictionSet {
    codes: BTreeSet<String>,
}

impl JurisdictionSet {
    /// The VIES member-state list.
    pub fn vies() -> Self {
        Self {
            codes: VIES_JURISDICTIONS.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// Build a custom set. Codes are upper-cased; anything that is not two
    /// ASCII letters is rejected.
    pub fn from_codes<I, S>(codes: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let codes = codes
            .into_iter()
            .map(|c| validate_code(c.as_ref()))
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(Self { codes })
    }

    pub fn contains(&self, code: &str) -> bool {
        self.codes.contains(code)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.codes.iter().map(String::as_str)
    }
}

impl Default for JurisdictionSet {
    fn default() -> Self {
        Self::vies()
    }
}

/// Upper-case a jurisdiction code and check it is two ASCII letters.
pub fn validate_code(code: &str) -> Result<String, ConfigError> {
    let upper = code.trim().to_ascii_uppercase();
    if upper.len() == 2 && upper.bytes().all(|b| b.is_ascii_uppercase()) {
        Ok(upper)
    } else {
        Err(ConfigError::InvalidJurisdiction(code.to_string()))
    }
}

/// An identifier split into its jurisdiction prefix and the remainder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedIdentifier {
    pub jurisdiction: String,
    pub canonical: String,
}

impl NormalizedIdentifier {
    /// Jurisdiction code followed by the canonical identifier (the cache key).
    pub fn full(&self) -> String {
        format!("{}{}", self.jurisdiction, self.canonical)
    }
}

/// Split a raw identifier into (jurisdiction, canonical identifier).
///
/// The input is trimmed and upper-cased. Returns `None` when it is shorter
/// than two characters or its first two characters are not a known code.
pub fn normalize(raw: &str, known: &JurisdictionSet) -> Option<NormalizedIdentifier> {
    let cleaned = raw.trim().to_uppercase();
    let prefix = cleaned.get(..2)?;
    if !known.contains(prefix) {
        return None;
    }
    Some(NormalizedIdentifier {
        jurisdiction: prefix.to_string(),
        canonical: cleaned[2..].to_string(),
    })
}
