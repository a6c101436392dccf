//! Postal address snapshots.

use serde::{Deserialize, Serialize};

/// A postal address captured onto the Order at the time it was entered.
///
/// Stored as a snapshot: later edits to a customer's address book never
/// change what an existing order shows.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Recipient name.
    pub full_name: String,
    /// Company or organization, if any.
    pub company: String,
    /// First street line.
    pub street_line1: String,
    /// Second street line.
    pub street_line2: String,
    /// City or locality.
    pub city: String,
    /// Province, state, or region.
    pub province: String,
    /// Postal or ZIP code.
    pub postal_code: String,
    /// ISO 3166-1 alpha-2 country code, e.g. "GB".
    pub country_code: String,
    /// Contact phone number.
    pub phone_number: String,
}

impl Address {
    /// Minimal address with just a country code, enough for shipping
    /// calculators that price by destination country.
    #[must_use]
    pub fn for_country(country_code: impl Into<String>) -> Self {
        Self { country_code: country_code.into(), ..Self::default() }
    }
}
