//! Inbound identity fragments and their wire shape.
//!
//! # Responsibility
//! - Turn raw `(email, phoneNumber)` submissions into `IdentityFragment`.
//! - Reject fragments that carry no identifier at all.
//!
//! # Invariants
//! - A fragment always carries at least one identifier.
//! - Present values are kept byte-for-byte; matching is exact value equality.

use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Normalized submission consumed by the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityFragment {
    email: Option<String>,
    phone_number: Option<String>,
}

impl IdentityFragment {
    /// Builds a fragment from raw optional values.
    ///
    /// Empty strings count as absent. Any other value, whitespace included,
    /// is an identifier as given.
    pub fn new(
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Self, FragmentValidationError> {
        let email = present_value(email);
        let phone_number = present_value(phone_number);

        if email.is_none() && phone_number.is_none() {
            return Err(FragmentValidationError::MissingIdentifiers);
        }

        Ok(Self {
            email,
            phone_number,
        })
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn phone_number(&self) -> Option<&str> {
        self.phone_number.as_deref()
    }
}

impl TryFrom<&IdentifyRequest> for IdentityFragment {
    type Error = FragmentValidationError;

    fn try_from(value: &IdentifyRequest) -> Result<Self, Self::Error> {
        Self::new(value.email.as_deref(), value.phone_number.as_deref())
    }
}

fn present_value(value: Option<&str>) -> Option<String> {
    value.filter(|raw| !raw.is_empty()).map(str::to_string)
}

/// Fragment rejected before any store access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentValidationError {
    /// Both email and phone number are absent or empty.
    MissingIdentifiers,
}

impl Display for FragmentValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingIdentifiers => {
                write!(f, "at least one of email or phoneNumber is required")
            }
        }
    }
}

impl Error for FragmentValidationError {}

/// Wire request `{ email?, phoneNumber? }`.
///
/// `phoneNumber` may arrive as a JSON string or number. Numbers keep their
/// decimal rendering, so `1.5e3` becomes `"1500"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub phone_number: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct StringOrNumber;

    impl<'de> Visitor<'de> for StringOrNumber {
        type Value = Option<String>;

        fn expecting(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
            f.write_str("a phone number string, number, or null")
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D2: Deserializer<'de>>(self, d: D2) -> Result<Self::Value, D2::Error> {
            d.deserialize_any(self)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
            // `Display` drops the fraction of whole values: 1500.0 -> "1500".
            Ok(Some(v.to_string()))
        }
    }

    deserializer.deserialize_option(StringOrNumber)
}
