//! Serde helpers for `secrecy::Secret` fields.
//!
//! `Secret<String>` deserializes out of the box but deliberately does not
//! serialize. Stored tenant records must round-trip their credentials, so
//! config structs opt in field by field with `serialize_with`.

use secrecy::{ExposeSecret, Secret};

pub fn serialize_secret<S: serde::Serializer>(
    secret: &Secret<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

pub fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

/// True when the secret is missing or blank.
pub fn is_blank(secret: &Secret<String>) -> bool {
    secret.expose_secret().trim().is_empty()
}
