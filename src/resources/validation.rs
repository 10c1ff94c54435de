//! Input checks run before any resource call reaches the network.

use crate::error::{CloudError, Result};

pub const MAX_NAME_LEN: usize = 63;
pub const MAX_ID_LEN: usize = 128;
pub const MAX_ENV_KEY_LEN: usize = 256;

/// Deployment regions accepted for new resources.
pub const REGIONS: &[&str] = &[
    "arn1", "bom1", "cdg1", "cle1", "cpt1", "dub1", "fra1", "gru1", "hkg1", "hnd1", "iad1", "icn1",
    "kix1", "lhr1", "pdx1", "sfo1", "sin1", "syd1",
];

pub const PLANS: &[&str] = &["hobby", "pro", "enterprise"];

pub const TARGETS: &[&str] = &["production", "preview", "development"];

pub const DATABASE_KINDS: &[&str] = &["postgres", "kv", "blob", "edge-config"];

/// Non-empty identifier that is safe to splice into a URL path.
pub fn validate_id(field: &'static str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(CloudError::validation(field, "must not be empty"));
    }
    if value.len() > MAX_ID_LEN {
        return Err(CloudError::validation(
            field,
            format!("must be at most {} characters", MAX_ID_LEN),
        ));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(CloudError::validation(
            field,
            format!("'{}' contains characters not allowed in an identifier", value),
        ));
    }
    Ok(())
}

/// Resource name: 1-63 chars of lower-case letters, digits, `-` and `_`.
pub fn validate_name(field: &'static str, value: &str) -> Result<()> {
    if value.is_empty() || value.len() > MAX_NAME_LEN {
        return Err(CloudError::validation(
            field,
            format!("must be 1-{} characters, got {}", MAX_NAME_LEN, value.len()),
        ));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err(CloudError::validation(
            field,
            format!(
                "'{}' must contain only lower-case letters, digits, '-' and '_'",
                value
            ),
        ));
    }
    Ok(())
}

pub fn validate_region(value: &str) -> Result<()> {
    one_of("region", value, REGIONS)
}

pub fn validate_plan(value: &str) -> Result<()> {
    one_of("plan", value, PLANS)
}

pub fn validate_target(value: &str) -> Result<()> {
    one_of("target", value, TARGETS)
}

pub fn validate_database_kind(value: &str) -> Result<()> {
    one_of("kind", value, DATABASE_KINDS)
}

/// Environment variable key: `[A-Za-z_][A-Za-z0-9_]*`, at most 256 chars.
pub fn validate_env_key(value: &str) -> Result<()> {
    let mut chars = value.chars();
    let valid_start = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    if !valid_start
        || value.len() > MAX_ENV_KEY_LEN
        || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(CloudError::validation(
            "key",
            format!("'{}' is not a valid environment variable name", value),
        ));
    }
    Ok(())
}

fn one_of(field: &'static str, value: &str, allowed: &[&str]) -> Result<()> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(CloudError::validation(
            field,
            format!("'{}' is not one of: {}", value, allowed.join(", ")),
        ))
    }
}
