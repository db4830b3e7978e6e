use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;

use crate::error::{CliError, Result};

#[derive(Debug, Deserialize)]
struct ExpiryClaims {
    #[serde(default)]
    exp: Option<i64>,
}

/// Read the `exp` claim without checking the signature. The server is the
/// only party able to verify the token; the client only wants to avoid
/// sending one that is already stale.
pub fn token_expiry(token: &str) -> Result<Option<i64>> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = decode::<ExpiryClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map_err(|err| {
            CliError::InvalidCredential(format!(
                "Stored auth token is malformed ({err}). Try 'bothub configure' to login again"
            ))
        })?;
    Ok(data.claims.exp)
}

pub fn ensure_not_expired(token: &str) -> Result<()> {
    ensure_not_expired_at(token, Utc::now().timestamp())
}

pub fn ensure_not_expired_at(token: &str, now: i64) -> Result<()> {
    match token_expiry(token)? {
        Some(exp) if exp <= now => Err(CliError::InvalidCredential(
            "Auth token has expired. Try 'bothub configure' to login again".into(),
        )),
        _ => Ok(()),
    }
}
