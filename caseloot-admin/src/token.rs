//! `X-Admin-Token` check (§4.9): constant-time comparison against the
//! configured token, same pattern as the webhook secret header.

use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;

use crate::error::AdminError;

pub fn verify_admin_token(configured: &SecretString, provided: Option<&str>) -> Result<(), AdminError> {
    let provided = provided.ok_or(AdminError::Unauthorized)?;
    let matches: bool = configured.expose_secret().as_bytes().ct_eq(provided.as_bytes()).into();
    if matches {
        Ok(())
    } else {
        Err(AdminError::Unauthorized)
    }
}
