//! Username cleanup applied before any LOGIN or TESTLOGIN is sent

use crate::error::UsernameError;
use crate::{MAX_USERNAME_LEN, SERVER_NAME, TEST_SENTINEL};

/// Trims, truncates to [`MAX_USERNAME_LEN`] characters and strips commas
pub fn sanitize_username(raw: &str) -> String {
    raw.trim()
        .chars()
        .take(MAX_USERNAME_LEN)
        .filter(|c| *c != ',')
        .collect()
}

/// Refuses names the protocol reserves for itself
pub fn validate_username(name: &str) -> Result<(), UsernameError> {
    if name.is_empty() {
        return Err(UsernameError::Empty);
    }
    if name.starts_with('!') {
        return Err(UsernameError::ReservedPrefix(name.to_string()));
    }
    if name.eq_ignore_ascii_case(SERVER_NAME) || name == TEST_SENTINEL {
        return Err(UsernameError::Reserved(name.to_string()));
    }
    Ok(())
}

/// Sanitizes then validates, returning the name that goes on the wire
pub fn prepare_username(raw: &str) -> Result<String, UsernameError> {
    let name = sanitize_username(raw);
    validate_username(&name)?;
    Ok(name)
}
