use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{NestError, Result};
use crate::model::Identity;

/// Short, human-shareable code resolving to one account.
/// Always uppercase ASCII alphanumeric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PairingCode(String);

impl PairingCode {
    /// The code of an identity: its first `length` alphanumeric characters,
    /// uppercased. Same identity, same code.
    pub fn derive(identity: &Identity, length: usize) -> Result<Self> {
        let code: String = identity
            .uid()
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .take(length)
            .map(|c| c.to_ascii_uppercase())
            .collect();

        if code.len() < length {
            return Err(NestError::InvalidPairingCode(format!(
                "identity handle too short for a {}-character code",
                length
            )));
        }
        Ok(Self(code))
    }

    /// Normalize user input: trim and uppercase. Rejects empty input and
    /// anything that is not ASCII alphanumeric.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(NestError::InvalidPairingCode("code is empty".into()));
        }
        if !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(NestError::InvalidPairingCode(format!(
                "'{}' contains characters other than letters and digits",
                trimmed
            )));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PairingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
