// Password storage. Stored values are bcrypt hashes; rows written by older
// deployments may still hold plaintext until their next successful login.

use crate::error::AppResult;

/// Lowest cost bcrypt accepts.
pub const MIN_COST: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordHash(String);

impl PasswordHash {
    /// Hash a plaintext password for storage.
    pub fn new(plaintext: &str, cost: u32) -> AppResult<Self> {
        let hash = bcrypt::hash(plaintext, cost.max(MIN_COST))?;
        Ok(Self(hash))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordCheck {
    Valid,
    /// Matched a plaintext value; the caller should rewrite it as a hash.
    ValidLegacy,
    Invalid,
}

impl PasswordCheck {
    pub fn is_valid(self) -> bool {
        !matches!(self, PasswordCheck::Invalid)
    }
}

fn looks_like_bcrypt(stored: &str) -> bool {
    stored.len() == 60
        && ["$2a$", "$2b$", "$2y$"]
            .iter()
            .any(|prefix| stored.starts_with(prefix))
}

/// Check `plaintext` against a stored password column value.
pub fn verify(plaintext: &str, stored: &str) -> PasswordCheck {
    if looks_like_bcrypt(stored) {
        if bcrypt::verify(plaintext, stored).unwrap_or(false) {
            PasswordCheck::Valid
        } else {
            PasswordCheck::Invalid
        }
    } else if constant_time_eq(plaintext.as_bytes(), stored.as_bytes()) {
        PasswordCheck::ValidLegacy
    } else {
        PasswordCheck::Invalid
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let max_len = a.len().max(b.len());
    let mut diff = 0u8;
    for i in 0..max_len {
        diff |= a.get(i).copied().unwrap_or(0) ^ b.get(i).copied().unwrap_or(0);
    }
    a.len() == b.len() && diff == 0
}
