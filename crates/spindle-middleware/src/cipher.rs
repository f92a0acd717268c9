//! Command token wire format and the decryption collaborator.
//!
//! A command datagram carries one [`CommandToken`]: a JSON array of integers
//! holding the encrypted code points, e.g. `[131,118,134,118,135]`.  The
//! payload is parsed strictly as that shape and nothing else; it is never
//! evaluated.
//!
//! Decryption is delegated to a [`Cipher`].  [`ShiftCipher`] is the keyed
//! additive scheme the deployment's clients speak.  It keeps casual traffic
//! opaque and is not a hardened cryptosystem.

use spindle_types::SpindleError;
use zeroize::Zeroizing;

/// Upper bound on code points in a single token.
///
/// Longer payloads are rejected before decryption; no valid command comes
/// close to this length.
pub const MAX_TOKEN_LEN: usize = 64;

// ────────────────────────────────────────────────────────────────────────────
// CommandToken
// ────────────────────────────────────────────────────────────────────────────

/// The decoded, still-encrypted body of a command datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandToken(Vec<i64>);

impl CommandToken {
    pub fn new(codes: Vec<i64>) -> Self {
        Self(codes)
    }

    /// Parse a datagram payload.
    ///
    /// # Errors
    ///
    /// Returns [`SpindleError::Decode`] unless `bytes` is a JSON array of at
    /// most [`MAX_TOKEN_LEN`] integers.
    pub fn parse(bytes: &[u8]) -> Result<Self, SpindleError> {
        let codes: Vec<i64> = serde_json::from_slice(bytes)
            .map_err(|e| SpindleError::Decode(format!("malformed command token: {e}")))?;
        if codes.len() > MAX_TOKEN_LEN {
            return Err(SpindleError::Decode(format!(
                "command token has {} code points, exceeding the limit of {}",
                codes.len(),
                MAX_TOKEN_LEN,
            )));
        }
        Ok(Self(codes))
    }

    pub fn codes(&self) -> &[i64] {
        &self.0
    }

    /// Serialise back into the datagram wire form.
    pub fn to_wire(&self) -> String {
        serde_json::Value::from(self.0.clone()).to_string()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Cipher
// ────────────────────────────────────────────────────────────────────────────

/// The decryption collaborator.
pub trait Cipher: Send + Sync {
    /// Recover the plaintext command string.
    ///
    /// # Errors
    ///
    /// Returns [`SpindleError::Decode`] when the token cannot be decrypted.
    fn decrypt(&self, token: &CommandToken) -> Result<String, SpindleError>;
}

/// Keyed additive cipher over Unicode code points.
///
/// Code point `i` of the plaintext is shifted up by `key[i % key.len()]`.
pub struct ShiftCipher {
    key: Zeroizing<Vec<u8>>,
}

impl ShiftCipher {
    /// Build a cipher from `key`.  An empty key is the identity transform.
    pub fn new(key: &[u8]) -> Self {
        Self {
            key: Zeroizing::new(key.to_vec()),
        }
    }

    fn shift(&self, index: usize) -> i64 {
        if self.key.is_empty() {
            0
        } else {
            i64::from(self.key[index % self.key.len()])
        }
    }

    /// Encrypt `plaintext` into a token, as a client would.
    pub fn encrypt(&self, plaintext: &str) -> CommandToken {
        CommandToken(
            plaintext
                .chars()
                .enumerate()
                .map(|(i, c)| i64::from(u32::from(c)) + self.shift(i))
                .collect(),
        )
    }
}

impl Cipher for ShiftCipher {
    fn decrypt(&self, token: &CommandToken) -> Result<String, SpindleError> {
        token
            .codes()
            .iter()
            .enumerate()
            .map(|(i, &code)| {
                code.checked_sub(self.shift(i))
                    .and_then(|point| u32::try_from(point).ok())
                    .and_then(char::from_u32)
                    .ok_or_else(|| {
                        SpindleError::Decode(format!("code point {code} at {i} does not decrypt"))
                    })
            })
            .collect()
    }
}

impl std::fmt::Debug for ShiftCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShiftCipher")
            .field("key", &"<redacted>")
            .finish()
    }
}
