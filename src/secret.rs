use std::fmt;

use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

/// Random bytes behind every cancellation credential.
const CREDENTIAL_BYTES: usize = 32;

/// Opaque cancellation secret handed out once at booking time.
///
/// `Debug` is redacted so the value never reaches logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential(String);

impl Credential {
    /// Draw a fresh credential from the OS CSPRNG, hex encoded.
    pub fn generate() -> Self {
        let mut bytes = [0u8; CREDENTIAL_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Constant-time comparison against a caller-supplied value.
    pub fn matches(&self, supplied: &str) -> bool {
        constant_time_eq(self.0.as_bytes(), supplied.as_bytes())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(..)")
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Byte equality whose running time does not depend on where the inputs differ.
/// Length is not secret: credentials have a fixed length.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).unwrap_u8() == 1
}
