//! Key material and key-refresh phases.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A 128-bit symmetric key (network, application or device key).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Key128([u8; 16]);

impl Key128 {
    /// Size of the key in bytes.
    pub const BYTES: usize = 16;

    /// Create a key from raw bytes.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Generate a fresh random key.
    pub fn random(rng: &mut dyn RngCore) -> Self {
        let mut bytes = [0u8; 16];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Parse a key from a 32-character hex string.
    pub fn from_hex(s: &str) -> Option<Self> {
        let mut bytes = [0u8; 16];
        hex::decode_to_slice(s, &mut bytes).ok()?;
        Some(Self(bytes))
    }

    /// Hex encoding of the key.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Get bytes as slice reference.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

// Key material never goes to logs in full.
impl fmt::Debug for Key128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key128({}..)", &self.to_hex()[..4])
    }
}

/// Key refresh phase of a key, either network-wide or on one node.
///
/// Phases advance `Normal → First → Second → Third → Normal`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum KeyRefreshPhase {
    /// No refresh in progress.
    #[default]
    Normal,
    /// New key distributed (or being distributed).
    First,
    /// New key used for transmission, both accepted.
    Second,
    /// Old key revoked, cycle finishing.
    Third,
}

impl KeyRefreshPhase {
    /// The phase following this one in a refresh cycle.
    pub fn next(self) -> Self {
        match self {
            KeyRefreshPhase::Normal => KeyRefreshPhase::First,
            KeyRefreshPhase::First => KeyRefreshPhase::Second,
            KeyRefreshPhase::Second => KeyRefreshPhase::Third,
            KeyRefreshPhase::Third => KeyRefreshPhase::Normal,
        }
    }

    /// Whether a refresh cycle is in progress.
    pub fn is_refreshing(self) -> bool {
        self != KeyRefreshPhase::Normal
    }

    /// On-air phase value reported by Key Refresh Phase Status.
    pub fn wire_value(self) -> u8 {
        match self {
            KeyRefreshPhase::Normal | KeyRefreshPhase::Third => 0,
            KeyRefreshPhase::First => 1,
            KeyRefreshPhase::Second => 2,
        }
    }
}

impl fmt::Display for KeyRefreshPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyRefreshPhase::Normal => "normal",
            KeyRefreshPhase::First => "phase-1",
            KeyRefreshPhase::Second => "phase-2",
            KeyRefreshPhase::Third => "phase-3",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_random_keys_differ() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let a = Key128::random(&mut rng);
        let b = Key128::random(&mut rng);
        assert_ne!(a, b);
    }

    #[test]
    fn test_hex_roundtrip() {
        let key = Key128::from_bytes([0xAB; 16]);
        assert_eq!(Key128::from_hex(&key.to_hex()), Some(key));
    }

    #[test]
    fn test_phase_cycle() {
        let mut phase = KeyRefreshPhase::Normal;
        let mut seen = vec![phase];
        for _ in 0..4 {
            phase = phase.next();
            seen.push(phase);
        }
        assert_eq!(
            seen,
            vec![
                KeyRefreshPhase::Normal,
                KeyRefreshPhase::First,
                KeyRefreshPhase::Second,
                KeyRefreshPhase::Third,
                KeyRefreshPhase::Normal,
            ]
        );
        assert!(KeyRefreshPhase::First < KeyRefreshPhase::Third);
    }
}
