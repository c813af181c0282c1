//! Dual-PIN credentials.
//!
//! Each user holds two Argon2id hashes: the safe PIN confirms the user is
//! fine, the danger PIN confirms too but silently raises an alert.
//! [`PinVerifier::classify`] always runs both comparisons in the same order
//! so the two outcomes cost the same.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};

use crate::checkin::PinType;
use crate::error::{CoreError, Result, ValidationError};
use crate::storage::SecurityConfig;

const SALT_LEN: usize = 16;

/// Stored hash pair. Never serialized to clients.
#[derive(Clone, PartialEq, Eq)]
pub struct PinHashes {
    pub safe: String,
    pub danger: String,
}

impl std::fmt::Debug for PinHashes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PinHashes(..)")
    }
}

/// Monitored person. Identity and org membership are managed elsewhere;
/// this is the slice the engine needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: i64,
    pub org_id: i64,
    pub full_name: String,
    #[serde(skip)]
    pub pins: Option<PinHashes>,
}

/// Outcome of a PIN check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinClass {
    Safe,
    Danger,
    Invalid,
}

impl PinClass {
    pub fn pin_type(self) -> Option<PinType> {
        match self {
            PinClass::Safe => Some(PinType::Safe),
            PinClass::Danger => Some(PinType::Danger),
            PinClass::Invalid => None,
        }
    }
}

/// 4-6 ASCII digits.
pub fn validate_pin_format(pin: &str) -> std::result::Result<(), ValidationError> {
    if (4..=6).contains(&pin.len()) && pin.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(ValidationError::PinFormat)
    }
}

/// Hashes and checks PINs. Holds no mutable state.
#[derive(Clone)]
pub struct PinVerifier {
    argon: Argon2<'static>,
    /// Compared against when a user has no PINs configured.
    dummy: String,
}

impl PinVerifier {
    pub fn new(security: &SecurityConfig) -> Result<Self> {
        let params = Params::new(
            security.argon2_memory_kib,
            security.argon2_iterations,
            security.argon2_parallelism,
            None,
        )
        .map_err(|e| CoreError::Credential(e.to_string()))?;
        let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let mut verifier = Self {
            argon,
            dummy: String::new(),
        };
        verifier.dummy = verifier.hash("000000")?;
        Ok(verifier)
    }

    /// Hash one PIN into a PHC string with a fresh salt.
    pub fn hash(&self, pin: &str) -> Result<String> {
        let mut salt_bytes = [0u8; SALT_LEN];
        getrandom::getrandom(&mut salt_bytes)
            .map_err(|e| CoreError::Credential(format!("salt generation failed: {e}")))?;
        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|e| CoreError::Credential(e.to_string()))?;
        let hash = self
            .argon
            .hash_password(pin.as_bytes(), &salt)
            .map_err(|e| CoreError::Credential(e.to_string()))?;
        Ok(hash.to_string())
    }

    /// Validate and hash a new PIN pair.
    pub fn hash_pair(&self, safe: &str, danger: &str) -> Result<PinHashes> {
        validate_pin_format(safe)?;
        validate_pin_format(danger)?;
        if safe == danger {
            return Err(ValidationError::PinsIdentical.into());
        }
        Ok(PinHashes {
            safe: self.hash(safe)?,
            danger: self.hash(danger)?,
        })
    }

    fn matches(&self, pin: &str, phc: &str) -> Result<bool> {
        let parsed =
            PasswordHash::new(phc).map_err(|e| CoreError::Credential(e.to_string()))?;
        Ok(self.argon.verify_password(pin.as_bytes(), &parsed).is_ok())
    }

    /// Classify a submitted PIN.
    ///
    /// Format is checked first. After that both hashes are always compared,
    /// safe first, whether or not the first one matched.
    pub fn classify(&self, pin: &str, hashes: Option<&PinHashes>) -> Result<PinClass> {
        validate_pin_format(pin)?;
        let Some(hashes) = hashes else {
            self.matches(pin, &self.dummy)?;
            self.matches(pin, &self.dummy)?;
            return Ok(PinClass::Invalid);
        };
        let is_safe = self.matches(pin, &hashes.safe)?;
        let is_danger = self.matches(pin, &hashes.danger)?;
        Ok(match (is_safe, is_danger) {
            (true, _) => PinClass::Safe,
            (false, true) => PinClass::Danger,
            (false, false) => PinClass::Invalid,
        })
    }
}

#[cfg(test)]
pub(crate) fn fast_security() -> SecurityConfig {
    SecurityConfig {
        verify_floor_ms: 0,
        argon2_memory_kib: 256,
        argon2_iterations: 1,
        argon2_parallelism: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> PinVerifier {
        PinVerifier::new(&fast_security()).unwrap()
    }

    #[test]
    fn pin_format() {
        for ok in ["1234", "12345", "123456"] {
            assert!(validate_pin_format(ok).is_ok(), "{ok}");
        }
        for bad in ["123", "1234567", "12a4", "", "١٢٣٤", " 1234"] {
            assert_eq!(validate_pin_format(bad), Err(ValidationError::PinFormat), "{bad}");
        }
    }

    #[test]
    fn classify_safe_danger_invalid() {
        let v = verifier();
        let hashes = v.hash_pair("1234", "4321").unwrap();
        assert_eq!(v.classify("1234", Some(&hashes)).unwrap(), PinClass::Safe);
        assert_eq!(v.classify("4321", Some(&hashes)).unwrap(), PinClass::Danger);
        assert_eq!(v.classify("9999", Some(&hashes)).unwrap(), PinClass::Invalid);
    }

    #[test]
    fn classify_without_pins_is_invalid() {
        let v = verifier();
        assert_eq!(v.classify("000000", None).unwrap(), PinClass::Invalid);
    }

    #[test]
    fn malformed_pin_short_circuits() {
        let v = verifier();
        let hashes = v.hash_pair("1234", "4321").unwrap();
        assert!(matches!(
            v.classify("12", Some(&hashes)),
            Err(CoreError::Validation(ValidationError::PinFormat))
        ));
    }

    #[test]
    fn identical_pins_rejected() {
        assert!(matches!(
            verifier().hash_pair("5555", "5555"),
            Err(CoreError::Validation(ValidationError::PinsIdentical))
        ));
    }

    #[test]
    fn hashes_are_salted_phc_strings() {
        let v = verifier();
        let a = v.hash("1234").unwrap();
        let b = v.hash("1234").unwrap();
        assert!(a.starts_with("$argon2id$"));
        assert_ne!(a, b);
    }

    #[test]
    fn debug_does_not_leak_hashes() {
        let v = verifier();
        let hashes = v.hash_pair("1234", "4321").unwrap();
        assert_eq!(format!("{hashes:?}"), "PinHashes(..)");
    }
}
