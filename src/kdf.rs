//! Passphrase key derivation using scrypt
//!
//! The work factor travels in the container header as three single-byte
//! fields (`log_n`, `r`, `p`) so that decryption never needs out-of-band
//! configuration and the defaults can be raised without breaking old
//! containers.

use scrypt::{Params, scrypt};
use zeroize::Zeroizing;

use crate::error::{ErrorCategory, ErrorKind, Result, SealstreamError};

/// Length of derived key in bytes
pub const KEY_LEN: usize = 32;

/// Length of salt in bytes
pub const SALT_LEN: usize = 16;

/// Upper bound on scrypt memory (128 * r * N bytes) we agree to spend.
///
/// Headers are attacker-controlled, so this is checked before deriving.
pub const MAX_KDF_MEMORY: u64 = 1 << 30;

const MIN_LOG_N: u8 = 1;
const MAX_LOG_N: u8 = 22;
const MAX_R: u8 = 32;
const MAX_P: u8 = 16;

/// scrypt cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// log2 of the CPU/memory cost N
    pub log_n: u8,
    /// Block size
    pub r: u8,
    /// Parallelization
    pub p: u8,
}

impl Default for KdfParams {
    /// N = 32768, r = 8, p = 1.
    fn default() -> Self {
        Self {
            log_n: 15,
            r: 8,
            p: 1,
        }
    }
}

impl KdfParams {
    pub const fn new(log_n: u8, r: u8, p: u8) -> Self {
        Self { log_n, r, p }
    }

    /// Bytes of memory scrypt needs for these parameters.
    pub fn memory_cost(&self) -> u64 {
        (128 * u64::from(self.r)) << self.log_n
    }

    /// Checks that the parameters are within the range we accept on both the
    /// encrypting and the decrypting side.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !(MIN_LOG_N..=MAX_LOG_N).contains(&self.log_n) {
            return Err(format!(
                "scrypt log_n {} outside supported range {}..={}",
                self.log_n, MIN_LOG_N, MAX_LOG_N
            ));
        }
        if !(1..=MAX_R).contains(&self.r) {
            return Err(format!(
                "scrypt r {} outside supported range 1..={}",
                self.r, MAX_R
            ));
        }
        if !(1..=MAX_P).contains(&self.p) {
            return Err(format!(
                "scrypt p {} outside supported range 1..={}",
                self.p, MAX_P
            ));
        }
        if u32::from(self.log_n) >= 16 * u32::from(self.r) {
            return Err(format!(
                "scrypt log_n {} too large for r {}",
                self.log_n, self.r
            ));
        }
        if self.memory_cost() > MAX_KDF_MEMORY {
            return Err(format!(
                "scrypt parameters need {} bytes of memory (limit {})",
                self.memory_cost(),
                MAX_KDF_MEMORY
            ));
        }
        Ok(())
    }

    /// Header encoding: log_n, r, p, reserved zero byte.
    pub fn to_bytes(&self) -> [u8; 4] {
        [self.log_n, self.r, self.p, 0]
    }

    /// Inverse of [`KdfParams::to_bytes`]; range checks are left to
    /// [`KdfParams::validate`].
    pub fn from_bytes(bytes: [u8; 4]) -> std::result::Result<Self, String> {
        if bytes[3] != 0 {
            return Err(format!("reserved KDF byte is {:#04x}, expected 0", bytes[3]));
        }
        Ok(Self {
            log_n: bytes[0],
            r: bytes[1],
            p: bytes[2],
        })
    }
}

/// Derive a 32-byte key from a passphrase and salt using scrypt
///
/// The key is returned wrapped in `Zeroizing` so it is wiped when the
/// operation that owns it ends, on success and on error alike.
pub fn derive_key(
    passphrase: &[u8],
    salt: &[u8; SALT_LEN],
    params: &KdfParams,
) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    params.validate().map_err(|msg| {
        SealstreamError::with_kind(ErrorCategory::User, ErrorKind::InvalidArgument, msg)
    })?;

    let scrypt_params = Params::new(
        params.log_n,
        u32::from(params.r),
        u32::from(params.p),
        KEY_LEN,
    )
    .map_err(|e| {
        SealstreamError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::KeyDerivation,
            format!("failed to create scrypt params: {}", e),
        )
    })?;

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    scrypt(passphrase, salt, &scrypt_params, &mut key[..]).map_err(|e| {
        SealstreamError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::KeyDerivation,
            format!("scrypt key derivation failed: {}", e),
        )
    })?;

    Ok(key)
}
