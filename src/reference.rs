//! Random call/delete reference generation.
//!
//! References are drawn uniformly from [`REFERENCE_ALPHABET`] using the
//! operating system's secure random source. If that source fails the
//! generator degrades to a seeded non-secure RNG and logs a warning every
//! time it does so.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use ring::rand::{SecureRandom, SystemRandom};

/// Symbols used for call and delete references.
pub const REFERENCE_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvxyzABCDEFGHIJKLMNOPQRSTUVXYZ1234567890";

/// Default length of the public call reference.
pub const DEFAULT_CALL_REFERENCE_LENGTH: usize = 6;

/// Default length of the secret delete reference.
pub const DEFAULT_DELETE_REFERENCE_LENGTH: usize = 16;

/// A source of random bytes that may fail.
pub trait EntropySource: Send + Sync {
    fn fill(&self, dest: &mut [u8]) -> Result<(), EntropyUnavailable>;
}

#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("secure random source unavailable")]
pub struct EntropyUnavailable;

impl EntropySource for SystemRandom {
    fn fill(&self, dest: &mut [u8]) -> Result<(), EntropyUnavailable> {
        SecureRandom::fill(self, dest).map_err(|_| EntropyUnavailable)
    }
}

/// Generates fixed-length references and retries on collision.
pub struct ReferenceGenerator {
    source: Box<dyn EntropySource>,
    fallback: Mutex<Option<SmallRng>>,
}

impl Default for ReferenceGenerator {
    fn default() -> Self {
        Self::new(Box::new(SystemRandom::new()))
    }
}

impl ReferenceGenerator {
    pub fn new(source: Box<dyn EntropySource>) -> Self {
        Self {
            source,
            fallback: Mutex::new(None),
        }
    }

    /// Draw `length` symbols uniformly from [`REFERENCE_ALPHABET`].
    pub fn generate(&self, length: usize) -> String {
        let mut out = String::with_capacity(length);
        let mut buf = [0u8; 32];
        while out.len() < length {
            self.fill_bytes(&mut buf);
            for &b in &buf {
                if let Some(symbol) = symbol_for(b) {
                    out.push(symbol);
                    if out.len() == length {
                        break;
                    }
                }
            }
        }
        out
    }

    /// Generate references until `in_use` reports a candidate is free.
    ///
    /// Collisions are retried transparently; only errors from `in_use` are
    /// returned to the caller.
    pub fn generate_unique<E>(
        &self,
        length: usize,
        mut in_use: impl FnMut(&str) -> Result<bool, E>,
    ) -> Result<String, E> {
        loop {
            let candidate = self.generate(length);
            if !in_use(&candidate)? {
                return Ok(candidate);
            }
            tracing::debug!(length, "reference collision, regenerating");
        }
    }

    /// Fill `dest` with random bytes, degrading to the fallback RNG if needed.
    pub fn fill_bytes(&self, dest: &mut [u8]) {
        if let Err(e) = self.source.fill(dest) {
            tracing::warn!(
                error = %e,
                "secure random source failed, falling back to insecure RNG; \
                 generated references are weaker than intended"
            );
            let mut guard = self.fallback.lock().unwrap_or_else(|p| p.into_inner());
            guard.get_or_insert_with(seed_fallback).fill(dest);
        }
    }
}

/// Map a random byte to a symbol, rejecting bytes that would bias the draw.
fn symbol_for(b: u8) -> Option<char> {
    let n = REFERENCE_ALPHABET.len();
    let limit = 256 - (256 % n);
    if (b as usize) < limit {
        Some(REFERENCE_ALPHABET[b as usize % n] as char)
    } else {
        None
    }
}

fn seed_fallback() -> SmallRng {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    SmallRng::seed_from_u64(nanos ^ u64::from(std::process::id()).rotate_left(32))
}

/// Whether `value` has the given length and only uses reference symbols.
pub fn is_valid_reference(value: &str, length: usize) -> bool {
    value.len() == length && value.bytes().all(|b| REFERENCE_ALPHABET.contains(&b))
}
