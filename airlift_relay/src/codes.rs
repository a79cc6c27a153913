//! Share code registry
//!
//! Mints the six-digit codes senders hand to receivers out of band. Codes
//! are drawn uniformly from the full decimal range and retried on
//! collision; a bounded retry count turns a saturated code space into a
//! clean error instead of an unbounded loop.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use rand::Rng;

use crate::error::{RelayError, Result};
use crate::SessionId;

/// Inclusive bounds of the code space.
const CODE_MIN: u32 = 100_000;
const CODE_MAX: u32 = 999_999;

/// Collision retries before giving up on an allocation.
const MAX_ALLOC_ATTEMPTS: u32 = 100;

pub struct CodeRegistry {
    codes: HashMap<String, SessionId>,
    min: u32,
    max: u32,
    max_attempts: u32,
}

impl Default for CodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeRegistry {
    pub fn new() -> Self {
        Self::with_space(CODE_MIN, CODE_MAX, MAX_ALLOC_ATTEMPTS)
    }

    /// Registry over a custom code space. Tests shrink the space to force
    /// collisions and exhaustion.
    pub fn with_space(min: u32, max: u32, max_attempts: u32) -> Self {
        Self {
            codes: HashMap::new(),
            min,
            max,
            max_attempts,
        }
    }

    /// Mint a fresh code owned by `owner`.
    pub fn allocate(&mut self, owner: SessionId) -> Result<String> {
        let mut rng = rand::rng();
        for _ in 0..self.max_attempts {
            let candidate = rng.random_range(self.min..=self.max).to_string();
            if let Entry::Vacant(slot) = self.codes.entry(candidate.clone()) {
                slot.insert(owner);
                return Ok(candidate);
            }
        }
        Err(RelayError::CodesExhausted)
    }

    /// Resolve a code to the session that owns it.
    pub fn lookup(&self, code: &str) -> Result<SessionId> {
        self.codes
            .get(code)
            .copied()
            .ok_or_else(|| RelayError::CodeNotFound(code.to_string()))
    }

    /// Remove a code. The caller is responsible for only releasing codes
    /// it knows to exist; a double release is an error.
    pub fn release(&mut self, code: &str) -> Result<()> {
        self.codes
            .remove(code)
            .map(|_| ())
            .ok_or_else(|| RelayError::CodeNotFound(code.to_string()))
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocated_codes_are_six_digits_and_resolvable() {
        let mut registry = CodeRegistry::new();
        for owner in 0..20 {
            let code = registry.allocate(owner).unwrap();
            assert_eq!(code.len(), 6);
            let n: u32 = code.parse().unwrap();
            assert!((CODE_MIN..=CODE_MAX).contains(&n));
            assert_eq!(registry.lookup(&code).unwrap(), owner);
        }
        assert_eq!(registry.len(), 20);
    }

    #[test]
    fn released_codes_stop_resolving() {
        let mut registry = CodeRegistry::new();
        let code = registry.allocate(1).unwrap();
        registry.release(&code).unwrap();
        assert_eq!(
            registry.lookup(&code),
            Err(RelayError::CodeNotFound(code.clone()))
        );
        assert_eq!(
            registry.release(&code),
            Err(RelayError::CodeNotFound(code))
        );
    }

    #[test]
    fn unknown_code_lookup_fails() {
        let registry = CodeRegistry::new();
        assert_eq!(
            registry.lookup("000000"),
            Err(RelayError::CodeNotFound("000000".to_string()))
        );
    }

    #[test]
    fn exhausted_space_reports_no_resources() {
        // Two possible codes; the third allocation cannot succeed.
        let mut registry = CodeRegistry::with_space(10, 11, 100);
        registry.allocate(1).unwrap();
        registry.allocate(1).unwrap();
        assert_eq!(registry.allocate(1), Err(RelayError::CodesExhausted));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn allocation_gives_up_after_the_attempt_budget() {
        // A single-code space: every retry collides once it is taken.
        let mut registry = CodeRegistry::with_space(10, 10, 5);
        registry.allocate(1).unwrap();
        assert_eq!(registry.allocate(2), Err(RelayError::CodesExhausted));
    }
}
