// SPDX-License-Identifier: Apache-2.0

//! HyperLogLog distinct-count estimator.

use crate::error::Error;
use xxhash_rust::xxh3::xxh3_64;

/// HyperLogLog sketch with `2^precision` one-byte registers.
///
/// Standard bias-corrected estimator with linear counting for the small
/// range and the 64-bit large-range correction. Relative error is roughly
/// `1.04 / sqrt(2^precision)`.
#[derive(Debug, Clone)]
pub struct HyperLogLog {
    precision: u8,
    registers: Vec<u8>,
}

impl HyperLogLog {
    /// Creates a sketch with the given precision.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PrecisionOutOfRange`] for precision outside `[4, 16]`.
    pub fn new(precision: u8) -> Result<Self, Error> {
        if !(4..=16).contains(&precision) {
            return Err(Error::PrecisionOutOfRange { precision });
        }
        Ok(Self {
            precision,
            registers: vec![0; 1 << precision],
        })
    }

    /// The configured precision.
    #[must_use]
    pub fn precision(&self) -> u8 {
        self.precision
    }

    /// Adds a pre-hashed 64-bit key.
    pub fn add_hash(&mut self, hash: u64) {
        let idx = (hash >> (64 - self.precision)) as usize;
        let remaining = hash << self.precision;
        // Rank = leading zeros of the remaining bits + 1, capped so that an
        // all-zero remainder still yields a valid register value.
        let rank = if remaining == 0 {
            64 - self.precision + 1
        } else {
            remaining.leading_zeros() as u8 + 1
        };
        if rank > self.registers[idx] {
            self.registers[idx] = rank;
        }
    }

    /// Hashes raw bytes with xxh3 and adds them.
    pub fn add_bytes(&mut self, bytes: &[u8]) {
        self.add_hash(xxh3_64(bytes));
    }

    /// Estimated number of distinct keys added so far.
    #[must_use]
    pub fn count(&self) -> f64 {
        let m = self.registers.len() as f64;
        let mut sum = 0.0;
        let mut zeros = 0usize;
        for &r in &self.registers {
            sum += 1.0 / f64::from(1u32 << u32::from(r.min(31)));
            if r == 0 {
                zeros += 1;
            }
        }
        let alpha = match self.registers.len() {
            16 => 0.673,
            32 => 0.697,
            64 => 0.709,
            n => 0.7213 / (1.0 + 1.079 / n as f64),
        };
        let raw = alpha * m * m / sum;

        if raw <= 2.5 * m && zeros > 0 {
            // Small-range correction: linear counting.
            return m * (m / zeros as f64).ln();
        }
        let two_pow_64 = 2f64.powi(64);
        if raw > two_pow_64 / 30.0 {
            // Large-range correction for 64-bit hashes.
            return -two_pow_64 * (1.0 - raw / two_pow_64).ln();
        }
        raw
    }

    /// Merges another sketch of the same precision into this one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PrecisionMismatch`] when precisions differ.
    pub fn merge(&mut self, other: &HyperLogLog) -> Result<(), Error> {
        if self.precision != other.precision {
            return Err(Error::PrecisionMismatch {
                left: self.precision,
                right: other.precision,
            });
        }
        for (mine, theirs) in self.registers.iter_mut().zip(&other.registers) {
            if *theirs > *mine {
                *mine = *theirs;
            }
        }
        Ok(())
    }

    /// Approximate heap footprint of the register array.
    #[must_use]
    pub fn memory_bytes(&self) -> usize {
        self.registers.len()
    }
}
