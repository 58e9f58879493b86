//! Seeded linear-congruential generator and the Fisher–Yates shuffle it drives.

use super::Seed;

const MULTIPLIER: u128 = 9301;
const INCREMENT: u128 = 49297;
const MODULUS: u128 = 233280;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lcg {
    state: u64,
}

impl Lcg {
    pub fn new(state: u64) -> Self {
        Self { state }
    }

    pub fn from_seed(seed: &Seed) -> Self {
        match seed {
            Seed::Number(n) => Self::new(*n),
            Seed::Text(text) => Self::new(hash_seed(text)),
        }
    }

    /// Next value in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        self.state = ((self.state as u128 * MULTIPLIER + INCREMENT) % MODULUS) as u64;
        self.state as f64 / MODULUS as f64
    }

    /// Uniform index in `0..bound`.
    pub fn index(&mut self, bound: usize) -> usize {
        (self.next_f64() * bound as f64).floor() as usize
    }

    pub fn advance(&mut self, steps: usize) {
        for _ in 0..steps {
            self.next_f64();
        }
    }
}

/// 32-bit rolling hash over UTF-16 code units (`h * 31 + unit`, wrapping),
/// returned as an absolute value.
pub fn hash_seed(text: &str) -> u64 {
    let hash = text.encode_utf16().fold(0i32, |hash, unit| {
        hash.wrapping_shl(5).wrapping_sub(hash).wrapping_add(unit as i32)
    });
    hash.unsigned_abs() as u64
}

/// In-place Fisher–Yates, walking from the last index down.
pub fn shuffle<T>(items: &mut [T], rng: &mut Lcg) {
    for i in (1..items.len()).rev() {
        let j = rng.index(i + 1);
        items.swap(i, j);
    }
}
