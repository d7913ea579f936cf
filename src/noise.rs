//! Deterministic text corruption (noise injection)
//!
//! Produces reproducible spelling noise so that every downstream statistic can
//! be regenerated bit-for-bit from `(text, noise_level, seed)`.
//!
//! # Draw order
//!
//! All randomness comes from one [`SplitMix64`] stream seeded with `seed`.
//! Draws happen in this order, and only in this order:
//!
//! 1. The text is split into alternating whitespace / non-whitespace runs.
//!    Whitespace runs are copied verbatim.
//! 2. A token is *eligible* when it has at least 2 codepoints and contains at
//!    least one alphanumeric codepoint. Ineligible tokens consume no draws.
//! 3. For each eligible token: `u = unit()`; the token is corrupted iff
//!    `u < noise_level / 100`.
//! 4. For a corrupted token: `op = below(4)`, then the operator's own draws:
//!    - `0` transposition: candidates are positions `i` with `c[i] != c[i+1]`;
//!      `i = candidates[below(candidates.len())]`; swap `c[i]`, `c[i+1]`
//!    - `1` deletion: `i = below(len)`; remove `c[i]`
//!    - `2` substitution: candidates are positions with a keyboard neighbour;
//!      `i = candidates[below(candidates.len())]`, then
//!      `c[i] = neighbours[below(neighbours.len())]` (case preserved)
//!    - `3` duplication: `i = below(len)`; insert a copy of `c[i]` after it
//!
//!    Transposition or substitution with no candidate falls back to
//!    duplication, including its `below(len)` draw.
//!
//! `unit() = (next_u64() >> 11) * 2^-53` and `below(n) = next_u64() % n`.

use crate::error::InputError;
use rand::{Error as RandError, RngCore, SeedableRng};
use tracing::debug;

/// SplitMix64 generator (Steele, Lea & Flood 2014)
///
/// Chosen for its trivially portable definition: the corruption stream can be
/// regenerated in any language from the constants below.
#[derive(Debug, Clone)]
pub struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Uniform draw in `[0, 1)` with 53 bits of precision
    pub fn unit(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Draw in `[0, n)`; `n` must be non-zero
    pub fn below(&mut self, n: usize) -> usize {
        debug_assert!(n > 0);
        (self.next_u64() % n as u64) as usize
    }
}

impl RngCore for SplitMix64 {
    fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(8) {
            let bytes = self.next_u64().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), RandError> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl SeedableRng for SplitMix64 {
    type Seed = [u8; 8];

    fn from_seed(seed: Self::Seed) -> Self {
        Self::new(u64::from_le_bytes(seed))
    }

    fn seed_from_u64(state: u64) -> Self {
        Self::new(state)
    }
}

/// Corruption operator applied to an eligible word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptionOp {
    Transpose,
    Delete,
    Substitute,
    Duplicate,
}

impl CorruptionOp {
    fn from_draw(draw: usize) -> Self {
        match draw {
            0 => CorruptionOp::Transpose,
            1 => CorruptionOp::Delete,
            2 => CorruptionOp::Substitute,
            _ => CorruptionOp::Duplicate,
        }
    }
}

/// QWERTY and number-row neighbours of a lowercase character
fn keyboard_neighbours(c: char) -> Option<&'static str> {
    let neighbours = match c {
        'q' => "wa",
        'w' => "qeas",
        'e' => "wrd",
        'r' => "etf",
        't' => "ryg",
        'y' => "tuh",
        'u' => "yij",
        'i' => "uok",
        'o' => "ipl",
        'p' => "ol",
        'a' => "qwsz",
        's' => "awedxz",
        'd' => "serfcx",
        'f' => "drtgvc",
        'g' => "ftyhbv",
        'h' => "gyujnb",
        'j' => "huikmn",
        'k' => "jiolm",
        'l' => "kop",
        'z' => "asx",
        'x' => "zsdc",
        'c' => "xdfv",
        'v' => "cfgb",
        'b' => "vghn",
        'n' => "bhjm",
        'm' => "njk",
        '1' => "2",
        '2' => "13",
        '3' => "24",
        '4' => "35",
        '5' => "46",
        '6' => "57",
        '7' => "68",
        '8' => "79",
        '9' => "80",
        '0' => "9",
        _ => return None,
    };
    Some(neighbours)
}

fn neighbours_of(c: char) -> Option<&'static str> {
    if c.is_ascii_uppercase() {
        keyboard_neighbours(c.to_ascii_lowercase())
    } else {
        keyboard_neighbours(c)
    }
}

/// Seedable spelling-noise generator
#[derive(Debug, Clone, Default)]
pub struct NoiseInjector;

impl NoiseInjector {
    pub fn new() -> Self {
        Self
    }

    /// Corrupt `text` at `noise_level` percent of eligible words
    ///
    /// # Example
    /// ```
    /// use semdrift::noise::NoiseInjector;
    ///
    /// let injector = NoiseInjector::new();
    /// let text = "the quick brown fox";
    /// assert_eq!(injector.inject(text, 0, 42).unwrap(), text);
    /// assert_ne!(injector.inject(text, 100, 42).unwrap(), text);
    /// ```
    pub fn inject(&self, text: &str, noise_level: i64, seed: u64) -> Result<String, InputError> {
        if !(0..=100).contains(&noise_level) {
            return Err(InputError::InvalidNoiseLevel { level: noise_level });
        }
        if text.is_empty() {
            return Err(InputError::EmptyText);
        }
        if noise_level == 0 {
            return Ok(text.to_string());
        }

        let probability = noise_level as f64 / 100.0;
        let mut rng = SplitMix64::new(seed);
        let mut output = String::with_capacity(text.len() + text.len() / 8);
        let mut corrupted = 0usize;

        for token in split_runs(text) {
            if !is_eligible(token) {
                output.push_str(token);
                continue;
            }
            if rng.unit() >= probability {
                output.push_str(token);
                continue;
            }
            let mut chars: Vec<char> = token.chars().collect();
            corrupt_word(&mut chars, &mut rng);
            output.extend(chars);
            corrupted += 1;
        }

        debug!(noise_level, seed, corrupted, "noise injected");
        Ok(output)
    }
}

/// Split into alternating whitespace and non-whitespace runs
fn split_runs(text: &str) -> Vec<&str> {
    let mut runs = Vec::new();
    let mut start = 0;
    let mut in_space: Option<bool> = None;

    for (idx, c) in text.char_indices() {
        let space = c.is_whitespace();
        match in_space {
            Some(prev) if prev != space => {
                runs.push(&text[start..idx]);
                start = idx;
            }
            _ => {}
        }
        in_space = Some(space);
    }
    if start < text.len() {
        runs.push(&text[start..]);
    }
    runs
}

fn is_eligible(token: &str) -> bool {
    let mut count = 0;
    let mut alnum = false;
    for c in token.chars() {
        if c.is_whitespace() {
            return false;
        }
        count += 1;
        alnum |= c.is_alphanumeric();
    }
    count >= 2 && alnum
}

fn corrupt_word(chars: &mut Vec<char>, rng: &mut SplitMix64) {
    match CorruptionOp::from_draw(rng.below(4)) {
        CorruptionOp::Transpose => {
            let candidates: Vec<usize> = (0..chars.len() - 1)
                .filter(|&i| chars[i] != chars[i + 1])
                .collect();
            if candidates.is_empty() {
                duplicate(chars, rng);
            } else {
                let i = candidates[rng.below(candidates.len())];
                chars.swap(i, i + 1);
            }
        }
        CorruptionOp::Delete => {
            let i = rng.below(chars.len());
            chars.remove(i);
        }
        CorruptionOp::Substitute => {
            let candidates: Vec<usize> = (0..chars.len())
                .filter(|&i| neighbours_of(chars[i]).is_some())
                .collect();
            if candidates.is_empty() {
                duplicate(chars, rng);
                return;
            }
            let i = candidates[rng.below(candidates.len())];
            let original = chars[i];
            if let Some(neighbours) = neighbours_of(original) {
                let options: Vec<char> = neighbours.chars().collect();
                let replacement = options[rng.below(options.len())];
                chars[i] = if original.is_ascii_uppercase() {
                    replacement.to_ascii_uppercase()
                } else {
                    replacement
                };
            }
        }
        CorruptionOp::Duplicate => duplicate(chars, rng),
    }
}

fn duplicate(chars: &mut Vec<char>, rng: &mut SplitMix64) {
    let i = rng.below(chars.len());
    chars.insert(i + 1, chars[i]);
}
