//! Initial-password generation for newly created accounts.

use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use rand::Rng;

// Confusable characters (l, I, O, 0, 1) are left out of every class.
const LOWER: &[u8] = b"abcdefghijkmnopqrstuvwxyz";
const UPPER: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";
const DIGITS: &[u8] = b"23456789";
const SYMBOLS: &[u8] = b"!@#$%^&*-_=+";

/// Generates a random password of `len` characters (floor of 8) containing
/// at least one lowercase letter, uppercase letter, digit and symbol. The
/// caller sees the value exactly once; it is never stored or re-derivable.
pub fn generate_password(len: usize) -> String {
    let len = len.max(8);
    let mut rng = OsRng;
    let mut chars: Vec<u8> = Vec::with_capacity(len);
    for class in [LOWER, UPPER, DIGITS, SYMBOLS] {
        chars.push(class[rng.gen_range(0..class.len())]);
    }
    let pool: Vec<u8> = [LOWER, UPPER, DIGITS, SYMBOLS].concat();
    while chars.len() < len {
        chars.push(pool[rng.gen_range(0..pool.len())]);
    }
    chars.shuffle(&mut rng);
    chars.into_iter().map(char::from).collect()
}

/// True when `s` satisfies the complexity rule the generator guarantees.
pub fn meets_complexity(s: &str) -> bool {
    s.len() >= 8
        && s.bytes().any(|b| LOWER.contains(&b))
        && s.bytes().any(|b| UPPER.contains(&b))
        && s.bytes().any(|b| DIGITS.contains(&b))
        && s.bytes().any(|b| SYMBOLS.contains(&b))
}
