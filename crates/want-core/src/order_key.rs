//! Fractional order keys (spec §4.B): lexicographically sortable strings
//! that permit inserting an infinite number of new keys between any two
//! existing ones, the way a CRDT list assigns fractional indices.

use crate::error::{EngineError, Result};

const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

fn index_of(c: u8) -> Option<usize> {
    ALPHABET.iter().position(|&a| a == c)
}

fn char_at(i: usize) -> u8 {
    ALPHABET[i]
}

const MIN_CHAR: u8 = ALPHABET[0];
const MAX_CHAR_INDEX: usize = ALPHABET.len() - 1;

/// Validate that every character in `key` belongs to the order-key alphabet.
pub fn validate(key: &str) -> Result<()> {
    for c in key.bytes() {
        if index_of(c).is_none() {
            return Err(EngineError::InvalidOrderKey(format!(
                "character '{}' not in order-key alphabet",
                c as char
            )));
        }
    }
    Ok(())
}

/// The first order key ever assigned.
pub fn first() -> String {
    "a0".to_string()
}

/// The next key strictly after `k`: scan from the right, increment the
/// first character below max, reset all trailing characters to '0'; if
/// every character is already at max, append a '0'.
pub fn after(k: &str) -> String {
    let mut bytes: Vec<u8> = k.bytes().collect();
    for i in (0..bytes.len()).rev() {
        let idx = index_of(bytes[i]).expect("validated alphabet");
        if idx < MAX_CHAR_INDEX {
            bytes[i] = char_at(idx + 1);
            for b in bytes.iter_mut().skip(i + 1) {
                *b = MIN_CHAR;
            }
            return String::from_utf8(bytes).unwrap();
        }
    }
    // every character at max: grow the key
    let mut grown = String::from_utf8(bytes).unwrap();
    grown.push(MIN_CHAR as char);
    grown
}

/// The key strictly before `k`: symmetric with `after`, decrementing the
/// first non-minimum character from the right and resetting trailing
/// characters to max. Panics at the absolute minimum single-character key,
/// matching the source's documented behavior — there is no key before it.
pub fn before(k: &str) -> String {
    let mut bytes: Vec<u8> = k.bytes().collect();
    for i in (0..bytes.len()).rev() {
        let idx = index_of(bytes[i]).expect("validated alphabet");
        if idx > 0 {
            bytes[i] = char_at(idx - 1);
            for b in bytes.iter_mut().skip(i + 1) {
                *b = char_at(MAX_CHAR_INDEX);
            }
            return String::from_utf8(bytes).unwrap();
        }
    }
    if bytes.len() == 1 {
        panic!("order_key::before called on the absolute minimum key");
    }
    bytes.pop();
    String::from_utf8(bytes).unwrap()
}

/// A key strictly between `a` and `b` (`a < b` lexicographically), or the
/// first key if both are empty.
pub fn between(a: &str, b: &str) -> String {
    if a.is_empty() && b.is_empty() {
        return first();
    }
    if a.is_empty() {
        return before(b);
    }
    if b.is_empty() {
        return after(a);
    }

    let a_bytes: Vec<u8> = a.bytes().collect();
    let b_bytes: Vec<u8> = b.bytes().collect();
    let max_len = a_bytes.len().max(b_bytes.len());

    for i in 0..max_len {
        let ca = a_bytes.get(i).copied();
        let cb = b_bytes.get(i).copied();
        match (ca, cb) {
            (Some(ca), Some(cb)) if ca != cb => {
                let ia = index_of(ca).expect("validated alphabet");
                let ib = index_of(cb).expect("validated alphabet");
                if ib > ia + 1 {
                    // gap: take the midpoint character at this position
                    let mid = ia + (ib - ia) / 2;
                    let mut prefix = a_bytes[..i].to_vec();
                    prefix.push(char_at(mid));
                    return String::from_utf8(prefix).unwrap();
                }
                // adjacent: descend one position past `a` and insert a
                // mid-alphabet character
                let mut prefix = a_bytes[..=i].to_vec();
                prefix.push(char_at(ALPHABET.len() / 2));
                return String::from_utf8(prefix).unwrap();
            }
            (Some(_), None) => {
                // a is longer and b is its prefix: this shouldn't happen
                // for a valid a < b pair with equal shared prefix; treat as
                // a has extra trailing chars below mid, descend from a
                let mut prefix = a_bytes.clone();
                prefix.push(char_at(ALPHABET.len() / 2));
                return String::from_utf8(prefix).unwrap();
            }
            (None, Some(_)) => {
                // a is a strict prefix of b: append a midpoint character
                let mut prefix = a_bytes.clone();
                prefix.push(char_at(ALPHABET.len() / 2));
                return String::from_utf8(prefix).unwrap();
            }
            _ => continue,
        }
    }

    // a == b (shouldn't happen for well-formed input): fall back to after
    after(a)
}

/// Append new order keys after the last existing one, one per new item.
pub fn assign_order_keys(existing_last: Option<&str>, count: usize) -> Vec<String> {
    let mut keys = Vec::with_capacity(count);
    let mut last = existing_last.map(|s| s.to_string());
    for _ in 0..count {
        let next = match &last {
            Some(k) => after(k),
            None => first(),
        };
        last = Some(next.clone());
        keys.push(next);
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_key_is_a0() {
        assert_eq!(first(), "a0");
    }

    #[test]
    fn after_carries_over() {
        assert_eq!(after("az"), "b0");
    }

    #[test]
    fn between_with_gap_takes_midpoint() {
        assert_eq!(between("a0", "a2"), "a1");
    }

    #[test]
    fn between_adjacent_descends_one_position() {
        let mid = between("a0", "a1");
        assert!(mid.as_str() > "a0" && mid.as_str() < "a1");
    }

    #[test]
    fn between_empty_sides() {
        assert_eq!(between("", ""), first());
        let before_b = between("", "b0");
        assert!(before_b.as_str() < "b0");
        let after_a = between("a0", "");
        assert!(after_a.as_str() > "a0");
    }

    #[test]
    fn after_then_before_round_trips() {
        let k = "m5".to_string();
        assert_eq!(before(&after(&k)), k);
    }

    #[test]
    fn before_then_after_round_trips() {
        let k = "m5".to_string();
        assert_eq!(after(&before(&k)), k);
    }

    #[test]
    #[should_panic]
    fn before_at_absolute_minimum_panics() {
        before("0");
    }

    #[test]
    fn ordering_property_holds_for_sequence() {
        let mut k = first();
        let mut prev = k.clone();
        for _ in 0..500 {
            k = after(&k);
            assert!(k.as_str() > prev.as_str());
            prev = k.clone();
        }
    }

    #[test]
    fn validate_rejects_out_of_alphabet() {
        assert!(validate("a0!").is_err());
        assert!(validate("a0").is_ok());
    }

    #[test]
    fn assign_order_keys_appends_after_last() {
        let keys = assign_order_keys(Some("a0"), 3);
        assert_eq!(keys.len(), 3);
        assert!(keys[0].as_str() > "a0");
        assert!(keys[1].as_str() > keys[0].as_str());
        assert!(keys[2].as_str() > keys[1].as_str());
    }
}
