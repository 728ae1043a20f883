//! Random identifier generation.

const HEX_ALPHABET: [char; 16] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f',
];

/// Generates a random lowercase hex ID of the specified length, as used by trace and
/// transaction identifiers.
///
/// All-zero IDs are invalid in trace contexts and are never returned.
pub fn generate_hex_id(len: usize) -> String {
    loop {
        let id = nanoid::format(nanoid::rngs::default, &HEX_ALPHABET, len);
        if len == 0 || id.chars().any(|c| c != '0') {
            return id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_correct_length() {
        assert_eq!(generate_hex_id(16).len(), 16);
        assert_eq!(generate_hex_id(32).len(), 32);
    }

    #[test]
    fn contains_only_lowercase_hex() {
        let id = generate_hex_id(100);
        assert!(id.chars().all(|c| HEX_ALPHABET.contains(&c)));
    }

    #[test]
    fn consecutive_ids_differ() {
        assert_ne!(generate_hex_id(32), generate_hex_id(32));
    }
}
