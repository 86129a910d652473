use thiserror::Error;

/// Half-hour grid: 48 slots per calendar date, index 0 = 00:00-00:30.
pub const SLOTS_PER_DAY: u16 = 48;

const SLOT_DELIMITER: char = '-';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid slot token: {token}")]
pub struct SlotParseError {
    pub token: String,
}

/// Canonical compact form of a slot set: ascending, deduplicated, joined
/// with '-'. The empty set encodes to the empty string.
pub fn encode_slots(slots: &[u16]) -> String {
    let normalized = normalize(slots.to_vec());
    let parts: Vec<String> = normalized.iter().map(|slot| slot.to_string()).collect();
    parts.join("-")
}

/// Decode the compact form back into a sorted, deduplicated slot set.
///
/// An empty or whitespace-only string is the explicit empty set, not an
/// error. Any token that is not a non-negative integer fails the whole
/// decode; nothing is silently skipped.
pub fn decode_slots(encoded: &str) -> Result<Vec<u16>, SlotParseError> {
    let trimmed = encoded.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let mut slots = Vec::new();
    for token in trimmed.split(SLOT_DELIMITER) {
        let slot = token.parse::<u16>().map_err(|_| SlotParseError {
            token: token.to_string(),
        })?;
        slots.push(slot);
    }

    Ok(normalize(slots))
}

fn normalize(mut slots: Vec<u16>) -> Vec<u16> {
    slots.sort_unstable();
    slots.dedup();
    slots
}

/// Serde adapter keeping the slot set in its compact string form on the
/// wire and in storage.
pub mod slot_string {
    use serde::{de, Deserialize, Deserializer, Serializer};

    use super::{decode_slots, encode_slots};

    pub fn serialize<S>(slots: &[u16], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&encode_slots(slots))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u16>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        decode_slots(&encoded).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_sorted_and_deduplicated() {
        assert_eq!(encode_slots(&[29, 28, 29, 30]), "28-29-30");
    }

    #[test]
    fn encodes_empty_set_to_empty_string() {
        assert_eq!(encode_slots(&[]), "");
    }

    #[test]
    fn decodes_compact_form() {
        assert_eq!(decode_slots("28-29-30").unwrap(), vec![28, 29, 30]);
    }

    #[test]
    fn decodes_single_slot() {
        assert_eq!(decode_slots("5").unwrap(), vec![5]);
    }

    #[test]
    fn decode_sorts_and_deduplicates() {
        assert_eq!(decode_slots("30-28-28-29").unwrap(), vec![28, 29, 30]);
    }

    #[test]
    fn empty_string_is_the_empty_set() {
        assert_eq!(decode_slots("").unwrap(), Vec::<u16>::new());
        assert_eq!(decode_slots("   ").unwrap(), Vec::<u16>::new());
    }

    #[test]
    fn rejects_non_numeric_token() {
        let err = decode_slots("12-ab-14").unwrap_err();
        assert_eq!(err.token, "ab");
    }

    #[test]
    fn rejects_dangling_delimiter() {
        assert!(decode_slots("12-").is_err());
        assert!(decode_slots("-12").is_err());
        assert!(decode_slots("5--7").is_err());
    }

    #[test]
    fn rejects_negative_numbers() {
        // "-3" splits into an empty token and "3"
        assert!(decode_slots("-3").is_err());
    }

    #[test]
    fn round_trips_any_finite_set() {
        let sets: Vec<Vec<u16>> = vec![
            vec![],
            vec![0],
            vec![47],
            vec![3, 1, 2],
            vec![9, 9, 9],
            vec![0, 47, 23, 24],
        ];

        for set in sets {
            let mut expected = set.clone();
            expected.sort_unstable();
            expected.dedup();
            assert_eq!(decode_slots(&encode_slots(&set)).unwrap(), expected);
        }
    }
}
