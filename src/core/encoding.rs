// Generic binary object encoding
//
// One format for everything that leaves memory: persisted blocks, UTXO index
// records, and wire message payloads.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Encode a value with the node's binary object format.
pub fn encode<T: Serialize>(value: &T) -> Vec<u8> {
    bincode::serialize(value).expect("encoding an in-memory value cannot fail")
}

/// Decode a value from the node's binary object format.
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, String> {
    bincode::deserialize(data).map_err(|e| format!("Failed to decode object: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let value = (42u64, "hello".to_string(), vec![1u8, 2, 3]);
        let bytes = encode(&value);
        let decoded: (u64, String, Vec<u8>) = decode(&bytes).unwrap();
        assert_eq!(value, decoded);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result: Result<Vec<String>, String> = decode(&[0xff; 3]);
        assert!(result.is_err());
    }
}
