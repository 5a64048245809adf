//! Fixed-width shareable sequence codec.
//!
//! A shareable sequence is a segment whose payload is a run of fixed-width
//! encoded scalars: one tag byte followed by eight little-endian payload
//! bytes per element. The element count is implied by the payload length.
//! Whether the sequence materializes as a list or a tuple is recorded in
//! the registry descriptor, not in the segment.

use crate::error::{RegionError, RegionResult};
use comet::value::Scalar;

/// Encoded width of one element: tag byte + 8 payload bytes.
pub const ELEMENT_WIDTH: usize = 9;

const TAG_INT: u8 = 0;
const TAG_FLOAT: u8 = 1;
const TAG_BOOL: u8 = 2;

/// Encoded byte length of a sequence with `count` elements.
pub fn encoded_len(count: usize) -> usize {
    count * ELEMENT_WIDTH
}

/// Encode scalars into the fixed-width wire form.
pub fn encode_sequence(items: &[Scalar]) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len(items.len()));
    for item in items {
        match item {
            Scalar::Int(v) => {
                out.push(TAG_INT);
                out.extend_from_slice(&v.to_le_bytes());
            }
            Scalar::Float(v) => {
                out.push(TAG_FLOAT);
                out.extend_from_slice(&v.to_le_bytes());
            }
            Scalar::Bool(v) => {
                out.push(TAG_BOOL);
                out.extend_from_slice(&(u64::from(*v)).to_le_bytes());
            }
        }
    }
    out
}

/// Decode a fixed-width payload back into scalars.
pub fn decode_sequence(bytes: &[u8]) -> RegionResult<Vec<Scalar>> {
    if bytes.len() % ELEMENT_WIDTH != 0 {
        return Err(RegionError::Protocol {
            detail: format!("sequence payload length {} not element-aligned", bytes.len()),
        });
    }

    let mut items = Vec::with_capacity(bytes.len() / ELEMENT_WIDTH);
    for chunk in bytes.chunks_exact(ELEMENT_WIDTH) {
        let raw: [u8; 8] = chunk[1..].try_into().expect("chunk width");
        let item = match chunk[0] {
            TAG_INT => Scalar::Int(i64::from_le_bytes(raw)),
            TAG_FLOAT => Scalar::Float(f64::from_le_bytes(raw)),
            TAG_BOOL => Scalar::Bool(u64::from_le_bytes(raw) != 0),
            tag => {
                return Err(RegionError::Protocol {
                    detail: format!("unknown sequence element tag {tag}"),
                });
            }
        };
        items.push(item);
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_all_variants() {
        let items = vec![
            Scalar::Int(-42),
            Scalar::Int(i64::MAX),
            Scalar::Float(3.5),
            Scalar::Float(f64::MIN_POSITIVE),
            Scalar::Bool(true),
            Scalar::Bool(false),
        ];
        let encoded = encode_sequence(&items);
        assert_eq!(encoded.len(), encoded_len(items.len()));
        assert_eq!(decode_sequence(&encoded).unwrap(), items);
    }

    #[test]
    fn empty_sequence() {
        assert!(encode_sequence(&[]).is_empty());
        assert!(decode_sequence(&[]).unwrap().is_empty());
    }

    #[test]
    fn truncated_payload_rejected() {
        let encoded = encode_sequence(&[Scalar::Int(1), Scalar::Int(2)]);
        assert!(matches!(
            decode_sequence(&encoded[..encoded.len() - 1]),
            Err(RegionError::Protocol { .. })
        ));
    }

    #[test]
    fn unknown_tag_rejected() {
        let mut encoded = encode_sequence(&[Scalar::Int(1)]);
        encoded[0] = 9;
        assert!(matches!(
            decode_sequence(&encoded),
            Err(RegionError::Protocol { .. })
        ));
    }
}
