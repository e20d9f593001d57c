//! On-disk object envelope: `NDB1 | version | type_tag | uvarint(len) |
//! payload | crc32(payload)`. The checksum covers the payload only; the id
//! of an object is the content hash of the bare payload, so re-encoding
//! never changes identity.

use crate::error::CoreError;
use crate::object::TypeTag;

const MAGIC: &[u8; 4] = b"NDB1";
const ENVELOPE_VERSION: u8 = 0x01;

fn encode_uvarint(mut value: u64, buf: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn decode_uvarint(data: &[u8], pos: &mut usize) -> Result<u64, CoreError> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    loop {
        if *pos >= data.len() {
            return Err(CoreError::Deserialization(
                "unexpected end of uvarint".into(),
            ));
        }
        let byte = data[*pos];
        *pos += 1;
        result |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift >= 64 {
            return Err(CoreError::Deserialization("uvarint overflow".into()));
        }
    }
    Ok(result)
}

pub fn envelope_encode(type_tag: TypeTag, payload: &[u8]) -> Result<Vec<u8>, CoreError> {
    let mut buf = Vec::with_capacity(payload.len() + 16);
    buf.extend_from_slice(MAGIC);
    buf.push(ENVELOPE_VERSION);
    buf.push(type_tag as u8);
    encode_uvarint(payload.len() as u64, &mut buf);
    buf.extend_from_slice(payload);
    let crc = crc32fast::hash(payload);
    buf.extend_from_slice(&crc.to_le_bytes());
    Ok(buf)
}

pub fn envelope_decode(data: &[u8]) -> Result<(TypeTag, Vec<u8>), CoreError> {
    if data.len() < 6 || &data[..4] != MAGIC {
        return Err(CoreError::InvalidMagic);
    }
    let version = data[4];
    if version != ENVELOPE_VERSION {
        return Err(CoreError::UnsupportedVersion(version));
    }
    let type_tag = TypeTag::from_u8(data[5]).ok_or(CoreError::UnknownTypeTag(data[5]))?;

    let mut pos = 6;
    let len = decode_uvarint(data, &mut pos)? as usize;
    // the length field is untrusted input; the end offset must not wrap
    let end = len
        .checked_add(pos)
        .and_then(|n| n.checked_add(4))
        .ok_or_else(|| CoreError::Deserialization("envelope length overflow".into()))?;
    if data.len() < end {
        return Err(CoreError::Deserialization("truncated envelope".into()));
    }
    let payload = &data[pos..pos + len];
    let expected = u32::from_le_bytes(data[pos + len..end].try_into().unwrap());
    let actual = crc32fast::hash(payload);
    if expected != actual {
        return Err(CoreError::Crc32Mismatch { expected, actual });
    }
    Ok((type_tag, payload.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let encoded = envelope_encode(TypeTag::Commit, b"some payload").unwrap();
        let (tag, payload) = envelope_decode(&encoded).unwrap();
        assert_eq!(tag, TypeTag::Commit);
        assert_eq!(payload, b"some payload");
    }

    #[test]
    fn corrupted_payload_fails_crc() {
        let mut encoded = envelope_encode(TypeTag::Blob, b"payload bytes").unwrap();
        let mid = encoded.len() - 8;
        encoded[mid] ^= 0xFF;
        assert!(matches!(
            envelope_decode(&encoded),
            Err(CoreError::Crc32Mismatch { .. })
        ));
    }

    #[test]
    fn bad_magic_rejected() {
        let mut encoded = envelope_encode(TypeTag::Blob, b"x").unwrap();
        encoded[0] = b'X';
        assert!(matches!(envelope_decode(&encoded), Err(CoreError::InvalidMagic)));
    }

    #[test]
    fn unknown_version_rejected() {
        let mut encoded = envelope_encode(TypeTag::Blob, b"x").unwrap();
        encoded[4] = 0x7F;
        assert!(matches!(
            envelope_decode(&encoded),
            Err(CoreError::UnsupportedVersion(0x7F))
        ));
    }

    #[test]
    fn absurd_length_field_rejected() {
        // header claiming a u64::MAX-byte payload must error, not wrap
        let mut encoded = Vec::new();
        encoded.extend_from_slice(MAGIC);
        encoded.push(ENVELOPE_VERSION);
        encoded.push(TypeTag::Blob as u8);
        encoded.extend_from_slice(&[0xFF; 9]);
        encoded.push(0x01);
        assert!(matches!(
            envelope_decode(&encoded),
            Err(CoreError::Deserialization(_))
        ));
    }

    #[test]
    fn unknown_type_tag_rejected() {
        let mut encoded = envelope_encode(TypeTag::Blob, b"x").unwrap();
        encoded[5] = 0x7F;
        assert!(matches!(
            envelope_decode(&encoded),
            Err(CoreError::UnknownTypeTag(0x7F))
        ));
    }
}
