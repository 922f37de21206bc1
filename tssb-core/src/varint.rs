//! Bitcoin-style `CompactSize` varint, used to prefix sidechain content
//! with its total length.

/// Encode `len` as a `CompactSize` varint.
pub fn encode(len: u64) -> Vec<u8> {
    if len <= 252 {
        vec![len as u8]
    } else if len <= 0xffff {
        let mut v = vec![0xfd];
        v.extend_from_slice(&(len as u16).to_le_bytes());
        v
    } else if len <= 0xffff_ffff {
        let mut v = vec![0xfe];
        v.extend_from_slice(&(len as u32).to_le_bytes());
        v
    } else {
        let mut v = vec![0xff];
        v.extend_from_slice(&len.to_le_bytes());
        v
    }
}

/// Decode a `CompactSize` varint, returning `(value, bytes_consumed)`.
pub fn decode(buf: &[u8]) -> Option<(u64, usize)> {
    let head = *buf.first()?;
    match head {
        0..=252 => Some((head as u64, 1)),
        0xfd => Some((u16::from_le_bytes(buf.get(1..3)?.try_into().ok()?) as u64, 3)),
        0xfe => Some((u32::from_le_bytes(buf.get(1..5)?.try_into().ok()?) as u64, 5)),
        0xff => Some((u64::from_le_bytes(buf.get(1..9)?.try_into().ok()?), 9)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_across_size_classes() {
        for len in [0u64, 1, 252, 253, 65535, 65536, 5_000_000] {
            let enc = encode(len);
            let (decoded, consumed) = decode(&enc).unwrap();
            assert_eq!(decoded, len);
            assert_eq!(consumed, enc.len());
        }
    }
}
