//! Sidechain (`chain20`) encoding: carries payload longer than 48 bytes as
//! a 48-byte head plus a linked chain of 120-byte blobs.

use crate::integrity::sha256_prefix;
use crate::varint;

pub const BLOB_LEN: usize = 120;
const SEGMENT_LEN: usize = 100;
const HEAD_LEN: usize = 28;

/// A single sidechain link: 100 bytes of content plus the pointer to the
/// next blob (all-zero for the last link).
pub type Blob = [u8; BLOB_LEN];

/// Split `content` into a 48-byte chain20 payload and the blobs that carry
/// the rest, in the order they should be persisted (first blob first).
pub fn encode(content: &[u8]) -> ([u8; 48], Vec<Blob>) {
    let mut buf = varint::encode(content.len() as u64);
    buf.extend_from_slice(content);

    if buf.len() <= HEAD_LEN {
        let mut payload = [0u8; 48];
        payload[..buf.len()].copy_from_slice(&buf);
        return (payload, Vec::new());
    }

    let head = &buf[..HEAD_LEN];
    let mut tail = buf[HEAD_LEN..].to_vec();
    let rem = tail.len() % SEGMENT_LEN;
    if rem > 0 {
        tail.resize(tail.len() + (SEGMENT_LEN - rem), 0);
    }

    let mut next_ptr = [0u8; 20];
    let mut blobs = Vec::with_capacity(tail.len() / SEGMENT_LEN);
    while !tail.is_empty() {
        let split = tail.len() - SEGMENT_LEN;
        let mut blob = [0u8; BLOB_LEN];
        blob[..SEGMENT_LEN].copy_from_slice(&tail[split..]);
        blob[SEGMENT_LEN..].copy_from_slice(&next_ptr);
        next_ptr = sha256_prefix::<20>(&blob);
        blobs.push(blob);
        tail.truncate(split);
    }
    blobs.reverse();

    let mut payload = [0u8; 48];
    payload[..HEAD_LEN].copy_from_slice(head);
    payload[HEAD_LEN..].copy_from_slice(&next_ptr);
    (payload, blobs)
}

/// The pointer to the first blob in the chain, if the content didn't fit
/// entirely inline.
pub fn head_ptr(payload: &[u8; 48]) -> Option<[u8; 20]> {
    let (chain_len, sz) = varint::decode(payload)?;
    if chain_len as usize + sz <= HEAD_LEN {
        return None;
    }
    let mut p = [0u8; 20];
    p.copy_from_slice(&payload[HEAD_LEN..48]);
    if p == [0u8; 20] {
        None
    } else {
        Some(p)
    }
}

/// Reassemble the original content from a chain20 payload, fetching each
/// blob in turn via `get_blob`. Returns `None` if any blob in the chain is
/// unavailable — the caller (the node's ARQ loop) is expected to retry
/// once more blobs have arrived.
pub fn decode(payload: &[u8; 48], mut get_blob: impl FnMut(&[u8; 20]) -> Option<Blob>) -> Option<Vec<u8>> {
    let (chain_len, sz) = varint::decode(payload)?;
    let chain_len = chain_len as usize;
    let end = core::cmp::min(HEAD_LEN, sz + chain_len);
    let mut content = payload[sz..end].to_vec();

    let mut next_ptr: Option<[u8; 20]> = if chain_len == content.len() {
        None
    } else {
        let mut p = [0u8; 20];
        p.copy_from_slice(&payload[HEAD_LEN..48]);
        if p == [0u8; 20] {
            None
        } else {
            Some(p)
        }
    };

    while chain_len > content.len() {
        let ptr = next_ptr?;
        let blob = get_blob(&ptr)?;
        let mut np = [0u8; 20];
        np.copy_from_slice(&blob[SEGMENT_LEN..BLOB_LEN]);
        next_ptr = if np == [0u8; 20] { None } else { Some(np) };

        let take = core::cmp::min(SEGMENT_LEN, chain_len - content.len());
        content.extend_from_slice(&blob[..take]);
    }

    Some(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn roundtrip(content: &[u8]) {
        let (payload, blobs) = encode(content);
        let mut store: HashMap<[u8; 20], Blob> = HashMap::new();
        for b in &blobs {
            store.insert(sha256_prefix::<20>(b), *b);
        }
        let decoded = decode(&payload, |ptr| store.get(ptr).copied()).unwrap();
        assert_eq!(decoded, content);
    }

    #[test]
    fn short_content_stays_inline() {
        roundtrip(b"hello world");
        let (_, blobs) = encode(b"hello world");
        assert!(blobs.is_empty());
    }

    #[test]
    fn long_content_spans_blobs() {
        let content: Vec<u8> = (0..230u32).map(|i| (i % 251) as u8).collect();
        roundtrip(&content);
    }

    #[test]
    fn content_exactly_at_segment_boundary() {
        let content = vec![7u8; 200];
        roundtrip(&content);
    }

    #[test]
    fn missing_blob_yields_none() {
        let content = vec![9u8; 500];
        let (payload, _blobs) = encode(&content);
        assert!(decode(&payload, |_| None).is_none());
    }
}
