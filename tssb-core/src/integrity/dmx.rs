//! The DMX (demultiplexing) tag: a 7-byte fingerprint that lets a node
//! route an inbound frame to the handler expecting it without parsing the
//! frame first.

use super::hash::sha256_prefix;

/// Protocol version string mixed into every DMX computation, so a future
/// incompatible wire revision can't be silently accepted as this one's.
pub const VERSION: &[u8] = b"tinyssb-v0";

/// `SHA-256(VERSION || name)[:7]`, where `name` is whatever coordinate the
/// caller is tagging — a packet's `fid‖seq‖prev`, or a fixed label like
/// `b"want"` prefixed by a peer FID.
pub fn dmx(name: &[u8]) -> [u8; 7] {
    let mut buf = Vec::with_capacity(VERSION.len() + name.len());
    buf.extend_from_slice(VERSION);
    buf.extend_from_slice(name);
    sha256_prefix::<7>(&buf)
}
