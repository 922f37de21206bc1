#![forbid(unsafe_code)]

//! Face abstraction the node programs against, plus concrete carriers:
//! UDP multicast, a byte-stuffed KISS serial framing, and an in-process
//! loopback for tests. Transport never touches key material — it only
//! moves already-signed wire bytes.

mod error;
mod face;
mod kiss;
mod loopback;
mod udp;

pub use error::FaceError;
pub use face::{Face, MAX_DATAGRAM};
pub use kiss::KissFace;
pub use loopback::LoopbackFace;
pub use udp::UdpMulticastFace;
