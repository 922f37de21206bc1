use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::FaceError;
use crate::face::{check_len, DutyGate, Face, MAX_DATAGRAM};

/// A face backed by a UDP socket joined to an IPv4 multicast group —
/// tinySSB's usual LAN carrier.
pub struct UdpMulticastFace {
    socket: UdpSocket,
    target: SocketAddr,
    gate: DutyGate,
}

impl UdpMulticastFace {
    /// Bind `bind_port` on all interfaces and join `group` for both send
    /// and receive. `duty_cycle` defaults to zero for LAN multicast.
    pub async fn join(group: Ipv4Addr, bind_port: u16, duty_cycle: Duration) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, bind_port)).await?;
        socket.join_multicast_v4(group, Ipv4Addr::UNSPECIFIED)?;
        Ok(Self {
            socket,
            target: SocketAddr::V4(SocketAddrV4::new(group, bind_port)),
            gate: DutyGate::new(duty_cycle),
        })
    }
}

impl Face for UdpMulticastFace {
    fn send(&self, buf: &[u8]) -> Result<(), FaceError> {
        check_len(buf)?;
        self.gate.try_pass()?;
        self.socket.try_send_to(buf, self.target)?;
        Ok(())
    }

    fn duty_cycle(&self) -> Duration {
        self.gate.duty_cycle_value()
    }

    fn spawn_recv(self: Arc<Self>, tx: mpsc::UnboundedSender<Vec<u8>>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut buf = [0u8; MAX_DATAGRAM];
            loop {
                match self.socket.recv_from(&mut buf).await {
                    Ok((n, _from)) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "udp multicast face recv failed");
                        return;
                    }
                }
            }
        })
    }
}
