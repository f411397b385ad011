//! Background sender announcing the private address over UDP.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

/// Sends the private address to a multicast group on a fixed interval.
#[derive(Debug, Clone)]
pub struct Beacon {
    payload: String,
    group: SocketAddr,
    interval: Duration,
}

impl Beacon {
    /// `private_address` is sent as-is, with no framing.
    pub fn new(private_address: impl Into<String>, group: SocketAddr, interval: Duration) -> Self {
        Self {
            payload: private_address.into(),
            group,
            interval,
        }
    }

    /// Spawns the sender task. The first datagram goes out immediately.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut socket: Option<UdpSocket> = None;

        loop {
            ticker.tick().await;
            self.announce(&mut socket).await;
        }
    }

    /// One tick: binds `socket` if it is not bound yet, then sends the
    /// payload. Returns whether the datagram left. A failed bind leaves
    /// `socket` empty so the next tick tries again.
    async fn announce(&self, socket: &mut Option<UdpSocket>) -> bool {
        if socket.is_none() {
            match self.bind().await {
                Ok(bound) => *socket = Some(bound),
                Err(err) => {
                    warn!("Unable to open multicast socket for {}: {}", self.group, err);
                    return false;
                }
            }
        }

        let Some(udp) = socket.as_ref() else {
            return false;
        };
        match udp.send_to(self.payload.as_bytes(), self.group).await {
            Ok(_) => {
                debug!("Announced {} to {}", self.payload, self.group);
                true
            }
            Err(err) => {
                warn!("Unable to announce address to {}: {}", self.group, err);
                false
            }
        }
    }

    async fn bind(&self) -> io::Result<UdpSocket> {
        let local: SocketAddr = if self.group.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        UdpSocket::bind(local).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_announces_payload_repeatedly() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let group = receiver.local_addr().unwrap();
        let handle = Beacon::new("10.0.0.5:443", group, Duration::from_millis(20)).spawn();

        let mut buf = [0u8; 64];
        for _ in 0..2 {
            let (len, _) = time::timeout(Duration::from_secs(5), receiver.recv_from(&mut buf))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(&buf[..len], b"10.0.0.5:443");
        }

        handle.abort();
    }

    // Broadcasting without SO_BROADCAST is refused by the kernel.
    fn refused_group() -> SocketAddr {
        (Ipv4Addr::BROADCAST, 9).into()
    }

    #[tokio::test]
    async fn test_failed_send_keeps_socket_for_next_tick() {
        let beacon = Beacon::new("10.0.0.5:443", refused_group(), Duration::from_millis(10));
        let mut socket = None;

        assert!(!beacon.announce(&mut socket).await);
        assert!(socket.is_some());
        let local = socket.as_ref().unwrap().local_addr().unwrap();

        assert!(!beacon.announce(&mut socket).await);
        assert_eq!(socket.as_ref().unwrap().local_addr().unwrap(), local);
    }

    #[tokio::test]
    async fn test_send_failures_do_not_stop_the_loop() {
        let handle = Beacon::new("10.0.0.5:443", refused_group(), Duration::from_millis(5)).spawn();
        time::sleep(Duration::from_millis(100)).await;
        assert!(!handle.is_finished());
        handle.abort();
    }

    #[tokio::test]
    async fn test_recovers_after_failed_send() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut socket = None;

        let refused = Beacon::new("10.0.0.5:443", refused_group(), Duration::from_millis(10));
        assert!(!refused.announce(&mut socket).await);

        let group = receiver.local_addr().unwrap();
        let working = Beacon::new("10.0.0.5:443", group, Duration::from_millis(10));
        assert!(working.announce(&mut socket).await);
        let mut buf = [0u8; 64];
        let (len, _) = time::timeout(Duration::from_secs(5), receiver.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], b"10.0.0.5:443");
    }
}
