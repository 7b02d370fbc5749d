//! Runs the signal and the network context on two threads of a hosted system.

use crate::artnet_node::ArtNetTransport;
use crate::clock::Clock;
use crate::config::ConfigStore;
use crate::consts::ARTNET_PORT;
use crate::dmx_uart_driver::{DmxRecvUartDriver, DmxRespUartDriver};
use crate::scheduler::{NetworkTask, SignalTask};
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Longest time the signal thread sleeps before it looks at the ports again.
const MAX_SIGNAL_SLEEP: Duration = Duration::from_millis(1);
const READ_TIMEOUT: Duration = Duration::from_millis(2);
/// Backoff after the transport failed.
const NETWORK_ERROR_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub enum BridgeError {
    /// The Art-Net socket couldn't be opened or configured.
    Bind(std::io::Error),
}

impl core::fmt::Display for BridgeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BridgeError::Bind(error) => write!(f, "binding the Art-Net socket failed: {error}"),
        }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BridgeError::Bind(error) => Some(error),
        }
    }
}

/// [ArtNetTransport] on a udp socket.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Binds to the Art-Net port on all interfaces.
    pub fn bind_default() -> Result<Self, BridgeError> {
        Self::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, ARTNET_PORT))
    }

    pub fn bind(address: SocketAddrV4) -> Result<Self, BridgeError> {
        let socket = UdpSocket::bind(address).map_err(BridgeError::Bind)?;
        socket.set_broadcast(true).map_err(BridgeError::Bind)?;
        socket
            .set_read_timeout(Some(READ_TIMEOUT))
            .map_err(BridgeError::Bind)?;

        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl ArtNetTransport for UdpTransport {
    type Error = std::io::Error;

    fn recv_from(
        &mut self,
        buffer: &mut [u8],
    ) -> Result<Option<(usize, SocketAddrV4)>, Self::Error> {
        match self.socket.recv_from(buffer) {
            Ok((length, SocketAddr::V4(source))) => Ok(Some((length, source))),
            Ok((_, SocketAddr::V6(_))) => Ok(None),
            Err(error)
                if matches!(error.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                Ok(None)
            },
            Err(error) => Err(error),
        }
    }

    fn send_to(&mut self, buffer: &[u8], target: SocketAddrV4) -> Result<usize, Self::Error> {
        self.socket.send_to(buffer, target)
    }
}

/// Runs both contexts until `stop` is set. The signal context gets its own thread so a slow
/// network never delays a frame.
pub fn run_bridge<'a, D, C, S, T, NC>(
    signal: SignalTask<'a, D, C>,
    network: NetworkTask<'a, S, T, NC>,
    stop: &AtomicBool,
) where
    D: DmxRespUartDriver + DmxRecvUartDriver,
    C: Clock,
    S: ConfigStore,
    T: ArtNetTransport,
    NC: Clock,
    SignalTask<'a, D, C>: Send,
    NetworkTask<'a, S, T, NC>: Send,
{
    info!("bridge started");

    std::thread::scope(|scope| {
        scope.spawn(|| run_signal(signal, stop));
        scope.spawn(|| run_network(network, stop));
    });

    info!("bridge stopped");
}

fn run_signal<D, C>(mut signal: SignalTask<'_, D, C>, stop: &AtomicBool)
where
    D: DmxRespUartDriver + DmxRecvUartDriver,
    C: Clock,
{
    while !stop.load(Ordering::Relaxed) {
        let wait_us = signal.poll();
        if wait_us > 0 {
            std::thread::sleep(Duration::from_micros(wait_us).min(MAX_SIGNAL_SLEEP));
        }
    }
}

fn run_network<S, T, C>(mut network: NetworkTask<'_, S, T, C>, stop: &AtomicBool)
where
    S: ConfigStore,
    T: ArtNetTransport,
    C: Clock,
{
    while !stop.load(Ordering::Relaxed) {
        if network.poll().is_err() {
            error!("receiving from the network failed");
            std::thread::sleep(NETWORK_ERROR_BACKOFF);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_udp_transport_round_trip() {
        let mut receiver = UdpTransport::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).unwrap();
        let mut sender = UdpTransport::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).unwrap();
        let target = match receiver.local_addr().unwrap() {
            SocketAddr::V4(address) => address,
            SocketAddr::V6(_) => unreachable!(),
        };

        let mut buffer = [0u8; 16];
        assert_eq!(receiver.recv_from(&mut buffer).unwrap(), None);

        sender.send_to(b"Art-Net\0", target).unwrap();
        let mut received = None;
        for _ in 0..100 {
            received = receiver.recv_from(&mut buffer).unwrap();
            if received.is_some() {
                break;
            }
        }
        let (length, _) = received.unwrap();
        assert_eq!(&buffer[..length], b"Art-Net\0");
    }
}
