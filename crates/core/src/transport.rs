//! Reliable-ordered connection-oriented messaging on top of TCP. The wire
//! codec in [`crate::wire`] only defines packet framing; this module owns
//! the socket itself and the length-prefixed framing around each packet.
//!
//! Every packet is prefixed on the wire with a 4-byte big-endian length
//! covering the encoded tag+payload that follows it, since TCP gives us a
//! byte stream rather than message boundaries.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use thiserror::Error;

use crate::wire::{Packet, WireError};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("peer {0} is not connected")]
    UnknownPeer(PeerHandle),
}

/// Opaque handle identifying a transport-level peer. Stable for the
/// lifetime of one TCP connection; a reconnecting client is assigned a new
/// handle even though it may reattach to the same `playerId`.
pub type PeerHandle = u32;

const LENGTH_PREFIX_WIDTH: usize = 4;
const MAX_FRAME_LEN: u32 = 1 << 20;

/// Accumulates bytes read off a stream and splits them into complete,
/// length-prefixed frames.
#[derive(Default)]
struct FrameAssembler {
    buf: Vec<u8>,
}

impl FrameAssembler {
    fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pulls every complete frame currently buffered, decoding each one. A
    /// frame that fails to decode is logged and dropped; the connection is
    /// not torn down for a single bad frame.
    fn drain_packets(&mut self) -> Vec<Packet> {
        let mut packets = Vec::new();
        loop {
            if self.buf.len() < LENGTH_PREFIX_WIDTH {
                break;
            }
            let len =
                u32::from_be_bytes(self.buf[..LENGTH_PREFIX_WIDTH].try_into().unwrap());
            if len > MAX_FRAME_LEN {
                log::warn!("dropping connection: frame length {len} exceeds sanity limit");
                self.buf.clear();
                break;
            }
            let total = LENGTH_PREFIX_WIDTH + len as usize;
            if self.buf.len() < total {
                break;
            }
            let frame = &self.buf[LENGTH_PREFIX_WIDTH..total];
            match Packet::decode(frame) {
                Ok(packet) => packets.push(packet),
                Err(err) => log::warn!("dropping malformed packet: {err}"),
            }
            self.buf.drain(..total);
        }
        packets
    }
}

fn frame(packet: &Packet) -> Vec<u8> {
    let payload = packet.encode();
    let mut framed = Vec::with_capacity(LENGTH_PREFIX_WIDTH + payload.len());
    framed.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    framed.extend_from_slice(&payload);
    framed
}

/// Drains the socket non-blockingly, returning `false` if the peer closed
/// the connection (or a non-recoverable I/O error occurred).
fn pump_reads(stream: &mut TcpStream, assembler: &mut FrameAssembler) -> bool {
    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => return false,
            Ok(n) => assembler.push(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return true,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => return false,
        }
    }
}

#[derive(Debug)]
pub enum ConnectionEvent {
    Connected(PeerHandle, SocketAddr),
    Disconnected(PeerHandle),
}

struct PeerConn {
    stream: TcpStream,
    addr: SocketAddr,
    assembler: FrameAssembler,
}

/// Server-side acceptor: a listening socket plus a table of connected
/// peers, each polled for complete frames every tick.
pub struct ServerTransport {
    listener: TcpListener,
    peers: HashMap<PeerHandle, PeerConn>,
    next_handle: PeerHandle,
}

impl ServerTransport {
    pub fn bind(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(ServerTransport {
            listener,
            peers: HashMap::new(),
            next_handle: 0,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts any pending connections and drains every connected peer's
    /// socket, returning connection-state events and decoded packets
    /// together so a caller can process them in a single pass.
    pub fn poll(&mut self) -> (Vec<ConnectionEvent>, Vec<(PeerHandle, Packet)>) {
        let mut events = Vec::new();
        let mut packets = Vec::new();

        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        log::warn!("failed to configure accepted socket from {addr}: {e}");
                        continue;
                    }
                    let handle = self.next_handle;
                    self.next_handle += 1;
                    self.peers.insert(
                        handle,
                        PeerConn {
                            stream,
                            addr,
                            assembler: FrameAssembler::default(),
                        },
                    );
                    events.push(ConnectionEvent::Connected(handle, addr));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!("accept() failed: {e}");
                    break;
                }
            }
        }

        let mut dead = Vec::new();
        for (&handle, peer) in self.peers.iter_mut() {
            if !pump_reads(&mut peer.stream, &mut peer.assembler) {
                dead.push(handle);
                continue;
            }
            for packet in peer.assembler.drain_packets() {
                packets.push((handle, packet));
            }
        }

        for handle in dead {
            self.peers.remove(&handle);
            events.push(ConnectionEvent::Disconnected(handle));
        }

        (events, packets)
    }

    pub fn send(&mut self, handle: PeerHandle, packet: &Packet) -> Result<(), TransportError> {
        let peer = self
            .peers
            .get_mut(&handle)
            .ok_or(TransportError::UnknownPeer(handle))?;
        peer.stream.write_all(&frame(packet))?;
        Ok(())
    }

    pub fn broadcast(&mut self, packet: &Packet, except: Option<PeerHandle>) {
        let bytes = frame(packet);
        for (&handle, peer) in self.peers.iter_mut() {
            if Some(handle) == except {
                continue;
            }
            if let Err(e) = peer.stream.write_all(&bytes) {
                log::warn!("failed to send to peer {handle}: {e}");
            }
        }
    }

    pub fn peer_addr(&self, handle: PeerHandle) -> Option<SocketAddr> {
        self.peers.get(&handle).map(|p| p.addr)
    }

    /// Shuts down and forgets a peer's socket for an orderly, non-abrupt
    /// disconnect.
    pub fn close(&mut self, handle: PeerHandle) {
        if let Some(peer) = self.peers.remove(&handle) {
            let _ = peer.stream.shutdown(std::net::Shutdown::Both);
        }
    }

    pub fn connected_count(&self) -> usize {
        self.peers.len()
    }
}

/// Client-side connection: one outbound TCP stream.
pub struct ClientTransport {
    stream: TcpStream,
    assembler: FrameAssembler,
}

impl ClientTransport {
    /// Blocks for up to `timeout` establishing the TCP connection, then
    /// switches to non-blocking mode for steady-state polling. This keeps
    /// the orchestrator's own connect timeout in one place rather than
    /// hand-rolling connect-in-progress state here.
    pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self, TransportError> {
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true).ok();
        Ok(ClientTransport {
            stream,
            assembler: FrameAssembler::default(),
        })
    }

    /// Drains the socket, returning every fully decoded packet. Returns
    /// `None` once the connection has been observed as closed.
    pub fn poll(&mut self) -> Option<Vec<Packet>> {
        if !pump_reads(&mut self.stream, &mut self.assembler) {
            return None;
        }
        Some(self.assembler.drain_packets())
    }

    pub fn send(&mut self, packet: &Packet) -> Result<(), TransportError> {
        self.stream.write_all(&frame(packet))?;
        Ok(())
    }

    pub fn close(&mut self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InputBlob;
    use std::sync::atomic::{AtomicU16, Ordering};

    static PORT_COUNTER: AtomicU16 = AtomicU16::new(19500);

    fn next_addr() -> SocketAddr {
        let port = PORT_COUNTER.fetch_add(1, Ordering::SeqCst);
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    fn wait_for<T>(mut poll: impl FnMut() -> Vec<T>, timeout: Duration) -> Vec<T> {
        let start = std::time::Instant::now();
        loop {
            let got = poll();
            if !got.is_empty() || start.elapsed() > timeout {
                return got;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn client_connects_and_exchanges_a_packet() {
        let addr = next_addr();
        let mut server = ServerTransport::bind(addr).unwrap();
        let bound = server.local_addr().unwrap();

        let mut client = ClientTransport::connect(bound, Duration::from_secs(1)).unwrap();

        let events = wait_for(
            || {
                let (events, _) = server.poll();
                events
            },
            Duration::from_secs(1),
        );
        assert_eq!(events.len(), 1);
        let handle = match events[0] {
            ConnectionEvent::Connected(h, _) => h,
            _ => panic!("expected Connected event"),
        };

        client
            .send(&Packet::ClientHello {
                client_id: "alice".to_string(),
            })
            .unwrap();

        let received = wait_for(
            || server.poll().1,
            Duration::from_secs(1),
        );
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0, handle);
        match &received[0].1 {
            Packet::ClientHello { client_id } => assert_eq!(client_id, "alice"),
            _ => panic!("wrong packet decoded"),
        }

        server
            .send(
                handle,
                &Packet::ServerAccept {
                    player_id: 0,
                    is_reconnection: false,
                },
            )
            .unwrap();

        let from_server = wait_for(|| client.poll().unwrap_or_default(), Duration::from_secs(1));
        assert_eq!(from_server.len(), 1);
        assert!(matches!(from_server[0], Packet::ServerAccept { .. }));
    }

    #[test]
    fn disconnect_is_observed_by_server() {
        let addr = next_addr();
        let mut server = ServerTransport::bind(addr).unwrap();
        let bound = server.local_addr().unwrap();
        let client = ClientTransport::connect(bound, Duration::from_secs(1)).unwrap();

        wait_for(
            || {
                let (events, _) = server.poll();
                events
            },
            Duration::from_secs(1),
        );

        drop(client);

        let events = wait_for(
            || {
                let (events, _) = server.poll();
                events
            },
            Duration::from_secs(1),
        );
        assert!(matches!(events[0], ConnectionEvent::Disconnected(_)));
    }

    #[test]
    fn input_packet_survives_the_wire() {
        let addr = next_addr();
        let mut server = ServerTransport::bind(addr).unwrap();
        let bound = server.local_addr().unwrap();
        let mut client = ClientTransport::connect(bound, Duration::from_secs(1)).unwrap();

        wait_for(
            || {
                let (events, _) = server.poll();
                events
            },
            Duration::from_secs(1),
        );

        client
            .send(&Packet::Input {
                player_id: 3,
                frame: 42,
                input: InputBlob([9, 8, 7, 6]),
            })
            .unwrap();

        let received = wait_for(|| server.poll().1, Duration::from_secs(1));
        match &received[0].1 {
            Packet::Input {
                player_id,
                frame,
                input,
            } => {
                assert_eq!(*player_id, 3);
                assert_eq!(*frame, 42);
                assert_eq!(input.0, [9, 8, 7, 6]);
            }
            _ => panic!("wrong packet decoded"),
        }
    }
}
