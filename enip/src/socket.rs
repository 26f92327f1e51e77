//! Socket I/O (§4, §6): TCP connect-with-timeout and length-prefixed frame
//! receive for explicit messaging, UDP with `SO_REUSEADDR` bound to port
//! 2222 for implicit I/O, and broadcast send for discovery.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use socket2::{Domain, Socket, Type};
use tokio::net::{TcpStream, UdpSocket};

use crate::error::{EnipError, Result};
use crate::wire::EncapsulationHeader;

/// TCP port for explicit messaging and unicast ListIdentity (§6).
pub const ENIP_TCP_PORT: u16 = 44818;

/// UDP port for both broadcast ListIdentity and implicit cyclic I/O (§6).
pub const ENIP_UDP_PORT: u16 = 44818;

/// UDP port implicit I/O data is exchanged on (§6). Distinct from the
/// discovery port above.
pub const IMPLICIT_UDP_PORT: u16 = 2222;

/// Opens a TCP connection to `peer:44818`, failing with
/// [`EnipError::Timeout`] if the connect doesn't complete within
/// `timeout`.
pub async fn connect(peer: Ipv4Addr, timeout: Duration) -> Result<TcpStream> {
	let addr = SocketAddr::from((peer, ENIP_TCP_PORT));
	match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
		Ok(Ok(stream)) => Ok(stream),
		Ok(Err(err)) => Err(EnipError::Io(err)),
		Err(_) => Err(EnipError::Timeout),
	}
}

/// Reads exactly one ENIP encapsulation frame: the 24-byte header plus
/// `header.length` bytes of payload.
///
/// Some devices prepend a stray 4-byte run/idle header ahead of the real
/// encapsulation header (§4.3, §9 "device quirks to tolerate"). This scans
/// the first 8 bytes received for the expected command code and discards
/// any bytes before it.
pub async fn read_frame(stream: &mut TcpStream, expected_command: u16, timeout: Duration) -> Result<(EncapsulationHeader, Vec<u8>)> {
	tokio::time::timeout(timeout, read_frame_inner(stream, expected_command))
		.await
		.map_err(|_| EnipError::Timeout)?
}

async fn read_frame_inner(stream: &mut TcpStream, expected_command: u16) -> Result<(EncapsulationHeader, Vec<u8>)> {
	use tokio::io::AsyncReadExt;

	let mut probe = [0u8; 8];
	stream.read_exact(&mut probe).await?;

	let offset = find_command_offset(&probe, expected_command).ok_or_else(|| {
		EnipError::Protocol(format!(
			"did not find command 0x{expected_command:04X} in the first bytes of the response"
		))
	})?;

	let mut header_bytes = Vec::with_capacity(EncapsulationHeader::WIRE_SIZE);
	header_bytes.extend_from_slice(&probe[offset..]);
	while header_bytes.len() < EncapsulationHeader::WIRE_SIZE {
		let mut byte = [0u8; 1];
		stream.read_exact(&mut byte).await?;
		header_bytes.push(byte[0]);
	}

	let header = EncapsulationHeader::decode(&header_bytes)?;

	let mut payload = vec![0u8; header.length as usize];
	stream.read_exact(&mut payload).await?;

	Ok((header, payload))
}

/// Scans `probe` for `expected_command`'s little-endian bytes at any of
/// the first few positions, tolerating a 0 or 4-byte prefix (§4.3).
fn find_command_offset(probe: &[u8], expected_command: u16) -> Option<usize> {
	let wanted = expected_command.to_le_bytes();
	for offset in 0..=4 {
		if probe.len() >= offset + 2 && probe[offset..offset + 2] == wanted {
			return Some(offset);
		}
	}
	None
}

/// Writes `payload` to `stream` in full, mapping I/O failures to
/// [`EnipError::Io`].
pub async fn write_all(stream: &mut TcpStream, payload: &[u8]) -> Result<()> {
	use tokio::io::AsyncWriteExt;
	stream.write_all(payload).await?;
	Ok(())
}

/// Builds a UDP socket with `SO_REUSEADDR` set before handing it to tokio,
/// bound to `port` on all interfaces, with broadcast enabled (§4, §6).
pub fn bind_reusable_udp(port: u16) -> Result<UdpSocket> {
	let socket = Socket::new(Domain::IPV4, Type::DGRAM, None)?;
	socket.set_reuse_address(true)?;
	socket.set_broadcast(true)?;
	socket.set_nonblocking(true)?;

	let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
	socket.bind(&addr.into())?;

	let std_socket: std::net::UdpSocket = socket.into();
	Ok(UdpSocket::from_std(std_socket)?)
}

/// Binds a fresh UDP socket on an ephemeral local port with
/// `SO_REUSEADDR` and broadcast support (for one-shot discovery sends).
pub fn bind_ephemeral_udp() -> Result<UdpSocket> {
	bind_reusable_udp(0)
}

/// Sends `payload` to the IPv4 broadcast address on the discovery port.
pub async fn send_broadcast(socket: &UdpSocket, payload: &[u8]) -> io::Result<()> {
	let target = SocketAddr::from((Ipv4Addr::BROADCAST, ENIP_UDP_PORT));
	socket.send_to(payload, target).await?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn find_command_offset_handles_clean_response() {
		let mut probe = [0u8; 8];
		probe[0..2].copy_from_slice(&0x006Fu16.to_le_bytes());
		assert_eq!(find_command_offset(&probe, 0x006F), Some(0));
	}

	#[test]
	fn find_command_offset_tolerates_four_byte_prefix() {
		let mut probe = [0xAAu8; 8];
		probe[4..6].copy_from_slice(&0x006Fu16.to_le_bytes());
		assert_eq!(find_command_offset(&probe, 0x006F), Some(4));
	}

	#[test]
	fn find_command_offset_returns_none_when_absent() {
		let probe = [0xFFu8; 8];
		assert_eq!(find_command_offset(&probe, 0x006F), None);
	}

	#[tokio::test]
	async fn bind_reusable_udp_on_ephemeral_port_succeeds() {
		let socket = bind_ephemeral_udp().unwrap();
		assert!(socket.local_addr().unwrap().port() > 0);
	}
}
