//! Session manager (§4.2): RegisterSession / UnRegisterSession.

use std::time::Duration;

use tokio::net::TcpStream;

use crate::error::{EnipError, Result};
use crate::socket;
use crate::wire::{command, EncapsulationHeader};

/// Sends RegisterSession and returns the handle the target assigned.
///
/// Payload is `protocol_version(u16)=1, options_flags(u16)=0` (§4.2).
pub async fn register_session(stream: &mut TcpStream, timeout: Duration) -> Result<u32> {
	let mut payload = Vec::with_capacity(4);
	payload.extend_from_slice(&1u16.to_le_bytes()); // protocol_version
	payload.extend_from_slice(&0u16.to_le_bytes()); // options_flags

	let header = EncapsulationHeader::new(command::REGISTER_SESSION, payload.len(), 0);
	let mut packet = header.encode();
	packet.extend_from_slice(&payload);
	socket::write_all(stream, &packet).await?;

	let (response_header, response_payload) = socket::read_frame(stream, command::REGISTER_SESSION, timeout).await?;

	if response_header.status != 0 {
		return Err(EnipError::Protocol(format!(
			"RegisterSession failed with status 0x{:08X}",
			response_header.status
		)));
	}
	if response_payload.len() < 4 {
		return Err(EnipError::Protocol("RegisterSession response payload too short".into()));
	}

	Ok(response_header.session_handle)
}

/// Sends UnRegisterSession. No response is expected; the peer may close
/// the connection immediately (§4.2).
pub async fn unregister_session(stream: &mut TcpStream, session_handle: u32) -> Result<()> {
	let header = EncapsulationHeader::new(command::UNREGISTER_SESSION, 0, session_handle);
	let packet = header.encode();
	socket::write_all(stream, &packet).await?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::MockEnipTarget;

	#[tokio::test]
	async fn register_session_returns_assigned_handle() {
		let target = MockEnipTarget::spawn_tcp().await;
		let mut stream = TcpStream::connect(target.tcp_addr()).await.unwrap();

		let handle = register_session(&mut stream, Duration::from_secs(1)).await.unwrap();
		assert_ne!(handle, 0);
	}

	#[tokio::test]
	async fn unregister_session_does_not_wait_for_a_reply() {
		let target = MockEnipTarget::spawn_tcp().await;
		let mut stream = TcpStream::connect(target.tcp_addr()).await.unwrap();
		let handle = register_session(&mut stream, Duration::from_secs(1)).await.unwrap();

		unregister_session(&mut stream, handle).await.unwrap();
	}
}
