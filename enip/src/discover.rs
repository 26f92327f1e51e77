//! UDP device discovery via broadcast ListIdentity (§4, §6).

use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use bytestruct::{Endian, ReadFromWithEndian};
use std::io::Cursor;

use crate::error::Result;
use crate::socket;
use crate::wire::{command, decode_cpf, item_type, EncapsulationHeader};

/// A device's response to ListIdentity (§6 `DeviceInfo`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
	pub ip: Ipv4Addr,
	pub vendor_id: u16,
	pub device_type: u16,
	pub product_code: u16,
	pub revision_major: u8,
	pub revision_minor: u8,
	pub status: u16,
	pub serial_number: u32,
	pub product_name: String,
	pub response_time: Duration,
}

/// The CIP Identity Object item carried in a ListIdentity reply's CPF
/// frame (item type 0x000C, not otherwise used by this crate). Layout:
/// `encap_protocol_version(u16), sockaddr(16 bytes), vendor_id(u16),
/// device_type(u16), product_code(u16), revision(u8,u8), status(u16),
/// serial_number(u32), product_name(length-prefixed ASCII), state(u8)`.
const IDENTITY_ITEM_TYPE: u16 = 0x000C;

fn parse_identity_item(data: &[u8], response_time: Duration) -> Option<DeviceInfo> {
	let mut cursor = Cursor::new(data);
	let _encap_protocol_version = u16::read_from_with_endian(&mut cursor, Endian::Little).ok()?;

	// sockaddr_in: sin_family(u16, big-endian on the wire), sin_port(u16,
	// big-endian), sin_addr(4 bytes), 8 bytes zero padding.
	let mut sockaddr = [0u8; 16];
	std::io::Read::read_exact(&mut cursor, &mut sockaddr).ok()?;
	let ip = Ipv4Addr::new(sockaddr[4], sockaddr[5], sockaddr[6], sockaddr[7]);

	let vendor_id = u16::read_from_with_endian(&mut cursor, Endian::Little).ok()?;
	let device_type = u16::read_from_with_endian(&mut cursor, Endian::Little).ok()?;
	let product_code = u16::read_from_with_endian(&mut cursor, Endian::Little).ok()?;
	let revision_major = u8::read_from_with_endian(&mut cursor, Endian::Little).ok()?;
	let revision_minor = u8::read_from_with_endian(&mut cursor, Endian::Little).ok()?;
	let status = u16::read_from_with_endian(&mut cursor, Endian::Little).ok()?;
	let serial_number = u32::read_from_with_endian(&mut cursor, Endian::Little).ok()?;

	let name_len = u8::read_from_with_endian(&mut cursor, Endian::Little).ok()? as usize;
	let mut name_bytes = vec![0u8; name_len];
	std::io::Read::read_exact(&mut cursor, &mut name_bytes).ok()?;
	let product_name = String::from_utf8_lossy(&name_bytes).into_owned();

	Some(DeviceInfo {
		ip,
		vendor_id,
		device_type,
		product_code,
		revision_major,
		revision_minor,
		status,
		serial_number,
		product_name,
		response_time,
	})
}

/// Broadcasts ListIdentity and collects replies until `timeout` elapses
/// (§4, §8 scenario A).
pub async fn scan_devices(timeout: Duration) -> Result<Vec<DeviceInfo>> {
	scan_devices_to(SocketAddr::from((Ipv4Addr::BROADCAST, socket::ENIP_UDP_PORT)), timeout).await
}

/// Sends ListIdentity to `destination` and collects replies until `timeout`
/// elapses. Factored out of `scan_devices` so tests can target a known
/// peer address directly instead of relying on broadcast delivery to a
/// loopback-bound socket, which isn't reliable across platforms.
async fn scan_devices_to(destination: SocketAddr, timeout: Duration) -> Result<Vec<DeviceInfo>> {
	let socket = socket::bind_ephemeral_udp()?;

	let header = EncapsulationHeader::new(command::LIST_IDENTITY, 0, 0);
	let packet = header.encode();
	socket.send_to(&packet, destination).await?;

	let started = Instant::now();
	let mut devices = Vec::new();
	let mut buf = [0u8; 1024];

	loop {
		let remaining = match timeout.checked_sub(started.elapsed()) {
			Some(remaining) if !remaining.is_zero() => remaining,
			_ => break,
		};

		let received = match tokio::time::timeout(remaining, socket.recv_from(&mut buf)).await {
			Ok(Ok(received)) => received,
			_ => break,
		};
		let (len, _from) = received;

		if len < EncapsulationHeader::WIRE_SIZE {
			continue;
		}
		let Ok(response_header) = EncapsulationHeader::decode(&buf[..EncapsulationHeader::WIRE_SIZE]) else {
			continue;
		};
		if response_header.command != command::LIST_IDENTITY {
			continue;
		}

		let payload_start = EncapsulationHeader::WIRE_SIZE;
		let payload_end = payload_start + response_header.length as usize;
		if len < payload_end {
			continue;
		}

		let Ok(items) = decode_cpf(&buf[payload_start..payload_end]) else {
			continue;
		};
		let Some(identity) = items.iter().find(|item| item.item_type == IDENTITY_ITEM_TYPE) else {
			continue;
		};

		if let Some(device) = parse_identity_item(&identity.data, started.elapsed()) {
			devices.push(device);
		}
	}

	Ok(devices)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::MockEnipTarget;

	#[tokio::test]
	async fn list_identity_discovers_mock_target() {
		let target = MockEnipTarget::spawn_udp_identity(
			"MockDev".to_string(),
			0x0001,
			0x1234_5678,
		)
		.await;

		// Addressed directly at the mock's loopback socket rather than
		// broadcast: delivery of a broadcast datagram to a loopback-bound
		// socket isn't guaranteed across platforms/sandboxes, and this test
		// must fail loudly if scan_devices/parse_identity_item is broken.
		let destination = SocketAddr::from((target.ip(), socket::ENIP_UDP_PORT));
		let devices = scan_devices_to(destination, Duration::from_millis(500)).await.unwrap();
		let found = devices
			.iter()
			.find(|d| d.ip == target.ip())
			.expect("mock target should have replied to ListIdentity");

		assert_eq!(found.product_name, "MockDev");
		assert_eq!(found.vendor_id, 0x0001);
		assert_eq!(found.serial_number, 0x1234_5678);
		assert!(found.response_time < Duration::from_secs(3));
	}
}
