//! Explicit request engine (§4.3): one-shot CIP request/response over a
//! fresh TCP session, and the Assembly/tag read-write operations built on
//! top of it.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;

use crate::cip::{self, CipRequest, CipResponse};
use crate::epath;
use crate::error::{EnipError, Result};
use crate::session;
use crate::socket;
use crate::tags::{CipDataType, CipValue};
use crate::wire::{command, encode_cpf, decode_cpf, find_item, item_type, CpfItem, EncapsulationHeader};

/// Issues one CIP request to `peer` over a fresh TCP session and returns
/// the parsed CIP response (§4.3).
///
/// Opens a socket, registers a session, sends SendRRData wrapping
/// `request`, reads back the response, and tears the session + socket
/// down on every exit path — including error paths.
pub async fn explicit_request(peer: Ipv4Addr, request: CipRequest, timeout: Duration) -> Result<CipResponse> {
	let mut stream = socket::connect(peer, timeout).await?;
	let handle = session::register_session(&mut stream, timeout).await?;

	// Once a session is registered, every exit path below — success or
	// error — unregisters it before returning (§8 invariant 1).
	let result = send_unconnected_request(&mut stream, handle, request, timeout).await;
	let _ = session::unregister_session(&mut stream, handle).await;
	result
}

async fn send_unconnected_request(
	stream: &mut TcpStream,
	handle: u32,
	request: CipRequest,
	timeout: Duration,
) -> Result<CipResponse> {
	let cip_bytes = request.encode();
	let items = vec![
		CpfItem::null_address(),
		CpfItem::new(item_type::UNCONNECTED_DATA, cip_bytes),
	];

	let mut payload = Vec::new();
	payload.extend_from_slice(&0u32.to_le_bytes()); // interface_handle
	payload.extend_from_slice(&(timeout.as_millis().min(u16::MAX as u128) as u16).to_le_bytes());
	payload.extend_from_slice(&encode_cpf(&items));

	let header = EncapsulationHeader::new(command::SEND_RR_DATA, payload.len(), handle);
	let mut packet = header.encode();
	packet.extend_from_slice(&payload);
	socket::write_all(stream, &packet).await?;

	let (_response_header, response_payload) = socket::read_frame(stream, command::SEND_RR_DATA, timeout).await?;

	if response_payload.len() < 6 {
		return Err(EnipError::Protocol("SendRRData response payload too short".into()));
	}
	let cpf_bytes = &response_payload[6..];
	let cpf_items = decode_cpf(cpf_bytes)?;

	let unconnected = find_item(&cpf_items, item_type::UNCONNECTED_DATA)
		.ok_or_else(|| EnipError::Protocol("SendRRData response missing Unconnected Data item".into()))?;

	CipResponse::parse(&unconnected.data)
}

/// The OCTET_STRING wrapper tag some devices prefix assembly-read
/// responses with (§4.3): `0xDA, length(u16 big-endian), bytes...`.
const OCTET_STRING_TAG: u8 = 0xDA;

fn unwrap_octet_string(data: &[u8]) -> &[u8] {
	if data.len() >= 3 && data[0] == OCTET_STRING_TAG {
		let len = u16::from_be_bytes([data[1], data[2]]) as usize;
		if data.len() >= 3 + len {
			return &data[3..3 + len];
		}
	}
	data
}

/// The result of a successful `read_assembly` call (§3 `AssemblyReadResult`).
#[derive(Debug, Clone)]
pub struct AssemblyReadResult {
	pub peer: Ipv4Addr,
	pub instance: u16,
	pub data: Vec<u8>,
	pub response_time: Duration,
}

/// Reads an Assembly instance via Get_Attribute_Single (§4.3).
pub async fn read_assembly(peer: Ipv4Addr, instance: u16, timeout: Duration) -> Result<AssemblyReadResult> {
	let started = Instant::now();
	let path = epath::encode_epath_assembly(instance as u32, 3);
	let request = CipRequest::new(cip::service::GET_ATTRIBUTE_SINGLE, path, Vec::new());
	let response = explicit_request(peer, request, timeout).await?;
	let data = response.into_data()?;

	Ok(AssemblyReadResult {
		peer,
		instance,
		data: unwrap_octet_string(&data).to_vec(),
		response_time: started.elapsed(),
	})
}

/// Writes raw bytes to an Assembly instance via Set_Attribute_Single (§4.3).
pub async fn write_assembly(peer: Ipv4Addr, instance: u16, bytes: &[u8], timeout: Duration) -> Result<()> {
	let path = epath::encode_epath_assembly(instance as u32, 3);
	let request = CipRequest::new(cip::service::SET_ATTRIBUTE_SINGLE, path, bytes.to_vec());
	let response = explicit_request(peer, request, timeout).await?;
	response.into_data()?;
	Ok(())
}

/// The result of a successful `read_tag` call (§3 `TagReadResult`).
#[derive(Debug, Clone)]
pub struct TagReadResult {
	pub peer: Ipv4Addr,
	pub tag_path: String,
	pub data_type: CipDataType,
	pub value: CipValue,
	pub response_time: Duration,
}

/// Reads a symbolic tag via Read_Tag (§4.3). Response data is
/// `cip_type(u16), value_bytes[]`.
pub async fn read_tag(peer: Ipv4Addr, tag_path: &str, timeout: Duration) -> Result<TagReadResult> {
	crate::tags::validate_tag_name(tag_path)?;
	let started = Instant::now();

	let path = epath::encode_epath_symbolic(tag_path);
	let mut request_data = Vec::new();
	request_data.extend_from_slice(&1u16.to_le_bytes()); // element_count
	let request = CipRequest::new(cip::service::READ_TAG, path, request_data);

	let response = explicit_request(peer, request, timeout).await?;
	let data = response.into_data()?;

	if data.len() < 2 {
		return Err(EnipError::Protocol("Read_Tag response missing cip_type word".into()));
	}
	let cip_type = u16::from_le_bytes([data[0], data[1]]);
	let data_type = CipDataType::from_wire_code(cip_type)
		.ok_or_else(|| EnipError::Protocol(format!("unknown CIP data type 0x{cip_type:04X}")))?;
	let value = CipValue::decode(data_type, &data[2..])?;

	Ok(TagReadResult {
		peer,
		tag_path: tag_path.to_string(),
		data_type,
		value,
		response_time: started.elapsed(),
	})
}

/// Writes a symbolic tag via Write_Tag (§4.3). Request data is
/// `cip_type(u16), element_count(u16)=1, encoded_value`.
pub async fn write_tag(peer: Ipv4Addr, tag_path: &str, value: &CipValue, timeout: Duration) -> Result<()> {
	crate::tags::validate_tag_name(tag_path)?;

	let path = epath::encode_epath_symbolic(tag_path);
	let mut request_data = Vec::new();
	request_data.extend_from_slice(&value.data_type().wire_code().to_le_bytes());
	request_data.extend_from_slice(&1u16.to_le_bytes());
	request_data.extend_from_slice(&value.encode());

	let request = CipRequest::new(cip::service::WRITE_TAG, path, request_data);
	let response = explicit_request(peer, request, timeout).await?;
	response.into_data()?;
	Ok(())
}

/// The hard-coded fallback probe list (§4.3) used when Max Instance
/// (Class 4, Instance 0, Attribute 2) doesn't return a plausible value.
const FALLBACK_PROBE_INSTANCES: &[u16] = &[100, 101, 102, 150, 151, 152, 20, 21, 22, 1, 2, 3, 4, 5];

/// Discovers which Assembly instances a device exposes (§4.3).
///
/// Reads Class 4 / Instance 0 / Attribute 2 (Max Instance). If that
/// returns a plausible `u16 <= 256`, probes `1..=max`; otherwise probes
/// [`FALLBACK_PROBE_INSTANCES`]. Returns instances whose read succeeds.
pub async fn discover_assemblies(peer: Ipv4Addr, timeout: Duration) -> Vec<u16> {
	let max_instance = read_max_instance(peer, timeout).await;

	let candidates: Vec<u16> = match max_instance {
		Some(max) if max <= 256 => (1..=max).collect(),
		_ => FALLBACK_PROBE_INSTANCES.to_vec(),
	};

	let mut found = Vec::new();
	for instance in candidates {
		if read_assembly(peer, instance, timeout).await.is_ok() {
			found.push(instance);
		}
	}
	found
}

async fn read_max_instance(peer: Ipv4Addr, timeout: Duration) -> Option<u16> {
	let path = epath::encode_epath_class_instance_attribute(epath::class::ASSEMBLY, 0, 2);
	let request = CipRequest::new(cip::service::GET_ATTRIBUTE_SINGLE, path, Vec::new());
	let response = explicit_request(peer, request, timeout).await.ok()?;
	let data = response.into_data().ok()?;
	if data.len() < 2 {
		return None;
	}
	Some(u16::from_le_bytes([data[0], data[1]]))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::MockEnipTarget;

	#[test]
	fn unwrap_octet_string_strips_tag_and_length() {
		let wrapped = [0xDA, 0x00, 0x04, 0x05, 0x00, 0x00, 0x00];
		assert_eq!(unwrap_octet_string(&wrapped), &[0x05, 0x00, 0x00, 0x00]);
	}

	#[test]
	fn unwrap_octet_string_passes_through_unwrapped_data() {
		let raw = [0x05, 0x00, 0x00, 0x00];
		assert_eq!(unwrap_octet_string(&raw), &raw);
	}

	#[tokio::test]
	async fn read_assembly_instance_100_returns_four_bytes() {
		let target = MockEnipTarget::spawn_tcp().await;
		target.set_assembly(100, vec![0x05, 0x00, 0x00, 0x00]).await;

		let result = read_assembly(target.ip(), 100, Duration::from_secs(1)).await.unwrap();
		assert_eq!(result.data, vec![0x05, 0x00, 0x00, 0x00]);
	}

	#[tokio::test]
	async fn write_assembly_instance_150_is_observed_on_the_wire() {
		let target = MockEnipTarget::spawn_tcp().await;

		write_assembly(target.ip(), 150, &[0x04, 0x00, 0x00, 0x00], Duration::from_secs(1))
			.await
			.unwrap();

		let last = target.last_request().await.unwrap();
		assert_eq!(last.service, cip::service::SET_ATTRIBUTE_SINGLE);
		assert_eq!(last.path, epath::encode_epath_assembly(150, 3));
		assert_eq!(last.data, vec![0x04, 0x00, 0x00, 0x00]);
	}

	#[tokio::test]
	async fn read_tag_counter_dint_12345() {
		let target = MockEnipTarget::spawn_tcp().await;
		target.set_tag("Counter", CipValue::Dint(12345)).await;

		let result = read_tag(target.ip(), "Counter", Duration::from_secs(1)).await.unwrap();
		assert_eq!(result.data_type, CipDataType::Dint);
		assert_eq!(result.value, CipValue::Dint(12345));

		let last = target.last_request().await.unwrap();
		assert_eq!(
			last.path,
			vec![0x91, 0x07, b'C', b'o', b'u', b'n', b't', b'e', b'r', 0x00]
		);
	}

	#[tokio::test]
	async fn write_tag_temperature_real_75_5() {
		let target = MockEnipTarget::spawn_tcp().await;

		write_tag(target.ip(), "Temperature", &CipValue::Real(75.5), Duration::from_secs(1))
			.await
			.unwrap();

		let last = target.last_request().await.unwrap();
		assert_eq!(last.data, vec![0xCA, 0x00, 0x01, 0x00, 0x00, 0x00, 0x97, 0x42]);
	}

	#[tokio::test]
	async fn discover_assemblies_falls_back_to_probe_list_without_max_instance() {
		let target = MockEnipTarget::spawn_tcp().await;
		target.set_assembly(100, vec![0u8; 4]).await;
		target.set_assembly(150, vec![0u8; 4]).await;

		let found = discover_assemblies(target.ip(), Duration::from_secs(1)).await;
		assert!(found.contains(&100));
		assert!(found.contains(&150));
		assert!(!found.contains(&999));
	}
}
