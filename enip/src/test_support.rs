//! In-process mock ENIP target (§8, §9 "testing must use a mock target").
//! Speaks just enough of the wire protocol — RegisterSession, SendRRData
//! with Get/Set_Attribute_Single and Read/Write_Tag — to exercise the
//! originator-side code in this crate against a real loopback socket,
//! following the teacher's own preference for testing socket code against
//! a real socket rather than faking `Read`/`Write`.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::cip;
use crate::socket;
use crate::tags::{CipDataType, CipValue};
use crate::wire::{command, decode_cpf, encode_cpf, find_item, item_type, CpfItem, EncapsulationHeader};

static NEXT_HOST_OCTET: AtomicU8 = AtomicU8::new(2);

/// Each test that needs a TCP mock target binds it to its own loopback
/// address at the real ENIP port, so tests can run concurrently without
/// colliding on `44818`.
fn next_loopback_ip() -> Ipv4Addr {
	let octet = NEXT_HOST_OCTET.fetch_add(1, Ordering::SeqCst);
	Ipv4Addr::new(127, 0, 0, octet)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedRequest {
	pub service: u8,
	pub path: Vec<u8>,
	pub data: Vec<u8>,
}

#[derive(Default)]
struct SharedState {
	assemblies: HashMap<u16, Vec<u8>>,
	tags: HashMap<Vec<u8>, CipValue>,
	last_request: Option<CapturedRequest>,
	max_instance: Option<u16>,
}

pub struct MockEnipTarget {
	ip: Ipv4Addr,
	state: Arc<Mutex<SharedState>>,
	server_task: JoinHandle<()>,
}

impl Drop for MockEnipTarget {
	fn drop(&mut self) {
		self.server_task.abort();
	}
}

impl MockEnipTarget {
	/// Spawns a TCP listener on the real ENIP port at a fresh loopback
	/// address, ready to answer RegisterSession/SendRRData.
	pub async fn spawn_tcp() -> Self {
		let ip = next_loopback_ip();
		let state = Arc::new(Mutex::new(SharedState::default()));

		let listener = TcpListener::bind(SocketAddr::from((ip, socket::ENIP_TCP_PORT))).await.unwrap();
		let accept_state = state.clone();
		let server_task = tokio::spawn(async move {
			loop {
				let Ok((stream, _)) = listener.accept().await else { break };
				let connection_state = accept_state.clone();
				tokio::spawn(async move {
					let _ = handle_tcp_connection(stream, connection_state).await;
				});
			}
		});

		Self { ip, state, server_task }
	}

	/// Spawns a UDP responder to ListIdentity on the discovery port,
	/// replying to every request with a fixed Identity Object (§8 scenario
	/// A).
	pub async fn spawn_udp_identity(product_name: String, vendor_id: u16, serial_number: u32) -> Self {
		let socket = socket::bind_reusable_udp(socket::ENIP_UDP_PORT).unwrap();
		let state = Arc::new(Mutex::new(SharedState::default()));

		let server_task = tokio::spawn(async move {
			let mut buf = [0u8; 512];
			loop {
				let Ok((len, from)) = socket.recv_from(&mut buf).await else { break };
				if len < EncapsulationHeader::WIRE_SIZE {
					continue;
				}
				let Ok(header) = EncapsulationHeader::decode(&buf[..EncapsulationHeader::WIRE_SIZE]) else {
					continue;
				};
				if header.command != command::LIST_IDENTITY {
					continue;
				}

				let identity_data = build_identity_item(&product_name, vendor_id, serial_number, from);
				let items = vec![CpfItem::new(0x000C, identity_data)];
				let payload = encode_cpf(&items);
				let response_header = EncapsulationHeader::new(command::LIST_IDENTITY, payload.len(), 0);
				let mut packet = response_header.encode();
				packet.extend_from_slice(&payload);
				let _ = socket.send_to(&packet, from).await;
			}
		});

		// Echoed back verbatim in the identity reply's embedded sockaddr,
		// matching loopback clients' actual source address.
		Self {
			ip: Ipv4Addr::new(127, 0, 0, 1),
			state,
			server_task,
		}
	}

	pub fn ip(&self) -> Ipv4Addr {
		self.ip
	}

	pub fn tcp_addr(&self) -> SocketAddr {
		SocketAddr::from((self.ip, socket::ENIP_TCP_PORT))
	}

	pub async fn set_assembly(&self, instance: u16, data: Vec<u8>) {
		self.state.lock().await.assemblies.insert(instance, data);
	}

	pub async fn set_max_instance(&self, max: u16) {
		self.state.lock().await.max_instance = Some(max);
	}

	pub async fn set_tag(&self, name: &str, value: CipValue) {
		let path = crate::epath::encode_epath_symbolic(name);
		self.state.lock().await.tags.insert(path, value);
	}

	pub async fn last_request(&self) -> Option<CapturedRequest> {
		self.state.lock().await.last_request.clone()
	}
}

fn build_identity_item(name: &str, vendor_id: u16, serial_number: u32, from: SocketAddr) -> Vec<u8> {
	let mut buf = Vec::new();
	buf.extend_from_slice(&1u16.to_le_bytes()); // encap protocol version

	buf.extend_from_slice(&2u16.to_be_bytes()); // sin_family = AF_INET
	buf.extend_from_slice(&socket::ENIP_TCP_PORT.to_be_bytes());
	match from.ip() {
		std::net::IpAddr::V4(ip) => buf.extend_from_slice(&ip.octets()),
		std::net::IpAddr::V6(_) => buf.extend_from_slice(&[0u8; 4]),
	}
	buf.extend_from_slice(&[0u8; 8]); // sockaddr padding

	buf.extend_from_slice(&vendor_id.to_le_bytes());
	buf.extend_from_slice(&0x000Cu16.to_le_bytes()); // device_type (generic)
	buf.extend_from_slice(&0x0001u16.to_le_bytes()); // product_code
	buf.push(1); // revision major
	buf.push(1); // revision minor
	buf.extend_from_slice(&0u16.to_le_bytes()); // status
	buf.extend_from_slice(&serial_number.to_le_bytes());
	buf.push(name.len().min(0xFF) as u8);
	buf.extend_from_slice(&name.as_bytes()[..name.len().min(0xFF)]);
	buf.push(0); // state

	buf
}

async fn read_one_frame(stream: &mut TcpStream) -> std::io::Result<(EncapsulationHeader, Vec<u8>)> {
	let mut header_bytes = [0u8; EncapsulationHeader::WIRE_SIZE];
	stream.read_exact(&mut header_bytes).await?;
	let header = EncapsulationHeader::decode(&header_bytes)?;
	let mut payload = vec![0u8; header.length as usize];
	stream.read_exact(&mut payload).await?;
	Ok((header, payload))
}

struct ParsedCipRequest {
	service: u8,
	path: Vec<u8>,
	data: Vec<u8>,
}

fn parse_cip_request(bytes: &[u8]) -> Option<ParsedCipRequest> {
	if bytes.len() < 2 {
		return None;
	}
	let service = bytes[0];
	let words = bytes[1] as usize;
	let path_end = 2 + words * 2;
	if bytes.len() < path_end {
		return None;
	}
	Some(ParsedCipRequest {
		service,
		path: bytes[2..path_end].to_vec(),
		data: bytes[path_end..].to_vec(),
	})
}

/// Walks a logical EPATH into `(segment_type, value)` pairs — just enough
/// to recover class/instance/attribute for the mock's dispatch. Real
/// originator code never needs to decode its own outgoing paths; this
/// exists solely to let the mock target answer requests.
fn decode_logical_segments(path: &[u8]) -> Vec<(u8, u32)> {
	let mut segments = Vec::new();
	let mut i = 0;
	while i < path.len() {
		match path[i] {
			t @ (0x20 | 0x24 | 0x30 | 0x2C) if i + 1 < path.len() => {
				segments.push((t, path[i + 1] as u32));
				i += 2;
			}
			t @ (0x21 | 0x25 | 0x31 | 0x2D) if i + 3 < path.len() => {
				let value = u16::from_le_bytes([path[i + 2], path[i + 3]]) as u32;
				segments.push((t, value));
				i += 4;
			}
			_ => i += 1,
		}
	}
	segments
}

fn find_segment(segments: &[(u8, u32)], a: u8, b: u8) -> Option<u32> {
	segments.iter().find(|(t, _)| *t == a || *t == b).map(|(_, v)| *v)
}

async fn dispatch_cip_request(state: &Arc<Mutex<SharedState>>, request: &ParsedCipRequest) -> (u8, Vec<u8>) {
	match request.service {
		s if s == cip::service::GET_ATTRIBUTE_SINGLE => {
			let segments = decode_logical_segments(&request.path);
			let instance = find_segment(&segments, 0x24, 0x25);
			let attribute = find_segment(&segments, 0x30, 0x31);
			match (instance, attribute) {
				(Some(0), Some(2)) => {
					let guard = state.lock().await;
					match guard.max_instance {
						Some(max) => (cip::status::SUCCESS, max.to_le_bytes().to_vec()),
						None => (cip::status::OBJECT_DOES_NOT_EXIST, Vec::new()),
					}
				}
				(Some(instance), Some(3)) => {
					let guard = state.lock().await;
					match guard.assemblies.get(&(instance as u16)) {
						Some(data) => (cip::status::SUCCESS, data.clone()),
						None => (cip::status::OBJECT_DOES_NOT_EXIST, Vec::new()),
					}
				}
				_ => (cip::status::PATH_SEGMENT_ERROR, Vec::new()),
			}
		}
		s if s == cip::service::SET_ATTRIBUTE_SINGLE => {
			let segments = decode_logical_segments(&request.path);
			match find_segment(&segments, 0x24, 0x25) {
				Some(instance) => {
					state.lock().await.assemblies.insert(instance as u16, request.data.clone());
					(cip::status::SUCCESS, Vec::new())
				}
				None => (cip::status::PATH_SEGMENT_ERROR, Vec::new()),
			}
		}
		s if s == cip::service::READ_TAG => {
			let guard = state.lock().await;
			match guard.tags.get(&request.path) {
				Some(value) => {
					let mut data = value.data_type().wire_code().to_le_bytes().to_vec();
					data.extend_from_slice(&value.encode());
					(cip::status::SUCCESS, data)
				}
				None => (cip::status::OBJECT_DOES_NOT_EXIST, Vec::new()),
			}
		}
		s if s == cip::service::WRITE_TAG => {
			if request.data.len() < 4 {
				return (cip::status::NOT_ENOUGH_DATA, Vec::new());
			}
			let cip_type = u16::from_le_bytes([request.data[0], request.data[1]]);
			let Some(data_type) = CipDataType::from_wire_code(cip_type) else {
				return (cip::status::INVALID_ATTRIBUTE_VALUE, Vec::new());
			};
			let Ok(value) = CipValue::decode(data_type, &request.data[4..]) else {
				return (cip::status::DATA_SIZE_MISMATCH, Vec::new());
			};
			state.lock().await.tags.insert(request.path.clone(), value);
			(cip::status::SUCCESS, Vec::new())
		}
		_ => (cip::status::SERVICE_NOT_SUPPORTED, Vec::new()),
	}
}

fn encode_cip_response(service: u8, general_status: u8, data: &[u8]) -> Vec<u8> {
	let mut buf = Vec::with_capacity(4 + data.len());
	buf.push(service | cip::RESPONSE_FLAG);
	buf.push(0); // reserved
	buf.push(general_status);
	buf.push(0); // additional_status_size (words)
	buf.extend_from_slice(data);
	buf
}

async fn handle_tcp_connection(mut stream: TcpStream, state: Arc<Mutex<SharedState>>) -> std::io::Result<()> {
	let mut session_handle: u32 = 0;

	loop {
		let (header, payload) = read_one_frame(&mut stream).await?;

		match header.command {
			command::REGISTER_SESSION => {
				session_handle = 0xC0FFEE + rand_salt();
				let response_payload = vec![1, 0, 0, 0];
				let response_header = EncapsulationHeader::new(command::REGISTER_SESSION, response_payload.len(), session_handle);
				let mut packet = response_header.encode();
				packet.extend_from_slice(&response_payload);
				stream.write_all(&packet).await?;
			}
			command::UNREGISTER_SESSION => break,
			command::SEND_RR_DATA => {
				if payload.len() < 6 {
					continue;
				}
				let Ok(cpf_items) = decode_cpf(&payload[6..]) else { continue };
				let Some(unconnected) = find_item(&cpf_items, item_type::UNCONNECTED_DATA) else {
					continue;
				};
				let Some(request) = parse_cip_request(&unconnected.data) else { continue };

				let (status, response_data) = dispatch_cip_request(&state, &request).await;
				state.lock().await.last_request = Some(CapturedRequest {
					service: request.service,
					path: request.path.clone(),
					data: request.data.clone(),
				});

				let cip_response = encode_cip_response(request.service, status, &response_data);
				let items = vec![CpfItem::null_address(), CpfItem::new(item_type::UNCONNECTED_DATA, cip_response)];
				let mut response_payload = Vec::new();
				response_payload.extend_from_slice(&0u32.to_le_bytes());
				response_payload.extend_from_slice(&0u16.to_le_bytes());
				response_payload.extend_from_slice(&encode_cpf(&items));

				let response_header = EncapsulationHeader::new(command::SEND_RR_DATA, response_payload.len(), session_handle);
				let mut packet = response_header.encode();
				packet.extend_from_slice(&response_payload);
				stream.write_all(&packet).await?;
			}
			_ => {}
		}
	}

	Ok(())
}

fn rand_salt() -> u32 {
	common::rand::rand_u32().unwrap_or(0)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::session;
	use std::time::Duration;

	#[tokio::test]
	async fn mock_target_answers_register_session() {
		let target = MockEnipTarget::spawn_tcp().await;
		let mut stream = TcpStream::connect(target.tcp_addr()).await.unwrap();
		let handle = session::register_session(&mut stream, Duration::from_secs(1)).await.unwrap();
		assert_ne!(handle, 0);
	}

	#[tokio::test]
	async fn distinct_mock_targets_get_distinct_loopback_addresses() {
		let a = MockEnipTarget::spawn_tcp().await;
		let b = MockEnipTarget::spawn_tcp().await;
		assert_ne!(a.ip(), b.ip());
	}
}
