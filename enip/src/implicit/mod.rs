//! Implicit connection engine (§4.5): ForwardOpen/ForwardClose and the
//! `ImplicitConnection` record the cyclic I/O tasks in [`cyclic`] operate
//! on.

pub mod cyclic;

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use bitflags::bitflags;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::cip::{self, CipRequest, CipResponse};
use crate::epath;
use crate::error::{EnipError, Result};
use crate::session;
use crate::socket;
use crate::wire::{command, decode_cpf, encode_cpf, find_item, item_type, CpfItem, EncapsulationHeader};

/// `state` transitions monotonically Idle -> Opening -> Open -> Closing ->
/// Idle (§3 invariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
	Idle,
	Opening,
	Open,
	Closing,
}

/// Parameters a caller supplies to `implicit_open` (§6).
#[derive(Debug, Clone)]
pub struct ForwardOpenParams {
	pub consumed_instance: u16,
	pub produced_instance: u16,
	pub consumed_size: u16,
	pub produced_size: u16,
	/// Requested Packet Interval. A single value drives both O→T and T→O
	/// streams in v1 (§9 open question: kept as one value; ENIP permits
	/// independent RPIs as a future extension point).
	pub rpi_ms: u32,
	pub exclusive_owner: bool,
	pub originator_vendor_id: u16,
}

impl Default for ForwardOpenParams {
	fn default() -> Self {
		Self {
			consumed_instance: 150,
			produced_instance: 100,
			consumed_size: 4,
			produced_size: 4,
			rpi_ms: 100,
			exclusive_owner: true,
			originator_vendor_id: 1,
		}
	}
}

/// User callback invoked with each accepted T→O datagram (§3, §6, §9
/// "callback with borrowed data"). The byte slice is only valid for the
/// duration of the call — implementations needing to retain it must copy.
pub type DataCallback = Arc<dyn Fn(Ipv4Addr, u16, &[u8]) + Send + Sync>;

const PRIORITY_TIME_TICK: u8 = 0x2A;
const TIMEOUT_TICKS: u8 = 0x04;
const SENTINEL_O_TO_T_ID: u32 = 0xFFFF_0016;
const SENTINEL_T_TO_O_ID: u32 = 0xFFFF_0017;

bitflags! {
	/// Bits 9-15 of a ForwardOpen network connection parameters word
	/// (§4.5); bits 0-8 (payload size) are ORed in separately as a raw
	/// value rather than modeled as flags, the same way the teacher's
	/// `NetlinkFlags` coexists with non-flag header fields in the same
	/// word.
	#[derive(Debug)]
	struct ConnectionParamFlags: u16 {
		const VARIABLE_SIZE = 1 << 9;
		const PRIORITY_SCHEDULED = 2 << 10;
		const CONNECTION_TYPE_MULTICAST = 1 << 13;
		const CONNECTION_TYPE_POINT_TO_POINT = 2 << 13;
		const REDUNDANT_OWNER = 1 << 15;
	}
}

/// Whether the O→T payload size accounts for the run/idle header + CIP
/// sequence overhead, or just the raw assembly size (§4.5 ForwardOpen
/// 0x0315 retry: "switched from size+overhead to size only").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SizeMode {
	WithOverhead,
	SizeOnly,
}

/// Whether the network connection parameters mark the connection variable
/// or fixed length (§4.5 second 0x0315 retry).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FramingMode {
	Variable,
	Fixed,
}

fn network_connection_params(payload_size: u16, framing: FramingMode, connection_type: ConnectionParamFlags, redundant_owner: bool) -> u16 {
	let mut flags = ConnectionParamFlags::PRIORITY_SCHEDULED | connection_type;
	if framing == FramingMode::Variable {
		flags |= ConnectionParamFlags::VARIABLE_SIZE;
	}
	if redundant_owner {
		flags |= ConnectionParamFlags::REDUNDANT_OWNER;
	}
	(payload_size & 0x01FF) | flags.bits()
}

fn o_to_t_payload_size(consumed_size: u16, size_mode: SizeMode) -> u16 {
	match size_mode {
		SizeMode::WithOverhead => consumed_size + 6,
		SizeMode::SizeOnly => consumed_size,
	}
}

fn t_to_o_payload_size(produced_size: u16) -> u16 {
	produced_size + 2
}

struct ForwardOpenAttempt {
	o_to_t_id: u32,
	t_to_o_id: u32,
	connection_serial: u16,
	originator_serial: u32,
}

fn build_forward_open_request(
	params: &ForwardOpenParams,
	attempt: &ForwardOpenAttempt,
	size_mode: SizeMode,
	framing: FramingMode,
) -> CipRequest {
	let mut data = Vec::new();
	data.push(PRIORITY_TIME_TICK);
	data.push(TIMEOUT_TICKS);
	data.extend_from_slice(&attempt.o_to_t_id.to_le_bytes());
	data.extend_from_slice(&attempt.t_to_o_id.to_le_bytes());
	data.extend_from_slice(&attempt.connection_serial.to_le_bytes());
	data.extend_from_slice(&params.originator_vendor_id.to_le_bytes());
	data.extend_from_slice(&attempt.originator_serial.to_le_bytes());
	data.push(0); // connection_timeout_multiplier
	data.extend_from_slice(&[0u8; 3]); // reserved

	data.extend_from_slice(&(params.rpi_ms * 1000).to_le_bytes()); // O->T RPI, microseconds
	let o_to_t_params = network_connection_params(
		o_to_t_payload_size(params.consumed_size, size_mode),
		framing,
		ConnectionParamFlags::CONNECTION_TYPE_POINT_TO_POINT,
		true,
	);
	data.extend_from_slice(&o_to_t_params.to_le_bytes());

	data.extend_from_slice(&(params.rpi_ms * 1000).to_le_bytes()); // T->O RPI, microseconds
	let t_to_o_connection_type = if params.exclusive_owner {
		ConnectionParamFlags::CONNECTION_TYPE_POINT_TO_POINT
	} else {
		ConnectionParamFlags::CONNECTION_TYPE_MULTICAST
	};
	let t_to_o_params = network_connection_params(
		t_to_o_payload_size(params.produced_size),
		framing,
		t_to_o_connection_type,
		true,
	);
	data.extend_from_slice(&t_to_o_params.to_le_bytes());

	data.push(0x01); // transport_class_and_trigger: Class 1, cyclic

	let path = epath::encode_epath_connection_points(params.consumed_instance, params.produced_instance);
	data.push((path.len() / 2) as u8);
	data.extend_from_slice(&path);

	CipRequest::new(cip::service::FORWARD_OPEN, connection_manager_path(), data)
}

fn connection_manager_path() -> Vec<u8> {
	epath::encode_epath_class_instance(epath::class::CONNECTION_MANAGER, 1)
}

/// CIP extended status 0x0315: Invalid Connection Parameters — the only
/// code this engine retries automatically (§4.5).
const EXT_STATUS_INVALID_CONNECTION_PARAMETERS: u16 = 0x0315;

/// CIP extended status 0x0106: Ownership Conflict — another originator
/// already owns this connection; surfaced as a distinct error rather than
/// the generic ForwardOpen failure (§4.5).
const EXT_STATUS_OWNERSHIP_CONFLICT: u16 = 0x0106;

/// Outcome of a successful ForwardOpen: the connection IDs the target
/// assigned, which the originator must adopt (§4.5).
pub struct ForwardOpenOutcome {
	pub o_to_t_id: u32,
	pub t_to_o_id: u32,
	pub connection_serial: u16,
	pub originator_serial: u32,
}

/// Turns a failed (non-retried) ForwardOpen response into the error a
/// caller sees: Ownership Conflict is surfaced distinctly, everything else
/// falls through to the generic ForwardOpen failure (§4.5).
fn forward_open_failure_err(response: &CipResponse) -> EnipError {
	if response.extended_status_word() == Some(EXT_STATUS_OWNERSHIP_CONFLICT) {
		EnipError::OwnershipConflict
	} else {
		EnipError::ForwardOpenFailed {
			status: response.general_status,
			extended: response.extended_status.clone(),
		}
	}
}

async fn send_connection_manager_request(peer: Ipv4Addr, request: CipRequest, timeout: Duration) -> Result<CipResponse> {
	let mut stream = socket::connect(peer, timeout).await?;
	let handle = session::register_session(&mut stream, timeout).await?;

	let result = send_unconnected(&mut stream, handle, request, timeout).await;

	let _ = session::unregister_session(&mut stream, handle).await;
	result
}

async fn send_unconnected(
	stream: &mut tokio::net::TcpStream,
	session_handle: u32,
	request: CipRequest,
	timeout: Duration,
) -> Result<CipResponse> {
	let items = vec![
		CpfItem::null_address(),
		CpfItem::new(item_type::UNCONNECTED_DATA, request.encode()),
	];

	let mut payload = Vec::new();
	payload.extend_from_slice(&0u32.to_le_bytes());
	payload.extend_from_slice(&(timeout.as_millis().min(u16::MAX as u128) as u16).to_le_bytes());
	payload.extend_from_slice(&encode_cpf(&items));

	let header = EncapsulationHeader::new(command::SEND_RR_DATA, payload.len(), session_handle);
	let mut packet = header.encode();
	packet.extend_from_slice(&payload);
	socket::write_all(stream, &packet).await?;

	let (_header, response_payload) = socket::read_frame(stream, command::SEND_RR_DATA, timeout).await?;
	if response_payload.len() < 6 {
		return Err(EnipError::Protocol("SendRRData response payload too short".into()));
	}
	let cpf_items = decode_cpf(&response_payload[6..])?;
	let unconnected = find_item(&cpf_items, item_type::UNCONNECTED_DATA)
		.ok_or_else(|| EnipError::Protocol("response missing Unconnected Data item".into()))?;
	CipResponse::parse(&unconnected.data)
}

/// Performs ForwardOpen against `peer`, retrying up to twice on extended
/// status 0x0315 with different size/framing encodings (§4.5).
///
/// `allocate_sequential_id` supplies the next originator-assigned
/// connection id pair when `params.exclusive_owner` is true; it is not
/// consulted otherwise (sentinel IDs are used and the target assigns
/// real ones).
pub async fn forward_open(
	peer: Ipv4Addr,
	params: &ForwardOpenParams,
	allocate_sequential_ids: impl Fn() -> (u32, u32),
	timeout: Duration,
) -> Result<ForwardOpenOutcome> {
	let connection_serial = common::rand::rand_u16().map_err(EnipError::Io)?;
	let originator_serial = common::rand::rand_u32().map_err(EnipError::Io)?;

	let (o_to_t_id, t_to_o_id) = if params.exclusive_owner {
		allocate_sequential_ids()
	} else {
		(SENTINEL_O_TO_T_ID, SENTINEL_T_TO_O_ID)
	};

	let attempt = ForwardOpenAttempt {
		o_to_t_id,
		t_to_o_id,
		connection_serial,
		originator_serial,
	};

	let attempts = [
		(SizeMode::WithOverhead, FramingMode::Variable),
		(SizeMode::SizeOnly, FramingMode::Variable),
		(SizeMode::SizeOnly, FramingMode::Fixed),
	];

	let mut last_err = None;
	for (index, (size_mode, framing)) in attempts.iter().enumerate() {
		let request = build_forward_open_request(params, &attempt, *size_mode, *framing);
		let response = match send_connection_manager_request(peer, request, timeout).await {
			Ok(response) => response,
			Err(err) => {
				last_err = Some(err);
				continue;
			}
		};

		if response.is_success() {
			let data = response.data;
			if data.len() < 8 {
				return Err(EnipError::Protocol("ForwardOpen response too short for connection ids".into()));
			}
			return Ok(ForwardOpenOutcome {
				o_to_t_id: u32::from_le_bytes(data[0..4].try_into().unwrap()),
				t_to_o_id: u32::from_le_bytes(data[4..8].try_into().unwrap()),
				connection_serial,
				originator_serial,
			});
		}

		let extended_word = response.extended_status_word().unwrap_or(0);
		let should_retry = extended_word == EXT_STATUS_INVALID_CONNECTION_PARAMETERS && index + 1 < attempts.len();

		if !should_retry {
			return Err(forward_open_failure_err(&response));
		}

		last_err = Some(EnipError::ForwardOpenFailed {
			status: response.general_status,
			extended: response.extended_status,
		});
	}

	Err(last_err.unwrap_or(EnipError::ForwardOpenFailed {
		status: 0xFF,
		extended: Vec::new(),
	}))
}

/// Performs ForwardClose against `peer` for an already-open connection
/// (§4.5). Expected reply service is `0x4E | 0x80`; `general_status == 0`
/// means success.
pub async fn forward_close(
	peer: Ipv4Addr,
	params: &ForwardOpenParams,
	connection_serial: u16,
	originator_serial: u32,
	timeout: Duration,
) -> Result<()> {
	let mut data = Vec::new();
	data.push(PRIORITY_TIME_TICK);
	data.push(TIMEOUT_TICKS);
	data.extend_from_slice(&connection_serial.to_le_bytes());
	data.extend_from_slice(&params.originator_vendor_id.to_le_bytes());
	data.extend_from_slice(&originator_serial.to_le_bytes());

	let path = epath::encode_epath_connection_points(params.consumed_instance, params.produced_instance);
	data.push((path.len() / 2) as u8);
	data.push(0); // reserved

	let mut request_data = data;
	request_data.extend_from_slice(&path);

	let request = CipRequest::new(cip::service::FORWARD_CLOSE, connection_manager_path(), request_data);
	let response = send_connection_manager_request(peer, request, timeout).await?;
	response.into_data()?;
	Ok(())
}

/// The live state of one open implicit connection (§3 `ImplicitConnection`).
///
/// No TCP socket is stored here: ForwardOpen/ForwardClose each use their
/// own short-lived session, the same way explicit requests do (§4.2-§4.3);
/// only the UDP data socket and cyclic-task state persist for the life of
/// the connection.
pub struct ImplicitConnection {
	pub peer: Ipv4Addr,
	pub params: ForwardOpenParams,
	pub o_to_t_id: u32,
	pub t_to_o_id: u32,
	pub connection_serial: u16,
	pub originator_serial: u32,
	pub(crate) udp_socket: Arc<UdpSocket>,
	state: StdMutex<ConnectionState>,
	last_packet_received: StdMutex<Instant>,
	last_heartbeat_sent: StdMutex<Instant>,
	pub(crate) valid: AtomicBool,
	pub(crate) sequence_counter: AtomicU32,
	pub(crate) dropped_datagram_count: AtomicU64,
	pub(crate) o_to_t_buffer: StdMutex<Vec<u8>>,
	pub(crate) callback: DataCallback,
	tasks: StdMutex<Vec<JoinHandle<()>>>,
	pub(crate) logger: slog::Logger,
}

impl ImplicitConnection {
	pub fn new(
		peer: Ipv4Addr,
		params: ForwardOpenParams,
		outcome: ForwardOpenOutcome,
		udp_socket: Arc<UdpSocket>,
		callback: DataCallback,
		logger: slog::Logger,
	) -> Self {
		let buffer = vec![0u8; params.consumed_size as usize];
		Self {
			peer,
			o_to_t_id: outcome.o_to_t_id,
			t_to_o_id: outcome.t_to_o_id,
			connection_serial: outcome.connection_serial,
			originator_serial: outcome.originator_serial,
			params,
			udp_socket,
			state: StdMutex::new(ConnectionState::Opening),
			last_packet_received: StdMutex::new(Instant::now()),
			last_heartbeat_sent: StdMutex::new(Instant::now()),
			valid: AtomicBool::new(true),
			sequence_counter: AtomicU32::new(0),
			dropped_datagram_count: AtomicU64::new(0),
			o_to_t_buffer: StdMutex::new(buffer),
			callback,
			tasks: StdMutex::new(Vec::new()),
			logger,
		}
	}

	#[cfg(test)]
	pub(crate) fn new_for_test(peer: Ipv4Addr, params: ForwardOpenParams, state: ConnectionState) -> Self {
		// Test-only constructor for exercising `table::ConnectionTable`
		// without a real ForwardOpen round trip or UDP socket bind.
		let std_socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
		std_socket.set_nonblocking(true).unwrap();
		let udp_socket = Arc::new(UdpSocket::from_std(std_socket).unwrap());
		let buffer = vec![0u8; params.consumed_size as usize];
		Self {
			peer,
			o_to_t_id: 1,
			t_to_o_id: 2,
			connection_serial: 0,
			originator_serial: 0,
			params,
			udp_socket,
			state: StdMutex::new(state),
			last_packet_received: StdMutex::new(Instant::now()),
			last_heartbeat_sent: StdMutex::new(Instant::now()),
			valid: AtomicBool::new(true),
			sequence_counter: AtomicU32::new(0),
			dropped_datagram_count: AtomicU64::new(0),
			o_to_t_buffer: StdMutex::new(buffer),
			callback: Arc::new(|_, _, _| {}),
			tasks: StdMutex::new(Vec::new()),
			logger: slog::Logger::root(slog::Discard, slog::o!()),
		}
	}

	pub fn state(&self) -> ConnectionState {
		*self.state.lock().unwrap()
	}

	pub fn set_state(&self, new_state: ConnectionState) {
		*self.state.lock().unwrap() = new_state;
	}

	pub fn is_valid(&self) -> bool {
		self.valid.load(Ordering::Acquire)
	}

	pub fn invalidate(&self) {
		self.valid.store(false, Ordering::Release);
	}

	pub fn last_packet_received(&self) -> Instant {
		*self.last_packet_received.lock().unwrap()
	}

	pub fn touch_last_packet_received(&self) {
		*self.last_packet_received.lock().unwrap() = Instant::now();
	}

	pub fn last_heartbeat_sent(&self) -> Instant {
		*self.last_heartbeat_sent.lock().unwrap()
	}

	pub fn touch_last_heartbeat_sent(&self) {
		*self.last_heartbeat_sent.lock().unwrap() = Instant::now();
	}

	/// Watchdog timeout threshold: `max(20 * RPI, 10s)` (§4.5).
	pub fn watchdog_timeout(&self) -> Duration {
		Duration::from_millis((self.params.rpi_ms as u64) * 20).max(Duration::from_secs(10))
	}

	/// Replaces the O→T producer buffer, zero-padding short writes up to
	/// `consumed_size` (§3 invariant).
	pub fn write_o_to_t_data(&self, bytes: &[u8]) -> Result<()> {
		let size = self.params.consumed_size as usize;
		if bytes.len() > size {
			return Err(EnipError::InvalidArgument(format!(
				"write of {} bytes exceeds consumed assembly size {}",
				bytes.len(),
				size
			)));
		}
		let mut buffer = self.o_to_t_buffer.lock().unwrap();
		buffer.clear();
		buffer.extend_from_slice(bytes);
		buffer.resize(size, 0);
		Ok(())
	}

	/// Copies the current O→T producer buffer into `buf`, up to
	/// `buf.len()` bytes, and returns the number of bytes copied (§6
	/// `implicit_read_o_to_t_data`). This reflects whatever the producer
	/// task is currently sending — either the caller's last
	/// `write_o_to_t_data`, or the zero-padded default.
	pub fn read_o_to_t_data(&self, buf: &mut [u8]) -> usize {
		let buffer = self.o_to_t_buffer.lock().unwrap();
		let len = buffer.len().min(buf.len());
		buf[..len].copy_from_slice(&buffer[..len]);
		len
	}

	pub fn register_tasks(&self, tasks: Vec<JoinHandle<()>>) {
		*self.tasks.lock().unwrap() = tasks;
	}

	pub fn abort_tasks(&self) {
		for task in self.tasks.lock().unwrap().drain(..) {
			task.abort();
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn network_connection_params_sets_variable_priority_and_ptp() {
		let value = network_connection_params(46, FramingMode::Variable, ConnectionParamFlags::CONNECTION_TYPE_POINT_TO_POINT, true);
		assert_eq!(value & 0x01FF, 46);
		assert_ne!(value & (1 << 9), 0);
		assert_eq!((value >> 10) & 0x03, 2);
		assert_eq!(value & 0x8000, 0x8000);
	}

	#[test]
	fn forward_open_failure_err_maps_ownership_conflict_extended_status() {
		let response = CipResponse {
			service: 0xCE,
			general_status: cip::status::RESOURCE_UNAVAILABLE,
			extended_status: EXT_STATUS_OWNERSHIP_CONFLICT.to_le_bytes().to_vec(),
			data: Vec::new(),
		};
		assert!(matches!(forward_open_failure_err(&response), EnipError::OwnershipConflict));
	}

	#[test]
	fn forward_open_failure_err_falls_through_for_other_statuses() {
		let response = CipResponse {
			service: 0xCE,
			general_status: cip::status::RESOURCE_UNAVAILABLE,
			extended_status: Vec::new(),
			data: Vec::new(),
		};
		match forward_open_failure_err(&response) {
			EnipError::ForwardOpenFailed { status, .. } => assert_eq!(status, cip::status::RESOURCE_UNAVAILABLE),
			other => panic!("unexpected error variant: {other:?}"),
		}
	}

	#[test]
	fn o_to_t_payload_size_includes_overhead_by_default() {
		assert_eq!(o_to_t_payload_size(40, SizeMode::WithOverhead), 46);
		assert_eq!(o_to_t_payload_size(40, SizeMode::SizeOnly), 40);
	}

	#[test]
	fn t_to_o_payload_size_adds_cip_sequence_only() {
		assert_eq!(t_to_o_payload_size(72), 74);
	}

	#[test]
	fn forward_open_request_matches_scenario_f_path() {
		let params = ForwardOpenParams {
			consumed_instance: 150,
			produced_instance: 100,
			consumed_size: 40,
			produced_size: 72,
			rpi_ms: 100,
			exclusive_owner: true,
			originator_vendor_id: 1,
		};
		let attempt = ForwardOpenAttempt {
			o_to_t_id: 1,
			t_to_o_id: 2,
			connection_serial: 0x1234,
			originator_serial: 0xAABB_CCDD,
		};
		let request = build_forward_open_request(&params, &attempt, SizeMode::WithOverhead, FramingMode::Variable);
		let encoded = request.encode();
		assert_eq!(encoded[0], cip::service::FORWARD_OPEN);
	}

	#[test]
	fn watchdog_timeout_floors_at_ten_seconds() {
		let params = ForwardOpenParams {
			rpi_ms: 10,
			..Default::default()
		};
		let connection = ImplicitConnection::new_for_test(
			Ipv4Addr::new(10, 0, 0, 1),
			params,
			ConnectionState::Open,
		);
		assert_eq!(connection.watchdog_timeout(), Duration::from_secs(10));
	}

	#[test]
	fn watchdog_timeout_scales_above_the_floor() {
		let params = ForwardOpenParams {
			rpi_ms: 1000,
			..Default::default()
		};
		let connection = ImplicitConnection::new_for_test(
			Ipv4Addr::new(10, 0, 0, 1),
			params,
			ConnectionState::Open,
		);
		assert_eq!(connection.watchdog_timeout(), Duration::from_secs(20));
	}

	#[test]
	fn write_o_to_t_data_zero_pads_short_writes() {
		let params = ForwardOpenParams {
			consumed_size: 4,
			..Default::default()
		};
		let connection = ImplicitConnection::new_for_test(Ipv4Addr::new(10, 0, 0, 1), params, ConnectionState::Open);
		connection.write_o_to_t_data(&[0x01]).unwrap();
		assert_eq!(*connection.o_to_t_buffer.lock().unwrap(), vec![0x01, 0x00, 0x00, 0x00]);
	}

	#[test]
	fn write_o_to_t_data_rejects_oversized_writes() {
		let params = ForwardOpenParams {
			consumed_size: 2,
			..Default::default()
		};
		let connection = ImplicitConnection::new_for_test(Ipv4Addr::new(10, 0, 0, 1), params, ConnectionState::Open);
		assert!(connection.write_o_to_t_data(&[1, 2, 3]).is_err());
	}

	#[test]
	fn read_o_to_t_data_reflects_last_write() {
		let params = ForwardOpenParams {
			consumed_size: 4,
			..Default::default()
		};
		let connection = ImplicitConnection::new_for_test(Ipv4Addr::new(10, 0, 0, 1), params, ConnectionState::Open);
		connection.write_o_to_t_data(&[0xAA, 0xBB]).unwrap();

		let mut buf = [0u8; 4];
		let read = connection.read_o_to_t_data(&mut buf);
		assert_eq!(read, 4);
		assert_eq!(buf, [0xAA, 0xBB, 0x00, 0x00]);
	}

	#[test]
	fn read_o_to_t_data_truncates_to_caller_buffer() {
		let params = ForwardOpenParams {
			consumed_size: 4,
			..Default::default()
		};
		let connection = ImplicitConnection::new_for_test(Ipv4Addr::new(10, 0, 0, 1), params, ConnectionState::Open);

		let mut buf = [0u8; 2];
		let read = connection.read_o_to_t_data(&mut buf);
		assert_eq!(read, 2);
	}
}
