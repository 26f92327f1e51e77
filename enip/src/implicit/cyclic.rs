//! The three cooperating cyclic I/O tasks per open connection (§4.5, §9
//! "three cooperating tasks per connection"): producer (O→T), consumer
//! (T→O), and watchdog. They coordinate only through the shared `valid`
//! flag, the mutex-protected O→T buffer, and the user callback — never by
//! holding a handle to one another.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::implicit::{ConnectionState, ImplicitConnection};
use crate::socket;
use crate::wire::{decode_cpf, encode_cpf, item_type, CpfItem};

/// Run/idle header value for a "Run" connection (§4.5). This stack never
/// produces Idle (`0`) — the originator is always actively producing.
const RUN_IDLE_RUN: u32 = 1;

fn build_o_to_t_datagram(o_to_t_id: u32, sequence: u32, payload: &[u8]) -> Vec<u8> {
	let mut connected_data = Vec::with_capacity(6 + payload.len());
	connected_data.extend_from_slice(&(sequence as u16).to_le_bytes());
	connected_data.extend_from_slice(&RUN_IDLE_RUN.to_le_bytes());
	connected_data.extend_from_slice(payload);

	let mut address_data = Vec::with_capacity(8);
	address_data.extend_from_slice(&o_to_t_id.to_le_bytes());
	address_data.extend_from_slice(&sequence.to_le_bytes());

	let items = vec![
		CpfItem::new(item_type::SEQUENCED_ADDRESS, address_data),
		CpfItem::new(item_type::CONNECTED_DATA, connected_data),
	];
	encode_cpf(&items)
}

/// Producer (O→T): sends one UDP datagram every `min(RPI, 1000ms)` (§4.5,
/// §5 "1000ms producer cap ensures at-least-1Hz liveness").
async fn producer_task(connection: Arc<ImplicitConnection>) {
	let interval = Duration::from_millis(connection.params.rpi_ms.min(1000) as u64);
	let target = SocketAddr::from((connection.peer, socket::IMPLICIT_UDP_PORT));

	while connection.is_valid() {
		tokio::time::sleep(interval).await;
		if !connection.is_valid() {
			break;
		}

		let payload = connection.o_to_t_buffer.lock().unwrap().clone();
		let sequence = connection.sequence_counter.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
		let datagram = build_o_to_t_datagram(connection.o_to_t_id, sequence, &payload);

		if connection.udp_socket.send_to(&datagram, target).await.is_ok() {
			connection.touch_last_heartbeat_sent();
		}
	}
}

fn record_dropped_datagram(connection: &ImplicitConnection, reason: &str) {
	let count = connection.dropped_datagram_count.fetch_add(1, Ordering::Relaxed) + 1;
	if count % 100 == 0 {
		slog::warn!(connection.logger, "dropped cyclic datagram";
			"peer" => connection.peer.to_string(), "reason" => reason, "count" => count);
	}
}

fn handle_inbound_datagram(connection: &ImplicitConnection, data: &[u8], from: SocketAddr) {
	if from.ip() != IpAddr::V4(connection.peer) {
		record_dropped_datagram(connection, "unexpected source address");
		return;
	}

	let Ok(items) = decode_cpf(data) else {
		record_dropped_datagram(connection, "malformed CPF frame");
		return;
	};

	let address_item = items
		.iter()
		.find(|item| item.item_type == item_type::SEQUENCED_ADDRESS || item.item_type == item_type::CONNECTED_ADDRESS);
	let Some(address_item) = address_item else {
		record_dropped_datagram(connection, "missing address item");
		return;
	};
	if address_item.data.len() < 4 {
		record_dropped_datagram(connection, "truncated address item");
		return;
	}
	let connection_id = u32::from_le_bytes(address_item.data[0..4].try_into().unwrap());
	if connection_id != connection.t_to_o_id {
		record_dropped_datagram(connection, "connection id mismatch");
		return;
	}

	let Some(data_item) = items.iter().find(|item| item.item_type == item_type::CONNECTED_DATA) else {
		record_dropped_datagram(connection, "missing connected data item");
		return;
	};

	let produced_size = connection.params.produced_size as usize;
	let payload: &[u8] = if data_item.data.len() == produced_size + 2 {
		&data_item.data[2..]
	} else {
		&data_item.data
	};

	connection.touch_last_packet_received();
	(connection.callback)(connection.peer, connection.params.produced_instance, payload);
}

/// Consumer (T→O): polls the UDP socket every 10ms so it can observe
/// `valid` going false promptly (§4.5, §9).
async fn consumer_task(connection: Arc<ImplicitConnection>) {
	let mut buf = vec![0u8; 1500];

	while connection.is_valid() {
		match tokio::time::timeout(Duration::from_millis(10), connection.udp_socket.recv_from(&mut buf)).await {
			Ok(Ok((len, from))) => handle_inbound_datagram(&connection, &buf[..len], from),
			Ok(Err(_)) => {}
			Err(_) => {} // 10ms poll tick with nothing pending
		}
	}
}

/// Watchdog: checks `now - last_packet_received` every 100ms against
/// `max(20*RPI, 10s)`; on timeout transitions to `Closing` and clears
/// `valid` so the other two tasks observe it and exit (§4.5).
async fn watchdog_task(connection: Arc<ImplicitConnection>) {
	while connection.is_valid() {
		tokio::time::sleep(Duration::from_millis(100)).await;
		if !connection.is_valid() {
			break;
		}

		if connection.last_packet_received().elapsed() > connection.watchdog_timeout() {
			connection.set_state(ConnectionState::Closing);
			connection.invalidate();
			break;
		}
	}
}

/// Spawns the three cyclic tasks for `connection` and returns their
/// handles so the caller can abort them on an unclean shutdown.
pub fn spawn(connection: Arc<ImplicitConnection>) -> Vec<JoinHandle<()>> {
	vec![
		tokio::spawn(producer_task(connection.clone())),
		tokio::spawn(consumer_task(connection.clone())),
		tokio::spawn(watchdog_task(connection)),
	]
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::implicit::ForwardOpenParams;
	use std::net::Ipv4Addr;
	use std::sync::Mutex;

	#[test]
	fn o_to_t_datagram_matches_scenario_f_size() {
		// consumed_size=40: 2 (item_count) + 12 (sequenced address item) +
		// 4 (connected data item header) + 2 (cip seq) + 4 (run/idle) + 40
		// (payload) = 64 bytes.
		let datagram = build_o_to_t_datagram(1, 1, &[0u8; 40]);
		assert_eq!(datagram.len(), 64);
	}

	#[test]
	fn o_to_t_datagram_carries_increasing_sequence() {
		let first = build_o_to_t_datagram(1, 5, &[0u8; 4]);
		let items = decode_cpf(&first).unwrap();
		let address = items.iter().find(|i| i.item_type == item_type::SEQUENCED_ADDRESS).unwrap();
		let sequence = u32::from_le_bytes(address.data[4..8].try_into().unwrap());
		assert_eq!(sequence, 5);
	}

	#[test]
	fn handle_inbound_datagram_drops_wrong_peer() {
		let params = ForwardOpenParams {
			produced_size: 4,
			..Default::default()
		};
		let connection = ImplicitConnection::new_for_test(Ipv4Addr::new(10, 0, 0, 1), params, ConnectionState::Open);
		let before = connection.last_packet_received();

		let datagram = build_o_to_t_datagram(connection.t_to_o_id, 1, &[0u8; 4]);
		let wrong_peer = SocketAddr::from((Ipv4Addr::new(10, 0, 0, 99), 2222));
		handle_inbound_datagram(&connection, &datagram, wrong_peer);

		assert_eq!(connection.last_packet_received(), before);
	}

	#[test]
	fn handle_inbound_datagram_accepts_matching_connection_id_and_invokes_callback() {
		let params = ForwardOpenParams {
			produced_size: 4,
			..Default::default()
		};
		let mut connection = ImplicitConnection::new_for_test(Ipv4Addr::new(10, 0, 0, 1), params, ConnectionState::Open);

		let received = Arc::new(Mutex::new(None));
		let received_clone = received.clone();
		connection.callback = Arc::new(move |_peer, _instance, data| {
			*received_clone.lock().unwrap() = Some(data.to_vec());
		});

		let datagram = build_o_to_t_datagram(connection.t_to_o_id, 1, &[0xAA, 0xBB, 0xCC, 0xDD]);
		let peer = SocketAddr::from((connection.peer, 2222));
		handle_inbound_datagram(&connection, &datagram, peer);

		assert_eq!(*received.lock().unwrap(), Some(vec![0xAA, 0xBB, 0xCC, 0xDD]));
	}

	#[test]
	fn handle_inbound_datagram_drops_mismatched_connection_id() {
		let params = ForwardOpenParams {
			produced_size: 4,
			..Default::default()
		};
		let connection = ImplicitConnection::new_for_test(Ipv4Addr::new(10, 0, 0, 1), params, ConnectionState::Open);
		let before = connection.last_packet_received();

		let datagram = build_o_to_t_datagram(connection.t_to_o_id.wrapping_add(1), 1, &[0u8; 4]);
		let peer = SocketAddr::from((connection.peer, 2222));
		handle_inbound_datagram(&connection, &datagram, peer);

		assert_eq!(connection.last_packet_received(), before);
	}
}
