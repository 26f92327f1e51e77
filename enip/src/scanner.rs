//! `Scanner`: the owned context value that replaces the reference
//! implementation's process-wide globals (§9 design note) — initialized
//! flag, connection table, and connection-id counter all live here,
//! scoped to this value's lifetime.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::ScannerConfig;
use crate::discover::{self, DeviceInfo};
use crate::error::{EnipError, Result};
use crate::explicit::{self, AssemblyReadResult, TagReadResult};
use crate::implicit::{self, cyclic, ConnectionState, DataCallback, ForwardOpenParams, ImplicitConnection};
use crate::socket;
use crate::table::ConnectionTable;
use crate::tags::CipValue;

/// The public entry point of this crate (§6 "Public API"). Every socket,
/// task, and table entry this stack creates is scoped to one `Scanner`
/// value's lifetime — there is no global state to initialize first.
pub struct Scanner {
	config: ScannerConfig,
	connections: ConnectionTable,
	next_sequential_id: AtomicU32,
	logger: slog::Logger,
}

impl Scanner {
	pub fn new(config: ScannerConfig) -> Result<Self> {
		Self::with_logger(config, slog::Logger::root(slog::Discard, slog::o!()))
	}

	pub fn with_logger(config: ScannerConfig, logger: slog::Logger) -> Result<Self> {
		let seed = common::rand::rand_u32().map_err(EnipError::Io)?;
		Ok(Self {
			config,
			connections: ConnectionTable::new(),
			next_sequential_id: AtomicU32::new(seed | 1),
			logger,
		})
	}

	/// Builds a scanner logging through `common::obs::assemble_async_logger`,
	/// so the cyclic I/O tasks' hot path never blocks on a synchronous log
	/// write to `writer`.
	pub fn with_async_logger<W: std::io::Write + Send + 'static>(config: ScannerConfig, writer: W) -> Result<Self> {
		Self::with_logger(config, common::obs::assemble_async_logger(writer))
	}

	pub fn config(&self) -> &ScannerConfig {
		&self.config
	}

	/// Broadcasts ListIdentity and collects replies for up to `timeout`
	/// (§4, §8 scenario A).
	pub async fn scan_devices(&self, timeout: Duration) -> Result<Vec<DeviceInfo>> {
		discover::scan_devices(timeout).await
	}

	/// Reads an Assembly instance via Get_Attribute_Single (§4.3).
	pub async fn read_assembly(&self, peer: Ipv4Addr, instance: u16, timeout: Duration) -> Result<AssemblyReadResult> {
		explicit::read_assembly(peer, instance, timeout).await
	}

	/// Writes raw bytes to an Assembly instance via Set_Attribute_Single
	/// (§4.3).
	pub async fn write_assembly(&self, peer: Ipv4Addr, instance: u16, bytes: &[u8], timeout: Duration) -> Result<()> {
		explicit::write_assembly(peer, instance, bytes, timeout).await
	}

	/// Probes a device's Assembly instances (§4.3).
	pub async fn discover_assemblies(&self, peer: Ipv4Addr, timeout: Duration) -> Vec<u16> {
		explicit::discover_assemblies(peer, timeout).await
	}

	/// Reads a symbolic tag (§4.3, §4.4). Gated by
	/// [`ScannerConfig::enable_tag_support`].
	pub async fn read_tag(&self, peer: Ipv4Addr, tag_path: &str, timeout: Duration) -> Result<TagReadResult> {
		if !self.config.enable_tag_support {
			return Err(EnipError::InvalidArgument("tag support is disabled in this scanner's configuration".into()));
		}
		explicit::read_tag(peer, tag_path, timeout).await
	}

	/// Writes a symbolic tag (§4.3, §4.4). Gated by
	/// [`ScannerConfig::enable_tag_support`].
	pub async fn write_tag(&self, peer: Ipv4Addr, tag_path: &str, value: &CipValue, timeout: Duration) -> Result<()> {
		if !self.config.enable_tag_support {
			return Err(EnipError::InvalidArgument("tag support is disabled in this scanner's configuration".into()));
		}
		explicit::write_tag(peer, tag_path, value, timeout).await
	}

	fn next_sequential_ids(&self) -> (u32, u32) {
		// Counter incremented by 2 per allocation (§4.5): one ID for O→T,
		// the next for T→O.
		let base = self.next_sequential_id.fetch_add(2, Ordering::SeqCst);
		(base, base.wrapping_add(1))
	}

	/// Opens an implicit (Class 1 cyclic) connection to `peer` and spawns
	/// its producer/consumer/watchdog tasks (§4.5). Gated by
	/// [`ScannerConfig::enable_implicit_support`].
	pub async fn implicit_open(
		&self,
		peer: Ipv4Addr,
		params: ForwardOpenParams,
		callback: DataCallback,
		timeout: Duration,
	) -> Result<()> {
		if !self.config.enable_implicit_support {
			return Err(EnipError::InvalidArgument(
				"implicit support is disabled in this scanner's configuration".into(),
			));
		}
		self.config.validate_rpi(params.rpi_ms)?;
		if self.connections.len().await >= self.config.max_implicit_connections {
			return Err(EnipError::Exhausted);
		}

		let outcome = implicit::forward_open(peer, &params, || self.next_sequential_ids(), timeout).await?;

		let udp_socket = Arc::new(socket::bind_reusable_udp(socket::IMPLICIT_UDP_PORT)?);
		let connection = Arc::new(ImplicitConnection::new(
			peer,
			params,
			outcome,
			udp_socket,
			callback,
			self.logger.new(slog::o!("peer" => peer.to_string())),
		));
		connection.set_state(ConnectionState::Open);

		let tasks = cyclic::spawn(connection.clone());
		connection.register_tasks(tasks);

		self.connections.insert(peer, connection).await
	}

	/// Closes the implicit connection to `peer`, following the shutdown
	/// ordering in §4.5: ForwardClose while the producer is still
	/// running, then invalidate, then wait for the tasks to observe it.
	pub async fn implicit_close(&self, peer: Ipv4Addr, timeout: Duration) -> Result<()> {
		let connection = self.connections.remove(peer).await.ok_or(EnipError::NotFound)?;

		connection.set_state(ConnectionState::Closing);
		let close_result = implicit::forward_close(
			peer,
			&connection.params,
			connection.connection_serial,
			connection.originator_serial,
			timeout,
		)
		.await;

		connection.invalidate();
		tokio::time::sleep(Duration::from_millis(300)).await;
		connection.abort_tasks();

		if close_result.is_err() {
			// ForwardClose didn't complete; wait out the device's own
			// watchdog before this UDP port could plausibly be rebound
			// (§4.5 "Shutdown discipline").
			let wait = Duration::from_millis(connection.params.rpi_ms as u64 * 16 + 10_000).max(Duration::from_secs(13));
			tokio::time::sleep(wait).await;
		}

		close_result
	}

	/// Replaces the O→T producer buffer for an open connection (§3, §4.5).
	pub async fn implicit_write_data(&self, peer: Ipv4Addr, bytes: &[u8]) -> Result<()> {
		let connection = self.connections.get(peer).await.ok_or(EnipError::NotFound)?;
		connection.write_o_to_t_data(bytes)
	}

	/// Copies the current O→T producer buffer for an open connection into
	/// `buf`, returning the number of bytes copied (§6
	/// `implicit_read_o_to_t_data`).
	pub async fn implicit_read_o_to_t_data(&self, peer: Ipv4Addr, buf: &mut [u8]) -> Result<usize> {
		let connection = self.connections.get(peer).await.ok_or(EnipError::NotFound)?;
		Ok(connection.read_o_to_t_data(buf))
	}

	/// Returns whether an implicit connection to `peer` is currently open.
	pub async fn implicit_is_open(&self, peer: Ipv4Addr) -> bool {
		self.connections.get(peer).await.map(|c| c.is_valid()).unwrap_or(false)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn new_scanner_starts_with_no_open_connections() {
		let scanner = Scanner::new(ScannerConfig::default()).unwrap();
		assert!(!scanner.implicit_is_open(Ipv4Addr::new(10, 0, 0, 1)).await);
	}

	#[tokio::test]
	async fn implicit_open_rejects_rpi_outside_configured_bounds() {
		let scanner = Scanner::new(ScannerConfig::default()).unwrap();
		let params = ForwardOpenParams {
			rpi_ms: 5,
			..Default::default()
		};
		let err = scanner
			.implicit_open(Ipv4Addr::new(10, 0, 0, 1), params, Arc::new(|_, _, _| {}), Duration::from_secs(1))
			.await
			.unwrap_err();
		assert!(matches!(err, EnipError::InvalidArgument(_)));
	}

	#[tokio::test]
	async fn implicit_close_unknown_peer_returns_not_found() {
		let scanner = Scanner::new(ScannerConfig::default()).unwrap();
		let err = scanner
			.implicit_close(Ipv4Addr::new(10, 0, 0, 99), Duration::from_secs(1))
			.await
			.unwrap_err();
		assert!(matches!(err, EnipError::NotFound));
	}

	#[tokio::test]
	async fn implicit_read_o_to_t_data_unknown_peer_returns_not_found() {
		let scanner = Scanner::new(ScannerConfig::default()).unwrap();
		let mut buf = [0u8; 4];
		let err = scanner
			.implicit_read_o_to_t_data(Ipv4Addr::new(10, 0, 0, 99), &mut buf)
			.await
			.unwrap_err();
		assert!(matches!(err, EnipError::NotFound));
	}

	#[test]
	fn with_async_logger_builds_a_usable_scanner() {
		let scanner = Scanner::with_async_logger(ScannerConfig::default(), std::io::sink()).unwrap();
		assert_eq!(scanner.config().max_implicit_connections, ScannerConfig::default().max_implicit_connections);
	}

	#[tokio::test]
	async fn read_tag_fails_fast_when_tag_support_disabled() {
		let config = ScannerConfig {
			enable_tag_support: false,
			..ScannerConfig::default()
		};
		let scanner = Scanner::new(config).unwrap();
		let err = scanner
			.read_tag(Ipv4Addr::new(10, 0, 0, 1), "Counter", Duration::from_millis(10))
			.await
			.unwrap_err();
		assert!(matches!(err, EnipError::InvalidArgument(_)));
	}
}
