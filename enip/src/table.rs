//! Connection table (§3, §5): at most one `ImplicitConnection` per peer
//! IP, bounded to [`MAX_CONNECTIONS`] entries.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::{EnipError, Result};
use crate::implicit::ImplicitConnection;

/// Maximum simultaneous implicit connections (§6).
pub const MAX_CONNECTIONS: usize = 8;

/// Holds the bounded map of open implicit connections, one per peer IP
/// (§3 invariant: "the connection table holds at most one active
/// `ImplicitConnection` per peer IP").
#[derive(Default)]
pub struct ConnectionTable {
	inner: Mutex<HashMap<Ipv4Addr, Arc<ImplicitConnection>>>,
}

impl ConnectionTable {
	pub fn new() -> Self {
		Self::default()
	}

	/// Inserts `connection`, failing with [`EnipError::Busy`] if a
	/// connection is already open for this peer, or [`EnipError::Exhausted`]
	/// if the table is full.
	pub async fn insert(&self, peer: Ipv4Addr, connection: Arc<ImplicitConnection>) -> Result<()> {
		let mut table = self.inner.lock().await;
		if table.contains_key(&peer) {
			return Err(EnipError::Busy);
		}
		if table.len() >= MAX_CONNECTIONS {
			return Err(EnipError::Exhausted);
		}
		table.insert(peer, connection);
		Ok(())
	}

	/// Removes and returns the connection for `peer`, if any.
	pub async fn remove(&self, peer: Ipv4Addr) -> Option<Arc<ImplicitConnection>> {
		self.inner.lock().await.remove(&peer)
	}

	/// Returns the connection for `peer`, if any, without removing it.
	pub async fn get(&self, peer: Ipv4Addr) -> Option<Arc<ImplicitConnection>> {
		self.inner.lock().await.get(&peer).cloned()
	}

	pub async fn len(&self) -> usize {
		self.inner.lock().await.len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::implicit::{ConnectionState, ForwardOpenParams};
	use std::net::Ipv4Addr;

	fn make_connection(peer: Ipv4Addr) -> Arc<ImplicitConnection> {
		Arc::new(ImplicitConnection::new_for_test(peer, ForwardOpenParams::default(), ConnectionState::Open))
	}

	#[tokio::test]
	async fn insert_rejects_duplicate_peer() {
		let table = ConnectionTable::new();
		let peer = Ipv4Addr::new(10, 0, 0, 1);

		table.insert(peer, make_connection(peer)).await.unwrap();
		let err = table.insert(peer, make_connection(peer)).await.unwrap_err();
		assert!(matches!(err, EnipError::Busy));
	}

	#[tokio::test]
	async fn insert_rejects_beyond_max_connections() {
		let table = ConnectionTable::new();
		for i in 0..MAX_CONNECTIONS as u8 {
			let peer = Ipv4Addr::new(10, 0, 0, i);
			table.insert(peer, make_connection(peer)).await.unwrap();
		}

		let overflow_peer = Ipv4Addr::new(10, 0, 1, 0);
		let err = table.insert(overflow_peer, make_connection(overflow_peer)).await.unwrap_err();
		assert!(matches!(err, EnipError::Exhausted));
	}

	#[tokio::test]
	async fn remove_then_insert_same_peer_succeeds() {
		let table = ConnectionTable::new();
		let peer = Ipv4Addr::new(10, 0, 0, 5);

		table.insert(peer, make_connection(peer)).await.unwrap();
		assert!(table.remove(peer).await.is_some());
		table.insert(peer, make_connection(peer)).await.unwrap();
	}
}
