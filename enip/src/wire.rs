//! ENIP encapsulation header and Common Packet Format (CPF) framing.
//!
//! All multi-byte integers on the wire are little-endian (§3, §9 "Endian
//! policy"). The encapsulation header has a fixed 24-byte layout and is
//! described with `bytestruct`'s derive support; CPF items are a
//! variable-length `count + items` container, so they are hand-encoded the
//! same way the teacher hand-encodes Netlink attributes
//! (`netlink::read_attribute`/`write_attribute`) rather than forced through
//! the struct derive.

use std::io::{self, Cursor, ErrorKind, Read, Write};

use bytestruct::{Endian, ReadFrom, ReadFromWithEndian, Size, WriteTo, WriteToWithEndian};
use bytestruct_derive::{ByteStruct, Size};

/// ENIP encapsulation command codes (§6).
pub mod command {
	pub const REGISTER_SESSION: u16 = 0x0065;
	pub const UNREGISTER_SESSION: u16 = 0x0066;
	pub const LIST_IDENTITY: u16 = 0x0063;
	pub const SEND_RR_DATA: u16 = 0x006F;
	pub const SEND_UNIT_DATA: u16 = 0x0070;
}

/// CPF item type codes (§3, §6).
pub mod item_type {
	pub const NULL_ADDRESS: u16 = 0x0000;
	pub const CONNECTED_ADDRESS: u16 = 0x00A1;
	pub const SEQUENCED_ADDRESS: u16 = 0x8002;
	pub const CONNECTED_DATA: u16 = 0x00B1;
	pub const UNCONNECTED_DATA: u16 = 0x00B2;
}

/// The 24-byte ENIP encapsulation header (§3).
///
/// Invariant: `length` is always the size of the payload that follows this
/// header, never the size of the whole packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ByteStruct, Size)]
#[little_endian]
pub struct EncapsulationHeader {
	pub command: u16,
	pub length: u16,
	pub session_handle: u32,
	pub status: u32,
	pub sender_context: u64,
	pub options: u32,
}

impl EncapsulationHeader {
	/// Size of the header on the wire. Never varies; `Size::size` agrees.
	pub const WIRE_SIZE: usize = 24;

	pub fn new(command: u16, payload_len: usize, session_handle: u32) -> Self {
		Self {
			command,
			length: payload_len as u16,
			session_handle,
			status: 0,
			sender_context: 0,
			options: 0,
		}
	}

	pub fn encode(&self) -> Vec<u8> {
		let mut buf = Vec::with_capacity(Self::WIRE_SIZE);
		self.write_to(&mut buf).expect("writing to a Vec never fails");
		buf
	}

	pub fn decode(bytes: &[u8]) -> io::Result<Self> {
		if bytes.len() < Self::WIRE_SIZE {
			return Err(io::Error::new(ErrorKind::UnexpectedEof, "short encapsulation header"));
		}
		Self::read_from(&mut Cursor::new(bytes))
	}
}

/// A single CPF item: a 16-bit type, a 16-bit length, and `length` bytes of
/// item-specific data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpfItem {
	pub item_type: u16,
	pub data: Vec<u8>,
}

impl CpfItem {
	pub fn new(item_type: u16, data: Vec<u8>) -> Self {
		Self { item_type, data }
	}

	pub fn null_address() -> Self {
		Self::new(item_type::NULL_ADDRESS, Vec::new())
	}
}

/// Encodes `item_count(u16)` followed by each item's `type, length, data`.
pub fn encode_cpf(items: &[CpfItem]) -> Vec<u8> {
	let mut buf = Vec::new();
	(items.len() as u16)
		.write_to_with_endian(&mut buf, Endian::Little)
		.expect("writing to a Vec never fails");

	for item in items {
		item.item_type.write_to_with_endian(&mut buf, Endian::Little).unwrap();
		(item.data.len() as u16)
			.write_to_with_endian(&mut buf, Endian::Little)
			.unwrap();
		buf.write_all(&item.data).unwrap();
	}

	buf
}

/// Parses a CPF frame: `item_count(u16)` followed by that many items.
pub fn decode_cpf(bytes: &[u8]) -> io::Result<Vec<CpfItem>> {
	let mut cursor = Cursor::new(bytes);
	let count = u16::read_from_with_endian(&mut cursor, Endian::Little)?;

	let mut items = Vec::with_capacity(count as usize);
	for _ in 0..count {
		let item_type = u16::read_from_with_endian(&mut cursor, Endian::Little)?;
		let length = u16::read_from_with_endian(&mut cursor, Endian::Little)? as usize;

		let mut data = vec![0u8; length];
		cursor.read_exact(&mut data)?;

		items.push(CpfItem { item_type, data });
	}

	Ok(items)
}

/// Finds the first item of the given type, if any.
pub fn find_item(items: &[CpfItem], item_type: u16) -> Option<&CpfItem> {
	items.iter().find(|item| item.item_type == item_type)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn encap_header_round_trips() {
		let header = EncapsulationHeader::new(command::SEND_RR_DATA, 42, 0xDEAD_BEEF);
		let encoded = header.encode();
		assert_eq!(encoded.len(), EncapsulationHeader::WIRE_SIZE);
		let decoded = EncapsulationHeader::decode(&encoded).unwrap();
		assert_eq!(decoded, header);
	}

	#[test]
	fn encap_header_length_field_matches_payload() {
		let payload = vec![0u8; 42];
		let header = EncapsulationHeader::new(command::SEND_RR_DATA, payload.len(), 1);
		let mut packet = header.encode();
		packet.extend_from_slice(&payload);
		assert_eq!(header.length as usize, packet.len() - EncapsulationHeader::WIRE_SIZE);
	}

	#[test]
	fn cpf_round_trips_multiple_items() {
		let items = vec![
			CpfItem::null_address(),
			CpfItem::new(item_type::UNCONNECTED_DATA, vec![0x4C, 0x01, 0x02, 0x03]),
		];
		let encoded = encode_cpf(&items);
		let decoded = decode_cpf(&encoded).unwrap();
		assert_eq!(decoded, items);
	}

	#[test]
	fn cpf_decode_rejects_truncated_item() {
		// Claims one item of length 4 but only supplies 2 bytes of data.
		let mut bytes = Vec::new();
		1u16.write_to_with_endian(&mut bytes, Endian::Little).unwrap();
		item_type::UNCONNECTED_DATA
			.write_to_with_endian(&mut bytes, Endian::Little)
			.unwrap();
		4u16.write_to_with_endian(&mut bytes, Endian::Little).unwrap();
		bytes.extend_from_slice(&[0x01, 0x02]);

		assert!(decode_cpf(&bytes).is_err());
	}

	#[test]
	fn find_item_locates_by_type() {
		let items = vec![
			CpfItem::null_address(),
			CpfItem::new(item_type::UNCONNECTED_DATA, vec![1, 2, 3]),
		];
		let found = find_item(&items, item_type::UNCONNECTED_DATA).unwrap();
		assert_eq!(found.data, vec![1, 2, 3]);
		assert!(find_item(&items, item_type::CONNECTED_DATA).is_none());
	}
}
