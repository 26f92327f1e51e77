//! Tag codec (§3, §4.4): the 20 CIP primitive data types and their
//! little-endian wire encoding.

use crate::error::{EnipError, Result};

/// The CIP primitive data types this stack understands (§3, §4.4).
///
/// `Stime` and `Time` are kept as distinct variants even though they share
/// the wire code `0xCC` — the reference implementation aliases spec
/// "STIME" to "TIME" for Micro800 compatibility (§9 design note); both
/// names are preserved here so callers can use whichever their device's
/// documentation uses, while the codec treats them identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipDataType {
	Bool,
	Sint,
	Int,
	Dint,
	Lint,
	Usint,
	Uint,
	Udint,
	Ulint,
	Real,
	Lreal,
	Stime,
	Date,
	TimeOfDay,
	DateAndTime,
	Time,
	String,
	Byte,
	Word,
	Dword,
	Lword,
}

impl CipDataType {
	/// The wire code for this type (§4.4). `Stime` and `Time` both encode
	/// as `0xCC`.
	pub fn wire_code(self) -> u16 {
		match self {
			CipDataType::Bool => 0xC1,
			CipDataType::Sint => 0xC2,
			CipDataType::Int => 0xC3,
			CipDataType::Dint => 0xC4,
			CipDataType::Lint => 0xC5,
			CipDataType::Usint => 0xC6,
			CipDataType::Uint => 0xC7,
			CipDataType::Udint => 0xC8,
			CipDataType::Ulint => 0xC9,
			CipDataType::Real => 0xCA,
			CipDataType::Lreal => 0xCB,
			CipDataType::Stime | CipDataType::Time => 0xCC,
			CipDataType::Date => 0xCD,
			CipDataType::TimeOfDay => 0xCE,
			CipDataType::DateAndTime => 0xCF,
			CipDataType::String => 0xD0,
			CipDataType::Byte => 0xD1,
			CipDataType::Word => 0xD2,
			CipDataType::Dword => 0xD3,
			CipDataType::Lword => 0xD4,
		}
	}

	/// Resolves a wire code to a data type. `0xCC` resolves to `Time`
	/// (the Micro800-facing name); use [`CipDataType::Stime`] directly when
	/// you know you want the other name for the same wire code.
	pub fn from_wire_code(code: u16) -> Option<Self> {
		Some(match code {
			0xC1 => CipDataType::Bool,
			0xC2 => CipDataType::Sint,
			0xC3 => CipDataType::Int,
			0xC4 => CipDataType::Dint,
			0xC5 => CipDataType::Lint,
			0xC6 => CipDataType::Usint,
			0xC7 => CipDataType::Uint,
			0xC8 => CipDataType::Udint,
			0xC9 => CipDataType::Ulint,
			0xCA => CipDataType::Real,
			0xCB => CipDataType::Lreal,
			0xCC => CipDataType::Time,
			0xCD => CipDataType::Date,
			0xCE => CipDataType::TimeOfDay,
			0xCF => CipDataType::DateAndTime,
			0xD0 => CipDataType::String,
			0xD1 => CipDataType::Byte,
			0xD2 => CipDataType::Word,
			0xD3 => CipDataType::Dword,
			0xD4 => CipDataType::Lword,
			_ => return None,
		})
	}

	/// The fixed wire size in bytes, or `None` for `String`, whose size
	/// depends on its content (§3).
	pub fn fixed_size(self) -> Option<usize> {
		match self {
			CipDataType::Bool | CipDataType::Sint | CipDataType::Usint | CipDataType::Byte => Some(1),
			CipDataType::Int | CipDataType::Uint | CipDataType::Word | CipDataType::Date => Some(2),
			CipDataType::Dint
			| CipDataType::Udint
			| CipDataType::Real
			| CipDataType::Stime
			| CipDataType::Time
			| CipDataType::TimeOfDay
			| CipDataType::Dword => Some(4),
			CipDataType::Lint
			| CipDataType::Ulint
			| CipDataType::Lreal
			| CipDataType::DateAndTime
			| CipDataType::Lword => Some(8),
			CipDataType::String => None,
		}
	}
}

/// A decoded or to-be-encoded CIP primitive value.
#[derive(Debug, Clone, PartialEq)]
pub enum CipValue {
	Bool(bool),
	Sint(i8),
	Int(i16),
	Dint(i32),
	Lint(i64),
	Usint(u8),
	Uint(u16),
	Udint(u32),
	Ulint(u64),
	Real(f32),
	Lreal(f64),
	Stime(i32),
	Date(u16),
	TimeOfDay(u32),
	DateAndTime(u64),
	Time(i32),
	/// Raw ASCII bytes, without the length prefix used on the wire.
	String(Vec<u8>),
	Byte(u8),
	Word(u16),
	Dword(u32),
	Lword(u64),
}

impl CipValue {
	pub fn data_type(&self) -> CipDataType {
		match self {
			CipValue::Bool(_) => CipDataType::Bool,
			CipValue::Sint(_) => CipDataType::Sint,
			CipValue::Int(_) => CipDataType::Int,
			CipValue::Dint(_) => CipDataType::Dint,
			CipValue::Lint(_) => CipDataType::Lint,
			CipValue::Usint(_) => CipDataType::Usint,
			CipValue::Uint(_) => CipDataType::Uint,
			CipValue::Udint(_) => CipDataType::Udint,
			CipValue::Ulint(_) => CipDataType::Ulint,
			CipValue::Real(_) => CipDataType::Real,
			CipValue::Lreal(_) => CipDataType::Lreal,
			CipValue::Stime(_) => CipDataType::Stime,
			CipValue::Date(_) => CipDataType::Date,
			CipValue::TimeOfDay(_) => CipDataType::TimeOfDay,
			CipValue::DateAndTime(_) => CipDataType::DateAndTime,
			CipValue::Time(_) => CipDataType::Time,
			CipValue::String(_) => CipDataType::String,
			CipValue::Byte(_) => CipDataType::Byte,
			CipValue::Word(_) => CipDataType::Word,
			CipValue::Dword(_) => CipDataType::Dword,
			CipValue::Lword(_) => CipDataType::Lword,
		}
	}

	/// Encodes the value's bytes only — no leading `cip_type` word. Callers
	/// building a Read/Write_Tag request data field prepend that
	/// themselves (§4.3).
	pub fn encode(&self) -> Vec<u8> {
		match self {
			CipValue::Bool(v) => vec![if *v { 1 } else { 0 }],
			CipValue::Sint(v) => vec![*v as u8],
			CipValue::Usint(v) => vec![*v],
			CipValue::Byte(v) => vec![*v],
			CipValue::Int(v) => v.to_le_bytes().to_vec(),
			CipValue::Uint(v) => v.to_le_bytes().to_vec(),
			CipValue::Word(v) => v.to_le_bytes().to_vec(),
			CipValue::Date(v) => v.to_le_bytes().to_vec(),
			CipValue::Dint(v) => v.to_le_bytes().to_vec(),
			CipValue::Udint(v) => v.to_le_bytes().to_vec(),
			CipValue::Real(v) => v.to_le_bytes().to_vec(),
			CipValue::Stime(v) => v.to_le_bytes().to_vec(),
			CipValue::Time(v) => v.to_le_bytes().to_vec(),
			CipValue::TimeOfDay(v) => v.to_le_bytes().to_vec(),
			CipValue::Dword(v) => v.to_le_bytes().to_vec(),
			CipValue::Lint(v) => v.to_le_bytes().to_vec(),
			CipValue::Ulint(v) => v.to_le_bytes().to_vec(),
			CipValue::Lreal(v) => v.to_le_bytes().to_vec(),
			CipValue::DateAndTime(v) => v.to_le_bytes().to_vec(),
			CipValue::Lword(v) => v.to_le_bytes().to_vec(),
			CipValue::String(bytes) => {
				let mut buf = Vec::with_capacity(bytes.len() + 1);
				buf.push(bytes.len().min(0xFF) as u8);
				buf.extend_from_slice(&bytes[..bytes.len().min(0xFF)]);
				buf
			}
		}
	}

	/// Decodes `bytes` as `data_type`. For fixed-size types, `bytes` must be
	/// exactly that size; `String` reads its own length prefix and ignores
	/// any trailing bytes.
	pub fn decode(data_type: CipDataType, bytes: &[u8]) -> Result<Self> {
		if let Some(size) = data_type.fixed_size() {
			if bytes.len() < size {
				return Err(EnipError::Protocol(format!(
					"expected {} bytes for {:?}, got {}",
					size,
					data_type,
					bytes.len()
				)));
			}
		}

		Ok(match data_type {
			CipDataType::Bool => CipValue::Bool(bytes[0] != 0),
			CipDataType::Sint => CipValue::Sint(bytes[0] as i8),
			CipDataType::Usint => CipValue::Usint(bytes[0]),
			CipDataType::Byte => CipValue::Byte(bytes[0]),
			CipDataType::Int => CipValue::Int(i16::from_le_bytes(bytes[0..2].try_into().unwrap())),
			CipDataType::Uint => CipValue::Uint(u16::from_le_bytes(bytes[0..2].try_into().unwrap())),
			CipDataType::Word => CipValue::Word(u16::from_le_bytes(bytes[0..2].try_into().unwrap())),
			CipDataType::Date => CipValue::Date(u16::from_le_bytes(bytes[0..2].try_into().unwrap())),
			CipDataType::Dint => CipValue::Dint(i32::from_le_bytes(bytes[0..4].try_into().unwrap())),
			CipDataType::Udint => CipValue::Udint(u32::from_le_bytes(bytes[0..4].try_into().unwrap())),
			CipDataType::Real => CipValue::Real(f32::from_le_bytes(bytes[0..4].try_into().unwrap())),
			CipDataType::Stime => CipValue::Stime(i32::from_le_bytes(bytes[0..4].try_into().unwrap())),
			CipDataType::Time => CipValue::Time(i32::from_le_bytes(bytes[0..4].try_into().unwrap())),
			CipDataType::TimeOfDay => CipValue::TimeOfDay(u32::from_le_bytes(bytes[0..4].try_into().unwrap())),
			CipDataType::Dword => CipValue::Dword(u32::from_le_bytes(bytes[0..4].try_into().unwrap())),
			CipDataType::Lint => CipValue::Lint(i64::from_le_bytes(bytes[0..8].try_into().unwrap())),
			CipDataType::Ulint => CipValue::Ulint(u64::from_le_bytes(bytes[0..8].try_into().unwrap())),
			CipDataType::Lreal => CipValue::Lreal(f64::from_le_bytes(bytes[0..8].try_into().unwrap())),
			CipDataType::DateAndTime => CipValue::DateAndTime(u64::from_le_bytes(bytes[0..8].try_into().unwrap())),
			CipDataType::Lword => CipValue::Lword(u64::from_le_bytes(bytes[0..8].try_into().unwrap())),
			CipDataType::String => {
				let len = *bytes.first().ok_or_else(|| EnipError::Protocol("empty STRING value".into()))? as usize;
				let body = bytes
					.get(1..1 + len)
					.ok_or_else(|| EnipError::Protocol("truncated STRING value".into()))?;
				CipValue::String(body.to_vec())
			}
		})
	}
}

/// The maximum tag name length this stack will attempt to encode. Matches
/// the symbolic segment length byte's range, with headroom for multiple
/// dotted segments.
pub const MAX_TAG_NAME_LEN: usize = 128;

/// Validates a dotted tag path before it's handed to the EPATH encoder.
pub fn validate_tag_name(name: &str) -> Result<()> {
	if name.is_empty() {
		return Err(EnipError::InvalidArgument("tag name must not be empty".into()));
	}
	if name.len() > MAX_TAG_NAME_LEN {
		return Err(EnipError::InvalidArgument(format!(
			"tag name {:?} exceeds {} characters",
			name, MAX_TAG_NAME_LEN
		)));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn round_trip(value: CipValue) {
		let ty = value.data_type();
		let encoded = value.encode();
		let decoded = CipValue::decode(ty, &encoded).unwrap();
		assert_eq!(decoded, value);
	}

	#[test]
	fn every_primitive_round_trips() {
		round_trip(CipValue::Bool(true));
		round_trip(CipValue::Bool(false));
		round_trip(CipValue::Sint(-12));
		round_trip(CipValue::Usint(200));
		round_trip(CipValue::Byte(0xAB));
		round_trip(CipValue::Int(-1234));
		round_trip(CipValue::Uint(54321));
		round_trip(CipValue::Word(0xBEEF));
		round_trip(CipValue::Date(18_000));
		round_trip(CipValue::Dint(-123_456_789));
		round_trip(CipValue::Udint(4_000_000_000));
		round_trip(CipValue::Real(75.5));
		round_trip(CipValue::Stime(-42));
		round_trip(CipValue::Time(42));
		round_trip(CipValue::TimeOfDay(3_600));
		round_trip(CipValue::Dword(0xDEAD_BEEF));
		round_trip(CipValue::Lint(-9_000_000_000_000));
		round_trip(CipValue::Ulint(9_000_000_000_000));
		round_trip(CipValue::Lreal(3.14159265358979));
		round_trip(CipValue::DateAndTime(0x0102_0304_0506_0708));
		round_trip(CipValue::Lword(0x1122_3344_5566_7788));
		round_trip(CipValue::String(b"hello".to_vec()));
	}

	#[test]
	fn real_75_5_encodes_as_spec_example() {
		// Scenario E: write tag "Temperature" REAL=75.5 -> 0x00,0x00,0x97,0x42.
		let encoded = CipValue::Real(75.5).encode();
		assert_eq!(encoded, vec![0x00, 0x00, 0x97, 0x42]);
	}

	#[test]
	fn dint_12345_decodes_as_spec_example() {
		// Scenario D: DINT=12345 -> 0x39,0x30,0x00,0x00.
		let value = CipValue::decode(CipDataType::Dint, &[0x39, 0x30, 0x00, 0x00]).unwrap();
		assert_eq!(value, CipValue::Dint(12345));
	}

	#[test]
	fn stime_and_time_share_wire_code() {
		assert_eq!(CipDataType::Stime.wire_code(), 0xCC);
		assert_eq!(CipDataType::Time.wire_code(), 0xCC);
		assert_eq!(CipDataType::from_wire_code(0xCC), Some(CipDataType::Time));
	}

	#[test]
	fn string_strips_length_prefix_on_decode() {
		let encoded = CipValue::String(b"Hi".to_vec()).encode();
		assert_eq!(encoded, vec![2, b'H', b'i']);
		let decoded = CipValue::decode(CipDataType::String, &encoded).unwrap();
		assert_eq!(decoded, CipValue::String(b"Hi".to_vec()));
	}

	#[test]
	fn validate_tag_name_rejects_empty_and_oversize() {
		assert!(validate_tag_name("").is_err());
		assert!(validate_tag_name(&"x".repeat(MAX_TAG_NAME_LEN + 1)).is_err());
		assert!(validate_tag_name("Program:Main.Value").is_ok());
	}
}
