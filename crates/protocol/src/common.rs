use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use super::error::Error;

/// 20 byte node or user address.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Address(pub [u8; 20]);

impl Address {
	pub const ZERO: Self = Self([0; 20]);

	#[must_use]
	pub fn is_zero(&self) -> bool {
		*self == Self::ZERO
	}

	pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
		<[u8; 20]>::try_from(bytes)
			.map(Self)
			.map_err(|_| Error::InvalidAddressLength(bytes.len()))
	}

	#[must_use]
	pub const fn as_bytes(&self) -> &[u8; 20] {
		&self.0
	}
}

impl fmt::Display for Address {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "0x{}", hex::encode(self.0))
	}
}

impl fmt::Debug for Address {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Address({self})")
	}
}

impl FromStr for Address {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let bytes = hex::decode(s.trim_start_matches("0x"))?;
		Self::from_slice(&bytes)
	}
}

/// 32 byte hash, used for event and miniblock hashes.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Hash(pub [u8; 32]);

impl Hash {
	pub const ZERO: Self = Self([0; 32]);

	#[must_use]
	pub fn is_zero(&self) -> bool {
		*self == Self::ZERO
	}

	#[must_use]
	pub fn of(bytes: &[u8]) -> Self {
		Self(*blake3::hash(bytes).as_bytes())
	}

	pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
		<[u8; 32]>::try_from(bytes)
			.map(Self)
			.map_err(|_| Error::InvalidHashLength(bytes.len()))
	}

	#[must_use]
	pub const fn as_bytes(&self) -> &[u8; 32] {
		&self.0
	}
}

impl fmt::Display for Hash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "0x{}", hex::encode(self.0))
	}
}

impl fmt::Debug for Hash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Hash({self})")
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn address_parses_with_and_without_prefix() {
		let with_prefix = "0x1234567890123456789012345678901234567890"
			.parse::<Address>()
			.unwrap();
		let without_prefix = "1234567890123456789012345678901234567890"
			.parse::<Address>()
			.unwrap();

		assert_eq!(with_prefix, without_prefix);
		assert_eq!(
			with_prefix.to_string(),
			"0x1234567890123456789012345678901234567890"
		);
	}

	#[test]
	fn address_rejects_wrong_length() {
		assert!(matches!(
			"0x1234".parse::<Address>(),
			Err(Error::InvalidAddressLength(2))
		));
	}
}
