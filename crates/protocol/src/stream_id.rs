use std::{
	cmp::Ordering,
	fmt,
	hash::{Hash, Hasher},
	str::FromStr,
};

use rand::RngCore;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use strum::{Display, IntoStaticStr};

use super::{error::Error, Address};

const USER_STREAM_ID_LEN: usize = 21;
const STREAM_ID_LEN: usize = 32;

/// Stream type, encoded in the first byte of every [`StreamId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum StreamType {
	Space = 0x10,
	Channel = 0x20,
	GroupDm = 0x77,
	Dm = 0x88,
	UserInbox = 0xa1,
	UserSettings = 0xa5,
	User = 0xa8,
	UserMetadataKey = 0xad,
	Metadata = 0xdd,
	Media = 0xff,
}

impl StreamType {
	#[must_use]
	pub const fn prefix(self) -> u8 {
		self as u8
	}

	/// Byte length of ids of this type; user scoped streams are the prefix plus a user address.
	#[must_use]
	pub const fn id_len(self) -> usize {
		match self {
			Self::UserInbox | Self::UserSettings | Self::User | Self::UserMetadataKey => {
				USER_STREAM_ID_LEN
			}
			Self::Space
			| Self::Channel
			| Self::GroupDm
			| Self::Dm
			| Self::Metadata
			| Self::Media => STREAM_ID_LEN,
		}
	}

	#[must_use]
	pub const fn is_user_scoped(self) -> bool {
		self.id_len() == USER_STREAM_ID_LEN
	}
}

impl TryFrom<u8> for StreamType {
	type Error = Error;

	fn try_from(prefix: u8) -> Result<Self, Self::Error> {
		Ok(match prefix {
			0x10 => Self::Space,
			0x20 => Self::Channel,
			0x77 => Self::GroupDm,
			0x88 => Self::Dm,
			0xa1 => Self::UserInbox,
			0xa5 => Self::UserSettings,
			0xa8 => Self::User,
			0xad => Self::UserMetadataKey,
			0xdd => Self::Metadata,
			0xff => Self::Media,
			unknown => return Err(Error::UnknownStreamType(unknown)),
		})
	}
}

/// Immutable stream identifier. The first byte is the [`StreamType`] prefix, user scoped
/// streams embed the user address in the next 20 bytes and channels embed their space address.
///
/// Equality, ordering and hashing only look at the id's own bytes.
#[derive(Clone, Copy)]
pub struct StreamId {
	bytes: [u8; STREAM_ID_LEN],
	len: u8,
}

impl StreamId {
	pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
		let Some(&prefix) = bytes.first() else {
			return Err(Error::InvalidStreamIdLength(0));
		};

		let stream_type = StreamType::try_from(prefix)?;
		let expected = stream_type.id_len();
		if bytes.len() != expected {
			return Err(Error::StreamIdLengthMismatch {
				len: bytes.len(),
				expected,
			});
		}

		let mut id = [0; STREAM_ID_LEN];
		id[..expected].copy_from_slice(bytes);

		Ok(Self {
			bytes: id,
			// Ids are at most 32 bytes long
			#[allow(clippy::cast_possible_truncation)]
			len: expected as u8,
		})
	}

	/// Builds the id of a user scoped stream for the given user.
	#[must_use]
	pub fn for_user(stream_type: StreamType, user: &Address) -> Option<Self> {
		if !stream_type.is_user_scoped() {
			return None;
		}

		let mut bytes = [0; USER_STREAM_ID_LEN];
		bytes[0] = stream_type.prefix();
		bytes[1..].copy_from_slice(user.as_bytes());

		Self::from_bytes(&bytes).ok()
	}

	/// Random id of the given type, the way tests and fixtures mint fresh streams.
	#[must_use]
	pub fn random(stream_type: StreamType) -> Self {
		let len = stream_type.id_len();

		let mut bytes = [0; STREAM_ID_LEN];
		rand::thread_rng().fill_bytes(&mut bytes[..len]);
		bytes[0] = stream_type.prefix();

		Self {
			bytes,
			// Ids are at most 32 bytes long
			#[allow(clippy::cast_possible_truncation)]
			len: len as u8,
		}
	}

	#[must_use]
	pub fn as_bytes(&self) -> &[u8] {
		&self.bytes[..usize::from(self.len)]
	}

	#[must_use]
	pub fn stream_type(&self) -> StreamType {
		StreamType::try_from(self.bytes[0])
			.expect("prefix is validated on every StreamId construction path")
	}

	/// User address embedded in user scoped stream ids.
	#[must_use]
	pub fn user_address(&self) -> Option<Address> {
		self.stream_type()
			.is_user_scoped()
			.then(|| Address::from_slice(&self.bytes[1..USER_STREAM_ID_LEN]).ok())
			.flatten()
	}

	/// Space address embedded in space and channel stream ids.
	#[must_use]
	pub fn space_address(&self) -> Option<Address> {
		matches!(self.stream_type(), StreamType::Space | StreamType::Channel)
			.then(|| Address::from_slice(&self.bytes[1..USER_STREAM_ID_LEN]).ok())
			.flatten()
	}
}

impl PartialEq for StreamId {
	fn eq(&self, other: &Self) -> bool {
		self.as_bytes() == other.as_bytes()
	}
}

impl Eq for StreamId {}

impl PartialOrd for StreamId {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for StreamId {
	fn cmp(&self, other: &Self) -> Ordering {
		self.as_bytes().cmp(other.as_bytes())
	}
}

impl Hash for StreamId {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.as_bytes().hash(state);
	}
}

impl fmt::Display for StreamId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&hex::encode(self.as_bytes()))
	}
}

impl fmt::Debug for StreamId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "StreamId({self})")
	}
}

impl FromStr for StreamId {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::from_bytes(&hex::decode(s.trim_start_matches("0x"))?)
	}
}

impl TryFrom<&[u8]> for StreamId {
	type Error = Error;

	fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
		Self::from_bytes(bytes)
	}
}

impl Serialize for StreamId {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_bytes(self.as_bytes())
	}
}

impl<'de> Deserialize<'de> for StreamId {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let bytes = serde_bytes_vec(deserializer)?;
		Self::from_bytes(&bytes).map_err(de::Error::custom)
	}
}

fn serde_bytes_vec<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
	struct BytesVisitor;

	impl<'de> de::Visitor<'de> for BytesVisitor {
		type Value = Vec<u8>;

		fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
			f.write_str("stream id bytes")
		}

		fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
			Ok(v.to_vec())
		}

		fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
			Ok(v)
		}

		fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
			let mut bytes = Vec::with_capacity(seq.size_hint().unwrap_or(STREAM_ID_LEN));
			while let Some(byte) = seq.next_element()? {
				bytes.push(byte);
			}
			Ok(bytes)
		}
	}

	deserializer.deserialize_bytes(BytesVisitor)
}

#[cfg(test)]
mod tests {
	use super::*;

	use std::collections::HashSet;

	use pretty_assertions::assert_eq;

	#[test]
	fn user_streams_embed_the_user_address() {
		let user = "0x1234567890123456789012345678901234567890"
			.parse::<Address>()
			.unwrap();

		let inbox = StreamId::for_user(StreamType::UserInbox, &user).unwrap();

		assert_eq!(inbox.as_bytes().len(), 21);
		assert_eq!(inbox.stream_type(), StreamType::UserInbox);
		assert_eq!(inbox.user_address(), Some(user));
		assert_eq!(inbox.space_address(), None);
		assert!(StreamId::for_user(StreamType::Channel, &user).is_none());
	}

	#[test]
	fn rejects_ids_with_mismatched_length() {
		let mut bytes = vec![0x20; 21];
		bytes[0] = StreamType::Channel.prefix();

		assert!(matches!(
			StreamId::from_bytes(&bytes),
			Err(Error::StreamIdLengthMismatch {
				len: 21,
				expected: 32
			})
		));
		assert!(matches!(
			StreamId::from_bytes(&[0x42; 32]),
			Err(Error::UnknownStreamType(0x42))
		));
		assert!(matches!(
			StreamId::from_bytes(&[]),
			Err(Error::InvalidStreamIdLength(0))
		));
	}

	#[test]
	fn hex_round_trip() {
		let id = StreamId::random(StreamType::Channel);

		assert_eq!(id.to_string().parse::<StreamId>().unwrap(), id);
		assert_eq!(id.as_bytes().len(), 32);
	}

	#[test]
	fn user_scoped_ids_survive_a_bytes_round_trip_as_map_keys() {
		let id = StreamId::random(StreamType::UserInbox);
		let decoded = StreamId::from_bytes(id.as_bytes()).unwrap();

		assert_eq!(id.as_bytes().len(), 21);
		assert_eq!(decoded, id);
		assert_eq!(decoded.cmp(&id), Ordering::Equal);

		let ids = HashSet::from([id]);
		assert!(ids.contains(&decoded));
		assert!(ids.contains(&id.to_string().parse::<StreamId>().unwrap()));
	}

	#[test]
	fn msgpack_round_trip() {
		let id = StreamId::random(StreamType::Dm);
		let encoded = rmp_serde::to_vec(&id).unwrap();

		assert_eq!(rmp_serde::from_slice::<StreamId>(&encoded).unwrap(), id);
	}
}
