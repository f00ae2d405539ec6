use serde::{Deserialize, Serialize};

use super::{error::Error, Address, Hash};

/// Header of a miniblock, carried as the payload of the miniblock's header event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiniblockHeader {
	pub miniblock_num: i64,
	pub prev_miniblock_hash: Hash,
	pub event_hashes: Vec<Hash>,
	pub timestamp_ms: i64,
	pub snapshot_hash: Option<Hash>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventPayload {
	MiniblockHeader(MiniblockHeader),
	/// Domain content. The tracking layer never looks inside, consumers decode `data` by `kind`.
	Content { kind: String, data: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEvent {
	pub creator_address: Address,
	pub salt: Vec<u8>,
	pub prev_miniblock_hash: Option<Hash>,
	pub created_at_epoch_ms: i64,
	pub payload: EventPayload,
}

/// Serialized event as it travels on the wire. Signature verification belongs to the node
/// layer, here we only check that `hash` matches the serialized event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
	pub hash: Hash,
	pub signature: Vec<u8>,
	pub event: Vec<u8>,
}

impl Envelope {
	pub fn seal(event: &StreamEvent) -> Result<Self, Error> {
		let event = rmp_serde::to_vec_named(event)?;

		Ok(Self {
			hash: Hash::of(&event),
			signature: vec![],
			event,
		})
	}
}

/// Envelope whose event was decoded and whose hash was verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEvent {
	pub event: StreamEvent,
	pub hash: Hash,
	pub envelope: Envelope,
}

impl ParsedEvent {
	pub fn parse(envelope: &Envelope) -> Result<Self, Error> {
		let computed = Hash::of(&envelope.event);
		if computed != envelope.hash {
			return Err(Error::EventHashMismatch {
				envelope: envelope.hash,
				computed,
			});
		}

		Ok(Self {
			event: rmp_serde::from_slice(&envelope.event)?,
			hash: envelope.hash,
			envelope: envelope.clone(),
		})
	}

	#[must_use]
	pub const fn miniblock_header(&self) -> Option<&MiniblockHeader> {
		match &self.event.payload {
			EventPayload::MiniblockHeader(header) => Some(header),
			EventPayload::Content { .. } => None,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Miniblock {
	pub events: Vec<Envelope>,
	pub header: Envelope,
}

impl Miniblock {
	pub fn header(&self) -> Result<MiniblockHeader, Error> {
		let parsed = ParsedEvent::parse(&self.header)?;

		match parsed.event.payload {
			EventPayload::MiniblockHeader(header) => Ok(header),
			EventPayload::Content { .. } => Err(Error::NotAMiniblockHeader(parsed.hash)),
		}
	}

	pub fn number(&self) -> Result<i64, Error> {
		self.header().map(|header| header.miniblock_num)
	}

	/// Seals `events` under a header event for miniblock `miniblock_num`.
	pub fn build(
		creator_address: Address,
		miniblock_num: i64,
		prev_miniblock_hash: Hash,
		events: Vec<Envelope>,
	) -> Result<Self, Error> {
		let header = Envelope::seal(&StreamEvent {
			creator_address,
			salt: miniblock_num.to_be_bytes().to_vec(),
			prev_miniblock_hash: Some(prev_miniblock_hash),
			created_at_epoch_ms: 0,
			payload: EventPayload::MiniblockHeader(MiniblockHeader {
				miniblock_num,
				prev_miniblock_hash,
				event_hashes: events.iter().map(|envelope| envelope.hash).collect(),
				timestamp_ms: 0,
				snapshot_hash: None,
			}),
		})?;

		Ok(Self { events, header })
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use pretty_assertions::assert_eq;

	fn content_event(data: &[u8]) -> StreamEvent {
		StreamEvent {
			creator_address: Address::ZERO,
			salt: vec![1, 2, 3],
			prev_miniblock_hash: None,
			created_at_epoch_ms: 1_700_000_000_000,
			payload: EventPayload::Content {
				kind: "message".to_string(),
				data: data.to_vec(),
			},
		}
	}

	#[test]
	fn sealed_envelopes_parse_back() {
		let event = content_event(b"hello");
		let envelope = Envelope::seal(&event).unwrap();

		let parsed = ParsedEvent::parse(&envelope).unwrap();

		assert_eq!(parsed.event, event);
		assert_eq!(parsed.hash, envelope.hash);
		assert!(parsed.miniblock_header().is_none());
	}

	#[test]
	fn tampered_envelopes_are_rejected() {
		let mut envelope = Envelope::seal(&content_event(b"hello")).unwrap();
		envelope.event.push(0);

		assert!(matches!(
			ParsedEvent::parse(&envelope),
			Err(Error::EventHashMismatch { .. })
		));
	}

	#[test]
	fn miniblock_number_comes_from_the_header() {
		let events = vec![Envelope::seal(&content_event(b"a")).unwrap()];
		let miniblock = Miniblock::build(Address::ZERO, 42, Hash::ZERO, events).unwrap();

		assert_eq!(miniblock.number().unwrap(), 42);
		assert_eq!(miniblock.header().unwrap().event_hashes.len(), 1);
	}

	#[test]
	fn content_header_is_not_a_miniblock_header() {
		let miniblock = Miniblock {
			events: vec![],
			header: Envelope::seal(&content_event(b"not a header")).unwrap(),
		};

		assert!(matches!(
			miniblock.number(),
			Err(Error::NotAMiniblockHeader(_))
		));
	}
}
