use river_protocol::Address;

use parking_lot::RwLock;
use rand::seq::SliceRandom;

/// Per stream view of which replicas form the quorum and which one we currently sync against.
///
/// The first `replication_factor` registry nodes are the quorum, the remaining ones are still
/// reconciling and are never used as a sync source. `remotes` is the quorum without the local
/// node, kept in a random order so many trackers don't converge on the same replica.
#[derive(Debug)]
pub struct StreamNodes {
	inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
	quorum_nodes: Vec<Address>,
	reconcile_nodes: Vec<Address>,
	remotes: Vec<Address>,
	sticky_peer_index: usize,
}

impl Inner {
	fn build(replication_factor: usize, nodes: &[Address], local_node: Address) -> Self {
		// A replication factor of 0 comes from streams allocated before the field existed,
		// every node of those streams is part of the quorum.
		let quorum_len = if replication_factor == 0 {
			nodes.len()
		} else {
			replication_factor.min(nodes.len())
		};

		let quorum_nodes = nodes[..quorum_len].to_vec();
		let reconcile_nodes = nodes[quorum_len..].to_vec();

		let mut remotes = quorum_nodes
			.iter()
			.copied()
			.filter(|node| *node != local_node)
			.collect::<Vec<_>>();
		remotes.shuffle(&mut rand::thread_rng());

		Self {
			quorum_nodes,
			reconcile_nodes,
			remotes,
			sticky_peer_index: 0,
		}
	}

	fn sticky_peer(&self) -> Address {
		self.remotes
			.get(self.sticky_peer_index)
			.copied()
			.unwrap_or(Address::ZERO)
	}

	fn reshuffle_avoiding(&mut self, previous: Address) {
		self.remotes.shuffle(&mut rand::thread_rng());
		self.sticky_peer_index = 0;

		if self.remotes.len() > 1 && self.remotes[0] == previous {
			let last = self.remotes.len() - 1;
			self.remotes.swap(0, last);
		}
	}
}

impl StreamNodes {
	#[must_use]
	pub fn new(replication_factor: usize, nodes: &[Address], local_node: Address) -> Self {
		Self {
			inner: RwLock::new(Inner::build(replication_factor, nodes, local_node)),
		}
	}

	#[must_use]
	pub fn quorum_nodes(&self) -> Vec<Address> {
		self.inner.read().quorum_nodes.clone()
	}

	#[must_use]
	pub fn reconcile_nodes(&self) -> Vec<Address> {
		self.inner.read().reconcile_nodes.clone()
	}

	#[must_use]
	pub fn remotes(&self) -> Vec<Address> {
		self.inner.read().remotes.clone()
	}

	/// Node the stream should be synced from, [`Address::ZERO`] when the local node is the
	/// only quorum member.
	#[must_use]
	pub fn sticky_peer(&self) -> Address {
		self.inner.read().sticky_peer()
	}

	/// Moves to the next remote if `current_peer` is still the selected one. Callers holding a
	/// stale view get the already advanced peer back, so concurrent failure reports for the
	/// same node advance only once. Wrapping around reshuffles the remotes.
	pub fn advance_sticky_peer(&self, current_peer: Address) -> Address {
		let mut inner = self.inner.write();

		if inner.remotes.is_empty() {
			return Address::ZERO;
		}

		if inner.sticky_peer() != current_peer {
			return inner.sticky_peer();
		}

		inner.sticky_peer_index += 1;
		if inner.sticky_peer_index >= inner.remotes.len() {
			inner.reshuffle_avoiding(current_peer);
		}

		inner.sticky_peer()
	}

	/// Recomputes the view from a fresh registry read. The sticky target is kept when it is
	/// still a remote so a benign refresh doesn't move the stream to another session.
	pub fn reset(&self, replication_factor: usize, nodes: &[Address], local_node: Address) {
		let mut inner = self.inner.write();

		let previous = inner.sticky_peer();
		let mut fresh = Inner::build(replication_factor, nodes, local_node);

		if let Some(idx) = fresh.remotes.iter().position(|node| *node == previous) {
			fresh.sticky_peer_index = idx;
		}

		*inner = fresh;
	}
}
