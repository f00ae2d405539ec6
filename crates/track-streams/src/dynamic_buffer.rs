use std::mem;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("message buffer is full or closed")]
pub struct BufferFull;

/// Bounded single consumer message buffer. Producers never block: once `capacity` messages are
/// pending the buffer closes itself and every later message is rejected, the consumer drains
/// what is left and then observes the close.
#[derive(Debug)]
pub struct DynamicBuffer<T> {
	inner: Mutex<Inner<T>>,
	notify: Notify,
	capacity: usize,
}

#[derive(Debug)]
struct Inner<T> {
	messages: Vec<T>,
	closed: bool,
}

impl<T> DynamicBuffer<T> {
	#[must_use]
	pub fn new(capacity: usize) -> Self {
		Self {
			inner: Mutex::new(Inner {
				messages: Vec::new(),
				closed: false,
			}),
			notify: Notify::new(),
			capacity: capacity.max(1),
		}
	}

	pub fn add_message(&self, message: T) -> Result<(), BufferFull> {
		let res = {
			let mut inner = self.inner.lock();

			if inner.closed {
				Err(BufferFull)
			} else if inner.messages.len() >= self.capacity {
				inner.closed = true;
				Err(BufferFull)
			} else {
				inner.messages.push(message);
				Ok(())
			}
		};

		self.notify.notify_one();

		res
	}

	/// Resolves once there are pending messages or the buffer is closed.
	pub async fn wait(&self) {
		loop {
			{
				let inner = self.inner.lock();
				if inner.closed || !inner.messages.is_empty() {
					return;
				}
			}

			self.notify.notified().await;
		}
	}

	/// Swaps every pending message into `batch`, replacing its previous contents. Returns
	/// `false` once the buffer is closed and fully drained.
	pub fn get_batch(&self, batch: &mut Vec<T>) -> bool {
		batch.clear();

		let mut inner = self.inner.lock();
		if inner.messages.is_empty() {
			return !inner.closed;
		}

		mem::swap(batch, &mut inner.messages);

		true
	}

	pub fn close(&self) {
		self.inner.lock().closed = true;
		self.notify.notify_one();
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.inner.lock().messages.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
