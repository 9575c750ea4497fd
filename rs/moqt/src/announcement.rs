use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::path;

/// A declaration that a broadcast path is currently being served.
///
/// Created active; transitions to ended at most once and stays ended.
/// Clones share the same lifecycle.
#[derive(Clone)]
pub struct Announcement {
	inner: Arc<Inner>,
}

struct Inner {
	path: String,
	ended: watch::Sender<bool>,

	// Fired once on end; None once the announcement has ended.
	observers: Mutex<Option<Vec<Observer>>>,
}

type Observer = Box<dyn FnOnce() + Send>;

impl Announcement {
	pub fn new(path: impl Into<String>) -> Self {
		Self {
			inner: Arc::new(Inner {
				path: path.into(),
				ended: watch::Sender::new(false),
				observers: Mutex::new(Some(Vec::new())),
			}),
		}
	}

	pub fn path(&self) -> &str {
		&self.inner.path
	}

	/// The path relative to the given prefix, if it matches.
	pub fn suffix(&self, prefix: &str) -> Option<&str> {
		path::suffix(&self.inner.path, prefix)
	}

	pub fn is_active(&self) -> bool {
		!*self.inner.ended.borrow()
	}

	/// Transition to ended, firing all registered observers.
	///
	/// Does nothing if the announcement has already ended.
	pub fn end(&self) {
		let observers = match self.inner.observers.lock().unwrap().take() {
			Some(observers) => observers,
			None => return,
		};

		self.inner.ended.send_replace(true);

		// Observers run outside the lock; they may re-enter this announcement.
		for observer in observers {
			observer();
		}
	}

	/// Register a callback for the ended transition.
	///
	/// If the announcement has already ended, the callback is invoked inline.
	pub fn on_end(&self, f: impl FnOnce() + Send + 'static) {
		let mut observers = self.inner.observers.lock().unwrap();
		match observers.as_mut() {
			Some(observers) => observers.push(Box::new(f)),
			None => {
				drop(observers);
				f();
			}
		}
	}

	/// Wait until the announcement has ended.
	pub async fn ended(&self) {
		let mut rx = self.inner.ended.subscribe();
		// The sender can't be dropped while self is alive.
		let _ = rx.wait_for(|ended| *ended).await;
	}

	/// Whether two handles refer to the same announcement.
	pub fn same(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.inner, &other.inner)
	}
}

impl std::fmt::Debug for Announcement {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Announcement")
			.field("path", &self.inner.path)
			.field("active", &self.is_active())
			.finish()
	}
}
