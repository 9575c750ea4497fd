use std::collections::HashMap;

use web_async::Lock;

use crate::{path, Announcement, Error};

/// A prefix tree mapping broadcast paths to track handlers and announcement
/// subscribers.
///
/// The tree is shared; clones refer to the same state. `T` is whatever the
/// owner wants resolved per broadcast, typically a track handler.
pub struct TrackMux<T: Clone> {
	root: Lock<Node<T>>,
}

struct Node<T> {
	handler: Option<T>,
	children: HashMap<String, Node<T>>,

	// Channels onto which announcements in this subtree are pushed.
	subscribers: Vec<async_channel::Sender<Announcement>>,

	// Live announcements in this subtree, keyed by full path.
	announced: HashMap<String, Announcement>,
}

impl<T> Default for Node<T> {
	fn default() -> Self {
		Self {
			handler: None,
			children: HashMap::new(),
			subscribers: Vec::new(),
			announced: HashMap::new(),
		}
	}
}

impl<T> Node<T> {
	fn is_empty(&self) -> bool {
		self.handler.is_none() && self.children.is_empty() && self.subscribers.is_empty() && self.announced.is_empty()
	}
}

impl<T: Clone> Default for TrackMux<T> {
	fn default() -> Self {
		Self {
			root: Lock::new(Node::default()),
		}
	}
}

impl<T: Clone> Clone for TrackMux<T> {
	fn clone(&self) -> Self {
		Self {
			root: self.root.clone(),
		}
	}
}

impl<T: Clone + Send + 'static> TrackMux<T> {
	pub fn new() -> Self {
		Self::default()
	}

	/// Register a handler at the given path.
	///
	/// Fails if a handler is already registered there.
	pub fn publish(&self, broadcast: &str, handler: T) -> Result<(), Error> {
		if !path::is_valid(broadcast) {
			return Err(Error::ProtocolViolation);
		}

		let mut root = self.root.lock();
		let node = Self::entry(&mut root, broadcast);
		if node.handler.is_some() {
			return Err(Error::DuplicatedAnnounce);
		}

		node.handler = Some(handler);
		Ok(())
	}

	/// Register a handler and diffuse the announcement to all subscribers on
	/// the root-to-path walk.
	///
	/// If an announcement is already live at the path, it is ended and
	/// superseded. When this announcement ends, the handler is removed.
	pub fn announce(&self, announcement: Announcement, handler: T) -> Result<(), Error> {
		let broadcast = announcement.path().to_string();
		if !path::is_valid(&broadcast) {
			return Err(Error::ProtocolViolation);
		}

		let superseded = {
			let mut root = self.root.lock();

			let leaf = Self::entry(&mut root, &broadcast);
			let superseded = leaf.announced.get(&broadcast).cloned();
			if superseded.is_none() && leaf.handler.is_some() {
				// Registered via publish; there is no announcement to supersede.
				return Err(Error::DuplicatedAnnounce);
			}
			leaf.handler = Some(handler);

			// Index and diffuse along the walk, root first.
			let segments: Vec<&str> = path::segments(&broadcast).collect();
			insert_announced_walk(&mut root, &segments, &broadcast, &announcement);

			superseded
		};

		if let Some(old) = superseded {
			old.end();
		}

		let mux = self.clone();
		let guard = announcement.clone();
		announcement.on_end(move || mux.unannounce(&guard));

		Ok(())
	}

	/// Remove the handler at the given path, pruning empty nodes.
	pub fn remove(&self, broadcast: &str) {
		let mut root = self.root.lock();
		let segments: Vec<&str> = path::segments(broadcast).collect();
		remove_handler(&mut root, &segments);
	}

	/// The most specific handler registered on the root-to-path walk.
	pub fn handler(&self, broadcast: &str) -> Option<T> {
		let root = self.root.lock();

		let mut found = root.handler.clone();
		let mut node = &*root;
		for segment in path::segments(broadcast) {
			node = match node.children.get(segment) {
				Some(child) => child,
				// The deepest registered ancestor still applies.
				None => break,
			};
			if let Some(handler) = &node.handler {
				found = Some(handler.clone());
			}
		}

		found
	}

	/// Subscribe to announcements under the given prefix.
	///
	/// Returns a snapshot of the currently live announcements in the subtree
	/// plus a channel receiving every announcement added afterwards.
	pub fn announced(&self, prefix: &str) -> Result<(Vec<Announcement>, async_channel::Receiver<Announcement>), Error> {
		if !path::is_valid_prefix(prefix) {
			return Err(Error::ProtocolViolation);
		}

		let mut root = self.root.lock();
		let node = Self::entry(&mut root, prefix);

		let snapshot = node.announced.values().cloned().collect();
		let (tx, rx) = async_channel::unbounded();
		node.subscribers.push(tx);

		Ok((snapshot, rx))
	}

	/// Drop closed subscriber channels on the walk to the prefix, pruning
	/// nodes left empty.
	///
	/// Called when a prefix subscription ends, so an otherwise idle walk does
	/// not outlive its last subscriber.
	pub(crate) fn prune(&self, prefix: &str) {
		let mut root = self.root.lock();
		let segments: Vec<&str> = path::segments(prefix).collect();
		prune_walk(&mut root, &segments);
	}

	/// Remove an ended announcement and its handler, pruning empty nodes.
	fn unannounce(&self, announcement: &Announcement) {
		let mut root = self.root.lock();
		let segments: Vec<&str> = path::segments(announcement.path()).collect();
		remove_announced(&mut root, &segments, announcement);
	}

	fn entry<'a>(root: &'a mut Node<T>, broadcast: &str) -> &'a mut Node<T> {
		let mut node = root;
		for segment in path::segments(broadcast) {
			node = node.children.entry(segment.to_string()).or_default();
		}
		node
	}

	#[cfg(test)]
	fn is_idle(&self) -> bool {
		self.root.lock().is_empty()
	}
}

/// Index the announcement at every node on the root-to-path walk, pushing it
/// to the subscribers passed on the way down.
fn insert_announced_walk<T>(node: &mut Node<T>, segments: &[&str], broadcast: &str, announcement: &Announcement) {
	insert_announced(node, broadcast, announcement);
	if let Some((segment, rest)) = segments.split_first() {
		if let Some(child) = node.children.get_mut(*segment) {
			insert_announced_walk(child, rest, broadcast, announcement);
		}
	}
}

/// Index the announcement at this node and push it to live subscribers.
fn insert_announced<T>(node: &mut Node<T>, broadcast: &str, announcement: &Announcement) {
	node.announced.insert(broadcast.to_string(), announcement.clone());

	node.subscribers.retain(|s| !s.is_closed());
	for subscriber in &node.subscribers {
		// Unbounded; only fails if the receiver is gone.
		let _ = subscriber.try_send(announcement.clone());
	}
}

/// Remove the handler at the end of the walk, pruning nodes left empty.
/// Returns true if the caller may prune the node.
fn remove_handler<T>(node: &mut Node<T>, segments: &[&str]) -> bool {
	match segments.split_first() {
		None => node.handler = None,
		Some((segment, rest)) => {
			if let Some(child) = node.children.get_mut(*segment) {
				if remove_handler(child, rest) {
					node.children.remove(*segment);
				}
			}
		}
	}

	node.subscribers.retain(|s| !s.is_closed());
	node.is_empty()
}

/// Drop closed subscriber channels along the walk, pruning nodes left empty.
/// Returns true if the caller may prune the node.
fn prune_walk<T>(node: &mut Node<T>, segments: &[&str]) -> bool {
	if let Some((segment, rest)) = segments.split_first() {
		if let Some(child) = node.children.get_mut(*segment) {
			if prune_walk(child, rest) {
				node.children.remove(*segment);
			}
		}
	}

	node.subscribers.retain(|s| !s.is_closed());
	node.is_empty()
}

/// Remove the announcement from the subtree index along the walk, detaching
/// the handler at the leaf. Skips if a different announcement has since been
/// published at the same path.
fn remove_announced<T>(node: &mut Node<T>, segments: &[&str], announcement: &Announcement) -> bool {
	let current = node.announced.get(announcement.path());
	let matches = current.is_some_and(|a| a.same(announcement));

	if matches {
		node.announced.remove(announcement.path());

		match segments.split_first() {
			None => node.handler = None,
			Some((segment, rest)) => {
				if let Some(child) = node.children.get_mut(*segment) {
					if remove_announced(child, rest, announcement) {
						node.children.remove(*segment);
					}
				}
			}
		}
	}

	node.subscribers.retain(|s| !s.is_closed());
	node.is_empty()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn publish_and_resolve() {
		let mux = TrackMux::new();
		mux.publish("/test/alpha", "alpha").unwrap();
		mux.publish("/test", "root").unwrap();

		assert_eq!(mux.handler("/test/alpha"), Some("alpha"));
		// Most specific handler on the walk wins.
		assert_eq!(mux.handler("/test/beta"), Some("root"));
		assert_eq!(mux.handler("/other"), None);
	}

	#[test]
	fn duplicate_publish() {
		let mux = TrackMux::new();
		mux.publish("/test", 1).unwrap();
		assert!(matches!(mux.publish("/test", 2), Err(Error::DuplicatedAnnounce)));
	}

	#[test]
	fn remove_restores_shape() {
		let mux = TrackMux::<u32>::new();
		assert!(mux.is_idle());

		mux.publish("/a/b/c", 1).unwrap();
		assert!(!mux.is_idle());

		mux.remove("/a/b/c");
		assert!(mux.is_idle());
	}

	#[tokio::test]
	async fn announce_diffusion() {
		let mux = TrackMux::new();

		let (snapshot_a, updates_a) = mux.announced("/a/").unwrap();
		let (snapshot_ab, updates_ab) = mux.announced("/a/b/").unwrap();
		assert!(snapshot_a.is_empty());
		assert!(snapshot_ab.is_empty());

		let announcement = Announcement::new("/a/b/c");
		mux.announce(announcement.clone(), "handler").unwrap();

		// Both prefixes on the walk receive it.
		let got_a = updates_a.recv().await.unwrap();
		let got_ab = updates_ab.recv().await.unwrap();
		assert_eq!(got_a.path(), "/a/b/c");
		assert_eq!(got_ab.path(), "/a/b/c");

		// Both handles observe the end.
		announcement.end();
		got_a.ended().await;
		got_ab.ended().await;
	}

	#[test]
	fn announce_snapshot() {
		let mux = TrackMux::new();

		let announcement = Announcement::new("/a/b/c");
		mux.announce(announcement, "handler").unwrap();

		let (snapshot, _updates) = mux.announced("/a/").unwrap();
		assert_eq!(snapshot.len(), 1);
		assert_eq!(snapshot[0].path(), "/a/b/c");

		// A sibling prefix sees nothing.
		let (snapshot, _updates) = mux.announced("/b/").unwrap();
		assert!(snapshot.is_empty());
	}

	#[test]
	fn announce_end_removes_handler() {
		let mux = TrackMux::new();

		let announcement = Announcement::new("/live/alice");
		mux.announce(announcement.clone(), "handler").unwrap();
		assert_eq!(mux.handler("/live/alice"), Some("handler"));

		announcement.end();
		assert_eq!(mux.handler("/live/alice"), None);
		assert!(mux.is_idle());
	}

	#[test]
	fn announce_supersede() {
		let mux = TrackMux::new();

		let old = Announcement::new("/live/alice");
		mux.announce(old.clone(), "old").unwrap();

		let new = Announcement::new("/live/alice");
		mux.announce(new.clone(), "new").unwrap();

		assert!(!old.is_active());
		assert!(new.is_active());
		assert_eq!(mux.handler("/live/alice"), Some("new"));

		// Ending the superseded announcement must not remove the new handler.
		assert_eq!(mux.handler("/live/alice"), Some("new"));
		new.end();
		assert_eq!(mux.handler("/live/alice"), None);
	}

	#[test]
	fn prune_idle_prefix() {
		let mux = TrackMux::<u32>::new();

		let (snapshot, updates) = mux.announced("/idle/prefix/").unwrap();
		assert!(snapshot.is_empty());
		assert!(!mux.is_idle());

		// Dropping the receiver alone leaves the node chain in place.
		drop(updates);
		mux.prune("/idle/prefix/");
		assert!(mux.is_idle());
	}

	#[test]
	fn invalid_path() {
		let mux = TrackMux::new();
		assert!(mux.publish("no-slash", 1).is_err());
		assert!(mux.announced("/no-trailing").is_err());
	}
}
