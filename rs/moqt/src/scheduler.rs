use std::{
	cmp::{Ordering, Reverse},
	collections::{BinaryHeap, HashMap},
	sync::{Arc, Mutex},
};

use tokio::sync::watch;

// Ranks the active groups of a session so their stream priorities can be set.
//
// Groups are ranked by ascending track priority, ties broken FIFO by insertion
// order. The top 255 ranks are kept in a sorted Vec where the index is the
// rank; anything deeper goes into an overflow heap and reports u8::MAX until
// promoted. Each entry carries a watch channel so the owning stream can react
// to rank changes.
#[derive(Debug, Clone)]
struct Entry {
	id: u64,
	track: u8,
}

impl PartialEq for Entry {
	fn eq(&self, other: &Self) -> bool {
		self.id == other.id
	}
}

impl Eq for Entry {}

impl PartialOrd for Entry {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Entry {
	fn cmp(&self, other: &Self) -> Ordering {
		// Lower track priority value ranks first; older insertion wins ties.
		self.track.cmp(&other.track).then(self.id.cmp(&other.id))
	}
}

#[derive(Clone, Default)]
pub(crate) struct GroupScheduler {
	state: Arc<Mutex<State>>,
}

impl GroupScheduler {
	pub fn insert(&self, track: u8) -> ScheduleHandle {
		self.state.lock().unwrap().insert(track, self.clone())
	}
}

const MAX_RANKED: usize = 255;

enum Slot {
	Ranked(usize),
	Deferred,
}

#[derive(Default)]
struct State {
	// Sorted ascending; the index is the rank (0 = most urgent).
	ranked: Vec<Entry>,

	// Everything past the ranked window; min-heap so promotion pops the best.
	deferred: BinaryHeap<Reverse<Entry>>,

	slots: HashMap<u64, (Slot, watch::Sender<u8>)>,
	next_id: u64,
}

impl State {
	fn insert(&mut self, track: u8, scheduler: GroupScheduler) -> ScheduleHandle {
		let id = self.next_id;
		self.next_id += 1;

		let entry = Entry { id, track };

		// New entries are unique, so binary_search always misses.
		let pos = self.ranked.binary_search(&entry).unwrap_or_else(|pos| pos);

		if self.ranked.len() >= MAX_RANKED && pos >= self.ranked.len() {
			let (tx, rx) = watch::channel(u8::MAX);
			self.deferred.push(Reverse(entry));
			self.slots.insert(id, (Slot::Deferred, tx));
			return ScheduleHandle { id, rx, scheduler };
		}

		if self.ranked.len() >= MAX_RANKED {
			// Evict the worst ranked entry to make room.
			if let Some(evicted) = self.ranked.pop() {
				Self::update_slot(&mut self.slots, evicted.id, Slot::Deferred);
				self.deferred.push(Reverse(evicted));
			}
		}

		let (tx, rx) = watch::channel(pos as u8);
		self.ranked.insert(pos, entry);
		self.slots.insert(id, (Slot::Ranked(pos), tx));
		self.update_slots_from(pos + 1);

		ScheduleHandle { id, rx, scheduler }
	}

	fn remove(&mut self, id: u64) {
		let Some((slot, _)) = self.slots.remove(&id) else {
			return;
		};

		match slot {
			Slot::Ranked(pos) => {
				self.ranked.remove(pos);

				// Every deferred entry ranks after every ranked entry, so the
				// best deferred entry belongs at the end.
				if let Some(Reverse(promoted)) = self.deferred.pop() {
					let promoted_id = promoted.id;
					self.ranked.push(promoted);
					Self::update_slot(&mut self.slots, promoted_id, Slot::Ranked(self.ranked.len() - 1));
				}

				self.update_slots_from(pos);
			}
			Slot::Deferred => {
				// Rare; BinaryHeap has no removal so rebuild it.
				self.deferred = self.deferred.drain().filter(|Reverse(e)| e.id != id).collect();
			}
		}
	}

	fn update_slots_from(&mut self, start: usize) {
		for (pos, entry) in self.ranked.iter().enumerate().skip(start) {
			Self::update_slot(&mut self.slots, entry.id, Slot::Ranked(pos));
		}
	}

	fn update_slot(slots: &mut HashMap<u64, (Slot, watch::Sender<u8>)>, id: u64, slot: Slot) {
		let Some((current, tx)) = slots.get_mut(&id) else {
			return;
		};
		*current = slot;

		let rank = match current {
			Slot::Ranked(pos) => (*pos).try_into().unwrap_or(u8::MAX),
			Slot::Deferred => u8::MAX,
		};

		let _ = tx.send_if_modified(|r| {
			if *r != rank {
				*r = rank;
				true
			} else {
				false
			}
		});
	}
}

/// A live rank within the scheduler; the slot is released on drop.
pub(crate) struct ScheduleHandle {
	id: u64,
	rx: watch::Receiver<u8>,
	scheduler: GroupScheduler,
}

impl Drop for ScheduleHandle {
	fn drop(&mut self) {
		self.scheduler.state.lock().unwrap().remove(self.id);
	}
}

impl ScheduleHandle {
	/// The current rank; 0 is the most urgent.
	pub fn current(&mut self) -> u8 {
		*self.rx.borrow_and_update()
	}

	/// Wait for the rank to change, returning the new value.
	pub async fn changed(&mut self) -> u8 {
		let _ = self.rx.changed().await;
		*self.rx.borrow_and_update()
	}
}
