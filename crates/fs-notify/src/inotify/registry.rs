use super::sys::{WatchDescriptor, WatchId, WatchMask};

use std::{
	collections::HashMap,
	path::{Path, PathBuf},
};

#[derive(Debug, Clone)]
pub struct Watch {
	pub wd: WatchDescriptor,
	pub id: WatchId,
	pub flags: WatchMask,
}

/// Both directions of the path <-> watch mapping.
///
/// The kernel reports events on a watched entry itself without a name, so the watch id is the
/// only way back to the path. Every live watch is reachable from its id; ids the kernel hasn't
/// retired yet keep resolving to their old path after it gets a new watch, so their last records
/// (usually a delete-self) still find it.
#[derive(Debug, Default)]
pub struct WatchRegistry {
	watches: HashMap<PathBuf, Watch>,
	paths: HashMap<WatchId, PathBuf>,
}

impl WatchRegistry {
	pub fn get(&self, path: &Path) -> Option<&Watch> {
		self.watches.get(path)
	}

	pub fn path_of(&self, id: WatchId) -> Option<&Path> {
		self.paths.get(&id).map(PathBuf::as_path)
	}

	/// Inserts or updates the watch of `path`.
	///
	/// The kernel hands out one watch per inode, so an id already owned by another path moves over
	/// to `path`.
	pub fn insert(&mut self, path: PathBuf, wd: WatchDescriptor, flags: WatchMask) {
		let id = WatchId::from(&wd);

		if let Some(owner) = self.paths.insert(id, path.clone()) {
			if owner != path && self.watches.get(&owner).is_some_and(|watch| watch.id == id) {
				self.watches.remove(&owner);
			}
		}

		self.watches.insert(path, Watch { wd, id, flags });
	}

	pub fn remove(&mut self, path: &Path) -> Option<Watch> {
		let watch = self.watches.remove(path)?;
		self.paths.remove(&watch.id);

		Some(watch)
	}

	/// Forgets a watch the kernel already dropped on its own, returning the path it resolved to.
	///
	/// The path's current watch is only dropped when it is the retired one.
	pub fn retire(&mut self, id: WatchId) -> Option<PathBuf> {
		let path = self.paths.remove(&id)?;
		if self.watches.get(&path).is_some_and(|watch| watch.id == id) {
			self.watches.remove(&path);
		}

		Some(path)
	}

	pub fn len(&self) -> usize {
		self.watches.len()
	}
}
