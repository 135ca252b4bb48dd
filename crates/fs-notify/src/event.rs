use std::{
	fmt,
	path::{Path, PathBuf},
};

/// A single portable filesystem operation, each one owning exactly one bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Op {
	Create = 1 << 0,
	Write = 1 << 1,
	Remove = 1 << 2,
	Rename = 1 << 3,
	Chmod = 1 << 4,
}

impl Op {
	/// Rendering order used by [`OpMask`]'s `Display`, which is not the bit order.
	pub const CANONICAL_ORDER: [Self; 5] = [
		Self::Create,
		Self::Remove,
		Self::Write,
		Self::Rename,
		Self::Chmod,
	];

	#[must_use]
	pub const fn bits(self) -> u32 {
		self as u32
	}

	#[must_use]
	pub const fn from_bits(bits: u32) -> Option<Self> {
		match bits {
			1 => Some(Self::Create),
			2 => Some(Self::Write),
			4 => Some(Self::Remove),
			8 => Some(Self::Rename),
			16 => Some(Self::Chmod),
			_ => None,
		}
	}

	#[must_use]
	pub const fn name(self) -> &'static str {
		match self {
			Self::Create => "CREATE",
			Self::Write => "WRITE",
			Self::Remove => "REMOVE",
			Self::Rename => "RENAME",
			Self::Chmod => "CHMOD",
		}
	}

	/// Name of a raw value treated as a single operation, `"INVALID OP"` when it isn't one.
	#[must_use]
	pub const fn name_of(bits: u32) -> &'static str {
		match Self::from_bits(bits) {
			Some(op) => op.name(),
			None => "INVALID OP",
		}
	}
}

impl fmt::Display for Op {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}

/// Bit set of [`Op`]s describing everything that happened in one event.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpMask(u32);

impl OpMask {
	#[must_use]
	pub const fn empty() -> Self {
		Self(0)
	}

	#[must_use]
	pub const fn from_bits(bits: u32) -> Self {
		Self(bits)
	}

	#[must_use]
	pub const fn bits(self) -> u32 {
		self.0
	}

	#[must_use]
	pub const fn is_empty(self) -> bool {
		self.0 == 0
	}

	pub fn set(&mut self, op: Op) {
		self.0 |= op.bits();
	}

	/// Flips the bit for `op`, so it must only be called for bits known to be set.
	pub fn unset(&mut self, op: Op) {
		self.0 ^= op.bits();
	}

	#[must_use]
	pub const fn is_set(self, op: Op) -> bool {
		self.0 & op.bits() != 0
	}

	#[must_use]
	pub fn with(mut self, op: Op) -> Self {
		self.set(op);
		self
	}

	/// Renders the whole mask as if it was a single [`Op`].
	#[must_use]
	pub const fn op_name(self) -> &'static str {
		Op::name_of(self.0)
	}
}

impl From<Op> for OpMask {
	fn from(op: Op) -> Self {
		Self(op.bits())
	}
}

impl FromIterator<Op> for OpMask {
	fn from_iter<I: IntoIterator<Item = Op>>(iter: I) -> Self {
		iter.into_iter().fold(Self::empty(), Self::with)
	}
}

impl fmt::Display for OpMask {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut first = true;
		for op in Op::CANONICAL_ORDER {
			if !self.is_set(op) {
				continue;
			}
			if !first {
				f.write_str("|")?;
			}
			f.write_str(op.name())?;
			first = false;
		}

		Ok(())
	}
}

/// A filesystem change, built once by a driver and handed over to an [`EventSink`].
///
/// [`EventSink`]: crate::EventSink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
	path: PathBuf,
	mask: OpMask,
}

impl Event {
	#[must_use]
	pub fn new(path: impl Into<PathBuf>, mask: OpMask) -> Self {
		Self {
			path: path.into(),
			mask,
		}
	}

	/// Path of the file that caused this event
	#[must_use]
	pub fn path(&self) -> &Path {
		&self.path
	}

	#[must_use]
	pub const fn mask(&self) -> OpMask {
		self.mask
	}

	/// Same as [`Event::mask`], kept for callers coming from `fsnotify`-style APIs.
	#[must_use]
	pub const fn op(&self) -> OpMask {
		self.mask
	}

	#[must_use]
	pub fn into_path(self) -> PathBuf {
		self.path
	}
}

impl fmt::Display for Event {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:?} [{}]", self.path.display().to_string(), self.mask)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const ALL: [Op; 5] = [Op::Create, Op::Write, Op::Remove, Op::Rename, Op::Chmod];

	#[test]
	fn op_names() {
		assert_eq!(Op::Create.to_string(), "CREATE");
		assert_eq!(Op::Write.to_string(), "WRITE");
		assert_eq!(Op::Remove.to_string(), "REMOVE");
		assert_eq!(Op::Rename.to_string(), "RENAME");
		assert_eq!(Op::Chmod.to_string(), "CHMOD");
		assert_eq!(Op::name_of(0), "INVALID OP");
		assert_eq!(Op::name_of(3), "INVALID OP");
		assert_eq!(Op::name_of(1 << 7), "INVALID OP");
		assert_eq!(OpMask::empty().op_name(), "INVALID OP");
		assert_eq!(OpMask::from(Op::Rename).op_name(), "RENAME");
	}

	#[test]
	fn set_is_idempotent_and_unset_clears_only_its_bit() {
		for base in 0..32 {
			for op in ALL {
				let original = OpMask::from_bits(base);

				let mut mask = original;
				mask.set(op);
				mask.set(op);
				assert!(mask.is_set(op));

				mask.unset(op);
				assert!(!mask.is_set(op));
				assert_eq!(mask.bits(), original.bits() & !op.bits());
			}
		}
	}

	#[test]
	fn unset_toggles_a_clear_bit() {
		let mut mask = OpMask::empty();
		mask.unset(Op::Chmod);
		assert!(mask.is_set(Op::Chmod));
	}

	#[test]
	fn mask_rendering() {
		let mut mask = OpMask::empty();
		assert_eq!(mask.to_string(), "");

		mask.set(Op::Create);
		assert_eq!(mask.to_string(), Op::Create.to_string());

		mask.set(Op::Write);
		assert_eq!(mask.to_string(), "CREATE|WRITE");

		let reversed = [Op::Write, Op::Create].into_iter().collect::<OpMask>();
		assert_eq!(reversed.to_string(), "CREATE|WRITE");

		let all = ALL.into_iter().rev().collect::<OpMask>();
		assert_eq!(all.to_string(), "CREATE|REMOVE|WRITE|RENAME|CHMOD");
	}

	#[test]
	fn event_rendering() {
		let event = Event::new("/tmp/a b", OpMask::from(Op::Remove).with(Op::Rename));
		assert_eq!(event.to_string(), r#""/tmp/a b" [REMOVE|RENAME]"#);
		assert_eq!(event.op(), event.mask());
	}
}
