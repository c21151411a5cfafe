use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// State of a build.
///
/// The discriminants are the persisted representation and the ordering is
/// meaningful: every state greater than [`BuildState::Fail`] carries a usable
/// artifact. Keep this ordered and never renumber.
#[derive(
	Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum BuildState {
	/// Recorded, waiting for a worker slot.
	#[default]
	Created = 0,
	/// Picked up by an executor, preparing the build environment.
	Init = 1,
	/// Running the build instructions.
	Building = 2,
	/// Terminated without an artifact.
	Fail = 3,
	/// Built on the freshly updated environment.
	Success = 4,
	/// Built on the last-known-good environment.
	FallbackSuccess = 5,
}

impl BuildState {
	/// Whether the build has stopped executing.
	pub fn is_terminal(&self) -> bool {
		*self >= Self::Fail
	}

	/// Whether an executor currently owns the build.
	pub fn is_running(&self) -> bool {
		matches!(self, Self::Init | Self::Building)
	}

	/// Whether the build terminated with a usable artifact.
	pub fn has_artifact(&self) -> bool {
		*self > Self::Fail
	}

	/// Checks whether `next` is a legal successor of this state.
	///
	/// Re-recording the current state is always allowed. A failed build may
	/// re-enter at [`BuildState::Created`] through an explicit retry, and any
	/// non-terminal build may be forced to [`BuildState::Fail`].
	pub fn can_advance_to(&self, next: BuildState) -> bool {
		use BuildState::*;

		if *self == next {
			return true;
		}
		match (self, next) {
			(Fail, Created) => true,
			(Created, Init) => true,
			(Init, Building | Success) => true,
			(Building, Success | FallbackSuccess) => true,
			(current, Fail) => !current.is_terminal(),
			_ => false,
		}
	}
}

impl From<u8> for BuildState {
	fn from(value: u8) -> Self {
		Self::from(value as i16)
	}
}

/// Unknown values are decoded as failed.
impl From<i16> for BuildState {
	fn from(value: i16) -> Self {
		match value {
			0 => Self::Created,
			1 => Self::Init,
			2 => Self::Building,
			3 => Self::Fail,
			4 => Self::Success,
			5 => Self::FallbackSuccess,
			_ => Self::Fail,
		}
	}
}

impl Display for BuildState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			BuildState::Created => "Created",
			BuildState::Init => "Init",
			BuildState::Building => "Building",
			BuildState::Fail => "Fail",
			BuildState::Success => "Success",
			BuildState::FallbackSuccess => "FallbackSuccess",
		})
	}
}
