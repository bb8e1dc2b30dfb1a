//! Buildspec version coordination.
//!
//! A fleet of builders agrees on which manifest snapshot ("buildspec") each
//! run builds by sharing one git-backed directory of specs and per-builder
//! status symlinks. There is no lock service: the only mutual-exclusion
//! primitive is a git push being rejected as non-fast-forward, which makes
//! every state transition an optimistic-concurrency round of
//! sync → mutate → commit → push.

pub mod error;
pub mod manager;
pub mod store;
pub mod version;

pub use error::{BuildSpecError, BuildSpecResult};
pub use manager::BuildSpecsManager;
pub use store::{SpecStatus, SpecStore};
pub use version::{BuildVersion, VersionFile};
