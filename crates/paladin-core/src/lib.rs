//! Paladin core library.
//!
//! The commit-queue validation pool: acquiring ready-to-test changes from a
//! review tool, ordering them by dependency (git ancestry plus `CQ-DEPEND`
//! footers), applying them into a shared checkout, and submitting the
//! survivors back through the review tool.
//!
//! Everything here is synchronous; concurrency in the larger system comes
//! from independent builder processes coordinating through shared git
//! repositories, not from threads within one process.

pub mod apply;
pub mod change;
pub mod deps;
pub mod error;
pub mod fakes;
pub mod git;
pub mod ident;
pub mod manifest;
pub mod notify;
pub mod pool;
pub mod review;
pub mod telemetry;
pub mod tree_status;

pub use change::{Change, ChangeData};
pub use error::{PatchError, PatchResult};
pub use git::{GitError, GitRepo};
pub use ident::{ChangeId, PatchDep, PoolLocalId};
pub use manifest::Manifest;
pub use pool::{Overlays, PoolConfig, PoolError, ValidationPool};
pub use review::{ChangeStatus, ReviewError, ReviewTool};
pub use telemetry::init_tracing;
pub use tree_status::{TreeState, TreeStatusSource};

/// Paladin version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
