//! Queue-driven workers that move a job through its lifecycle.
//!
//! Each worker implements [`MessageHandler`] and is driven by a [`PollLoop`]
//! over its own queue:
//! - **Request worker**: stages a submitted input and launches annotation
//! - **Archive worker**: moves a free user's result into the cold vault
//! - **Thaw worker**: starts cold-tier retrieval after an upgrade
//! - **Restore handler**: copies retrieved bytes back into hot storage
//!
//! Annotation itself runs outside the polling loop: [`TaskLauncher`] spawns
//! a [`TaskRunner`] per job and reports back over a channel.
//!
//! # Delivery
//!
//! Queues deliver at least once. A handler may see the same message again,
//! and every step is written to be a no-op on replay: status moves are
//! conditional and archive/restore check the record before acting.
//! Partial failures are logged and tallied in the [`OutcomeLedger`] rather
//! than holding the message back.

pub mod annotator;
pub mod archive;
pub mod outcome;
pub mod poll;
pub mod request;
pub mod restore;
pub mod runner;
pub mod thaw;

use std::sync::Arc;

use crate::accounts::AccountDirectory;
use crate::storage::{ColdStore, ObjectStore};
use crate::store::JobStore;

pub use annotator::{AnnotationRun, Annotator};
pub use archive::{ArchiveOutcome, ArchiveWorker};
pub use outcome::{OutcomeCount, OutcomeLedger, StepOutcome};
pub use poll::{Disposition, MessageHandler, PollLoop};
pub use request::RequestWorker;
pub use restore::{InvocationResponse, RestoreHandler, RestoreOutcome};
pub use runner::{AnnotationTask, TaskLauncher, TaskReport, TaskRunner};
pub use thaw::{ThawOutcome, ThawWorker};

/// Shared handles to the backing services every worker talks to.
#[derive(Clone)]
pub struct Backends {
    pub jobs: Arc<dyn JobStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub vault: Arc<dyn ColdStore>,
    pub accounts: Arc<dyn AccountDirectory>,
    pub ledger: Arc<OutcomeLedger>,
}
