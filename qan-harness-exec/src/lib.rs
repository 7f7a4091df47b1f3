//! External command collaborator for the QAN harness. The harness never
//! spawns processes itself: stack bootstrap and the processor test scripts
//! are described as [`CommandInvocation`]s and handed to a
//! [`CommandExecutor`], so tests can swap in a recording executor while the
//! binary uses [`ProcessCommandExecutor`].

pub mod executor;

#[cfg(feature = "dry-run")]
pub use executor::DryRunCommandExecutor;
#[cfg(feature = "std-process")]
pub use executor::ProcessCommandExecutor;
pub use executor::{
    CollaboratorOutcome, CommandExecutor, CommandInvocation, CommandOutput, CommandStatus,
    run_collaborator,
};
