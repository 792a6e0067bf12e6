//! Job dispatch: answering "what should I run next" for a polling job server.

mod collaborators;
mod directive;
mod dispatcher;
mod target;

pub use collaborators::{JobStarter, LivenessTracker, SchedulingPass, StartError};
pub use directive::{Directive, JobStartPayload, KillStartPayload};
pub use dispatcher::JobDispatcher;
pub use target::DispatchTarget;
