pub mod audit;
pub mod error;
pub mod events;
pub mod executor;
pub mod matcher;
pub mod scheduler;
pub(crate) mod templating;

pub use error::EngineError;
pub use events::{event_channel, run_event_listener, EventPublisher, EventReceiver};
pub use executor::{execute_step, StepOutcome};
pub use matcher::{on_event, MatchFailure, MatchReport, MaterializedRun};
pub use scheduler::schedule_step;
