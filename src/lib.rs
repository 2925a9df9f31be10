pub mod db;
pub mod extract;
pub mod job;
pub mod session;
pub mod settings;
pub mod walker;

pub use job::{ExtractionJob, FieldSpec, JobError, PaginationPolicy, Record, RunResult};
pub use session::{PageSession, SessionError, SessionLauncher, SessionOptions, WaitUntil};
pub use settings::Settings;
pub use walker::{EngineOptions, RunError, RunReport, Stage, StopReason, Walker};
