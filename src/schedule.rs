//! Daily activity schedules: the model, responsiveness, and LLM-driven
//! extension.

pub mod extension;
pub mod model;

pub use extension::{extend_schedule, needs_extension};
pub use model::{Schedule, ScheduleActivity, responsiveness};
