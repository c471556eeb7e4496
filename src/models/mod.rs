pub mod distribution;
pub mod evaluation;
pub mod month;
pub mod performance;
pub mod settings;
pub mod task;
pub mod trigger;
pub mod user;
