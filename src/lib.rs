pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use db::DbPool;
pub use error::{AppError, AppResult};
pub use models::month::Month;
pub use models::settings::ScoringConfig;
pub use models::trigger::RecomputeTrigger;
pub use services::scoring_engine::{MonthlyRecomputeSummary, RecomputeOutcome, ScoringEngine};
