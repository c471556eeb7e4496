pub mod aggregation_service;
pub mod department_report_service;
pub mod distribution_service;
pub mod evaluation_service;
pub mod normalization;
pub mod ranking_service;
pub mod review_service;
pub mod scoring_engine;
pub mod settings_service;
pub mod task_service;
