pub mod agent;
pub mod analyzer;
pub mod bus;
pub mod config;
pub mod engine;
pub mod errors;
pub mod global_variables;
pub mod history;
pub mod kernel;
pub mod predictor;
pub mod strategy;
pub mod time_pattern;
pub mod topology;
pub mod turns;
