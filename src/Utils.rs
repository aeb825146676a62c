//! different utility modules used throughout the project
/// logger setup, statistics files and metrics tables
pub mod logger;
