//! Database Engine Module

pub mod bringup;
pub mod constructors;
pub mod database;

pub use database::Database;
