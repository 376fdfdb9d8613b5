//! # Database Module
//!
//! PostgreSQL persistence for positions, signals and user profiles.
//! Includes connection management, row models, migrations and the
//! `PortfolioStore` implementation.

pub mod connection;
pub mod migrations;
pub mod models;
pub mod store;

pub use connection::{DatabaseConfig, DatabaseConnection};
