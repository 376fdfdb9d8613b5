//! # Authentication Module
//!
//! Handles JWT token issuance, validation, and middleware for securing API endpoints.
//! Every position, signal and profile is owned by the authenticated user.

pub mod jwt;
pub mod middleware;
pub mod models;
