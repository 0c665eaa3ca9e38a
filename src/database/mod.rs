//! # Database Operations
//!
//! Connection management and schema migrations for the ingestion pipeline.
//!
//! ## Key Components
//!
//! - [`connection`] - Pooled connections built from [`crate::config::DatabaseConfig`]
//! - [`migrations`] - Embedded migration system with advisory-lock concurrency control
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use eligibility_core::database::{DatabaseConnection, DatabaseMigrations};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = DatabaseConnection::new().await?;
//! DatabaseMigrations::run_all(db.pool()).await?;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod migrations;

pub use connection::DatabaseConnection;
pub use migrations::{DatabaseMigrations, Migration};
