//! Infrastructure Database Layer
//!
//! PostgreSQL persistence for the billing cycle using SQLx.
//!
//! # Architecture
//!
//! The crate follows the repository pattern: repositories own the SQL and
//! row types, adapters implement the domain ports on top of them.
//!
//! - [`PostgresInvoiceStore`]: subscriptions, invoices and the notification log
//! - [`PostgresSettingsSource`]: key-value business settings
//!
//! Schema changes live in `migrations/` and are applied by [`open`].
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_db::{open, DatabaseConfig, PostgresInvoiceStore};
//!
//! let pool = open(&DatabaseConfig::new("postgres://localhost/billing")).await?;
//! let store = PostgresInvoiceStore::new(pool);
//! ```

pub mod pool;
pub mod error;
pub mod repositories;
pub mod adapters;

pub use pool::{create_pool, open, run_migrations, DatabaseConfig, DatabasePool};
pub use error::DatabaseError;
pub use adapters::{PostgresInvoiceStore, PostgresSettingsSource};
