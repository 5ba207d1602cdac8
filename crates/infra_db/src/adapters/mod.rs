//! Port adapters
//!
//! PostgreSQL implementations of the billing domain's persistence ports.
//! Each adapter wraps a repository, translates rows into domain models and
//! maps [`DatabaseError`](crate::DatabaseError) into `PortError`.
//!
//! ```rust,ignore
//! use infra_db::adapters::{PostgresInvoiceStore, PostgresSettingsSource};
//!
//! let store = PostgresInvoiceStore::new(pool.clone());
//! let settings = PostgresSettingsSource::new(pool);
//! ```

pub mod billing;
pub mod settings;

pub use billing::PostgresInvoiceStore;
pub use settings::PostgresSettingsSource;
