//! Repository implementations
//!
//! Repositories encapsulate the SQL for each table group and map between
//! database rows and plain row structs. Domain conversion happens in
//! [`crate::adapters`].
//!
//! Queries are checked at runtime (`sqlx::query_as`), so the crate builds
//! without a live database.

pub mod billing;
pub mod settings;

pub use billing::BillingRepository;
pub use settings::SettingsRepository;
