//! External adapters for the billing domain
//!
//! HTTP implementations of the `PaymentGateway` and `NotificationChannel`
//! ports. The PostgreSQL store lives in `infra_db`; in-memory doubles live
//! in `ports::mock`.

pub mod mail;
pub mod processor;

pub use mail::{HttpMailChannel, MailConfig};
pub use processor::{ProcessorClient, ProcessorConfig};
