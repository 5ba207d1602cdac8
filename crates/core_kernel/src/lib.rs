//! Core Kernel - Foundational types and utilities for the billing system
//!
//! This crate provides the fundamental building blocks used across the workspace:
//! - Money types with precise decimal arithmetic and currency rounding
//! - Calendar arithmetic for billing schedules (due dates, month keys, day counts)
//! - Strongly-typed identifiers
//! - The port/adapter vocabulary shared by every collaborator interface

pub mod money;
pub mod calendar;
pub mod identifiers;
pub mod ports;
pub mod error;

pub use money::{Money, Currency, MoneyError, Rate};
pub use calendar::{Periodicity, YearMonth, CalendarError};
pub use identifiers::{
    CustomerId, PlanId, SubscriptionId, InvoiceId, NotificationId,
};
pub use ports::{
    PortError, DomainPort, HealthCheckable, HealthCheckResult,
    AdapterHealth, CircuitBreakerConfig,
};
pub use error::CoreError;
