// src/lib.rs
//! Core engine for the warehouse inventory management system.
//!
//! Keeps aggregate product stock, per-location stock, and per-batch
//! remainders mutually consistent under concurrent receive/sell/transfer
//! operations, and runs the two approval-gated workflows built on top of
//! the ledger: physical audit reconciliation and custody transfer of
//! high-value items.
//!
//! Every mutating operation executes inside one database transaction and
//! takes an [`Actor`] so the activity log can attribute it. The HTTP layer
//! lives in a separate service and calls in with validated input; this
//! crate owns every write to stock quantities and workflow status fields.

pub mod activity;
pub mod actor;
pub mod audits;
pub mod batches;
pub mod config;
pub mod custody;
pub mod db;
pub mod error;
pub mod ledger;
pub mod models;
pub mod validator;

pub use actor::{Actor, Role};
pub use config::{CustodyConfig, EngineConfig};
pub use error::{EngineError, EngineResult};
