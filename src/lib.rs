//! Boleto Synchronization & Link Distribution API
//!
//! Synchronizes billing slips (boletos) from the external SGA ledger into
//! Postgres, assigns them to field consultants, and publishes short public
//! links scoped to a (cliente, consultor, competência) triple.
//!
//! # Modules
//!
//! - `auth`: API-key middleware for management routes.
//! - `boleto_store`: idempotent reconciliation store keyed by (cliente, nosso número).
//! - `config`: configuration management.
//! - `db`: database connection and pool management.
//! - `errors`: error handling types.
//! - `filter`: per-record eligibility evaluation.
//! - `handlers`: HTTP request handlers.
//! - `links`: public link issuance and resolution.
//! - `models`: data models and date helpers.
//! - `sga_client`: paginated SGA API client.
//! - `sync`: the synchronization orchestrator.

pub mod auth;
pub mod boleto_store;
pub mod config;
pub mod db;
pub mod errors;
pub mod filter;
pub mod handlers;
pub mod links;
pub mod models;
pub mod sga_client;
pub mod sync;
