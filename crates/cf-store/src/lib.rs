//! # cf-store
//!
//! Everything downstream of a scored snapshot:
//!
//! - [`model`] — durable rows and decimal normalisation
//! - [`fingerprint`] — content hash over an item set
//! - [`diff`] — declarative field table and change detection
//! - [`store`] — [`CaseStore`](store::CaseStore) trait; [`sqlite`] implements it
//! - [`persist`] — applies detected changes case by case
//! - [`cache`] — [`Cache`](cache::Cache) trait with memory and file backends
//! - [`publish`] — snapshot envelope written to the cache on every run
//!
//! ```text
//! Vec<ScoredCase> ──► publish::CachePublisher ──► Cache
//!                └──► persist::persist_all ──► diff::detect ──► CaseStore
//! ```

pub mod cache;
pub mod diff;
pub mod fingerprint;
pub mod model;
pub mod persist;
pub mod publish;
pub mod sqlite;
pub mod store;
