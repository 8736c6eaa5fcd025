//! Resource abstraction layer
//!
//! Turns GCP resource descriptions (nested JSON) into typed rows. Tables are
//! declared as data, so new resource kinds need no code changes.
//!
//! # Architecture
//!
//! - [`path`] - Nil-safe field path resolution into resource items
//! - [`transform`] - Value-rewriting steps and ordered pipelines
//! - [`column`] - Column types, value sources and per-row resolution
//! - [`cache`] - Per-query hydration cache
//! - [`classify`] - Suppress-or-propagate decision for List/Get failures
//! - [`column_set`] - Baseline/table column merge
//! - [`table`] - Table schemas and their validation
//! - [`registry`] - Embedded table definitions, frozen at start-up
//! - [`fetcher`] - List/Get execution against a [`ResourceClient`]
//! - [`sdk_dispatch`] - Maps method names to GCP REST API calls
//!
//! # Table Definitions
//!
//! Tables are defined in JSON files under `src/tables/`:
//! - `common.json` - Baseline columns and hydrates every table gets
//! - `compute.json` - Compute Engine tables (instances, disks, networks)
//! - `storage.json` - Cloud Storage tables (buckets, objects)
//! - `gke.json` - GKE tables (clusters)

pub mod cache;
pub mod classify;
pub mod column;
pub mod column_set;
mod fetcher;
pub mod path;
mod registry;
pub mod sdk_dispatch;
pub mod table;
pub mod transform;

pub use cache::HydrateCache;
pub use classify::{should_suppress, ErrorMatch};
pub use column::{Column, ColumnType, ValueSource};
pub use fetcher::{choose_operation, extract_items, fetch_items, Fetched, Operation, ResourceClient};
pub use path::FieldPath;
pub use registry::*;
pub use table::{Baseline, TableDef, TableSchema};
pub use transform::{Pipeline, Transform, TransformStep};
