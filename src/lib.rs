//! Flat, typed rows over GCP resource descriptions
//!
//! Tables are declared as data (`src/tables/*.json`): each column names a
//! value source and a transform pipeline. At query time items from the
//! List/Get operation are projected column by column, expensive lookups are
//! shared through a per-query hydration cache, and "not found" style
//! failures are reported as empty results.
//!
//! # Example
//!
//! ```ignore
//! use tgcp_rows::gcp::client::GcpClient;
//! use tgcp_rows::query::{execute, QueryContext};
//! use tgcp_rows::resource::get_table;
//!
//! async fn running_vms(client: &GcpClient) -> anyhow::Result<usize> {
//!     let table = get_table("gcp_compute_instance")?;
//!     let ctx = QueryContext::for_table(&table.name);
//!     let result = execute(client, table, &ctx).await?;
//!     Ok(result.rows.iter().filter(|r| r.get("status") == Some(&"RUNNING".into())).count())
//! }
//! ```

pub mod config;
pub mod gcp;
pub mod query;
pub mod resource;

/// Version injected at compile time via TGCP_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("TGCP_VERSION") {
    Some(v) => v,
    None => "dev",
};
