//! GCP API interaction module
//!
//! The resource-discovery side of the crate: authentication, the HTTP
//! client and typed API errors consumed by the error classifier.
//!
//! # Module Structure
//!
//! - [`auth`] - GCP authentication using Application Default Credentials
//! - [`client`] - Main GCP client for making API requests
//! - [`http`] - HTTP utilities and [`http::ApiError`]

pub mod auth;
pub mod client;
pub mod http;
