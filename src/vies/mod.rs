//! VIES (VAT Information Exchange System) integration
//!
//! This module provides:
//! - Client configuration, including the HTTP status classification policy
//! - A reqwest-based [`LookupClient`](crate::LookupClient) for the VIES REST API

pub mod client;
pub mod config;

pub use client::ViesClient;
pub use config::{StatusPolicy, ViesClientConfig, VIES_API_BASE};
