// src/lib.rs
//! MapleMatch - Canadian SME/CPA intelligence platform.
//!
//! Scrapes the provincial CPA directories and government business
//! registries, deduplicates the results into one identity space, scores
//! client/candidate compatibility, and serves it all over a REST API.

pub mod core;
pub mod enrichment;
pub mod identity;
pub mod matching;
pub mod registry;
pub mod scraping;
pub mod web;

pub use crate::core::config_manager::ConfigManager;
pub use crate::core::database::Database;
pub use crate::web::start_web_server;
