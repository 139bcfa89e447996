// src/sources/providers/mod.rs
pub mod json_catalog;
pub mod merchant_feed;
