// src/sefaz/mod.rs
pub mod client;
pub mod models;
