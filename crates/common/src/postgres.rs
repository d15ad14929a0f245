mod client;
mod config;
mod credit_repository;

pub use client::*;
pub use config::*;
pub use credit_repository::*;
