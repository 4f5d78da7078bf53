//! HTTP request handlers

pub mod peers;
pub mod service;
pub mod storage;

pub use peers::*;
pub use service::*;
pub use storage::*;
