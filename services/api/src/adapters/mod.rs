//! services/api/src/adapters/mod.rs
//!
//! Concrete implementations of the core crate's service ports.

pub mod db;
pub mod image;
pub mod upload;

pub use db::DbAdapter;
pub use image::NoSvgConverter;
pub use upload::SoapUploadAdapter;
