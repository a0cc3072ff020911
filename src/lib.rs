pub mod config;
pub mod consolidate;
pub mod error;
pub mod identity;
pub mod isbn;
pub mod languages;
pub mod logging;
pub mod parsers;
pub mod pipeline;
pub mod staging;
pub mod subjects;
pub mod textnorm;
pub mod users;
pub mod writer;

pub use error::{EtlError, Result};
