pub mod domain;
pub mod error;
pub mod freshness;
pub mod protocol;
