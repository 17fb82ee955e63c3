//! Application services: filter normalization, aggregation and the report façade.

pub mod aggregation;
pub mod error;
pub mod filter;
pub mod pagination;
pub mod repos;
pub mod report;
pub mod resilience;
