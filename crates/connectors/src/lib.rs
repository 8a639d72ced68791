//! StockSync Connector Library
//!
//! Capability-based adapters for external inventory services.
//!
//! This crate provides:
//! - The [`Connector`] trait with per-operation parameter descriptors
//! - Built-in connectors: ShipStream (shipping platform), WarePoint (warehouse platform)
//! - A service-type registry for dynamic connector construction

pub mod connector;
pub mod error;
pub mod registry;
pub mod shipstream;
pub mod warepoint;

pub use connector::{
    Arguments, Capabilities, Capability, Connector, ConnectorSchema, OperationOutput,
    OperationSpec, SchemaField, WriteSummary,
};
pub use error::ConnectorError;
pub use registry::ConnectorRegistry;
pub use shipstream::ShipStreamConnector;
pub use warepoint::WarePointConnector;
