//! Operation surface for the zap messaging session service.
//!
//! The boundary layer (HTTP controllers, admin tooling) consumes this crate
//! and nothing below it: [`OperationGateway`] validates input, resolves a
//! usable connection, delegates to the live adapter, and folds every
//! failure into the [`GatewayError`] taxonomy. [`ApiResponse`] is the JSON
//! envelope plus the HTTP status the boundary layer responds with.

pub mod envelope;
pub mod error;
pub mod gateway;
pub mod validation;

pub use envelope::ApiResponse;
pub use error::{FieldError, GatewayError, Result};
pub use gateway::{CampaignReport, OperationGateway, QrResponse};
