pub mod url_validation;
pub use url_validation::{EndpointValidationError, validate_endpoint};
