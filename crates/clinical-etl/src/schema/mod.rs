//! Target schema: an OpenAPI component turned into a JSON Schema.

mod openapi;

pub use openapi::{OpenApiSchema, Shape};
