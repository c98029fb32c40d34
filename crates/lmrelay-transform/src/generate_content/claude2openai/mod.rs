pub mod request;

pub use request::{transform_request, SystemMapping, ThinkingMapping, TransformOptions};
