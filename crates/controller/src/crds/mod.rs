pub mod application;
pub mod build_request;
pub mod common;

pub use application::*;
pub use build_request::*;
pub use common::*;
