pub mod config;
pub mod errors;
pub mod problem;
pub mod result;

pub use config::*;
pub use errors::*;
pub use problem::*;
pub use result::*;
