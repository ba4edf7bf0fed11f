pub mod aggregation;
pub mod executor;
pub mod registry;
pub mod types;

pub use aggregation::*;
pub use executor::*;
pub use registry::*;
pub use types::*;
