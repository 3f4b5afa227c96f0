pub mod registry;
pub mod router;

pub use registry::*;
pub use router::*;
