//! Safe SQL builder: identifiers from model descriptors only, values as parameters.

mod builder;
pub mod exec;
pub mod params;
pub use builder::*;
pub use params::*;
