//! Table descriptors: columns, keys, relations and translation tables.

mod def;
pub mod users;

pub use def::*;
pub use users::{PERSONAL_ACCESS_TOKENS, USERS};

#[cfg(test)]
pub(crate) mod fixtures;
