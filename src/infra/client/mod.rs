//! Resource client backends.

pub mod memory;
pub mod object;

pub use memory::InMemoryClient;
pub use object::Object;
