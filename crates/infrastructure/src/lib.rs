pub mod factory;
pub mod in_memory;
pub mod rabbit;

pub use factory::*;
pub use in_memory::*;
pub use rabbit::*;

#[cfg(test)]
mod transport_test;
