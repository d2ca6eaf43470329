//! planstream library exports

pub mod backend;
pub mod console;
pub mod core;
pub mod runtime;

#[cfg(test)]
pub mod test_support;
