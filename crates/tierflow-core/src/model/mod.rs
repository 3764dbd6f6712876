//! Model definitions
//!
//! Data types for a three-tier topology, split per component.

mod data;
mod network;
mod settings;
mod stage;
mod tier;
mod topology;

// Re-exports
pub use data::*;
pub use network::*;
pub use settings::*;
pub use stage::*;
pub use tier::*;
pub use topology::*;
