pub mod apply;
pub mod destroy;
pub mod export;
pub mod graph;
pub mod outputs;
pub mod plan;
pub mod validate;
