pub mod filesystem;
pub mod origin;
pub mod pipeline;
pub mod symbols;
pub mod syntax;
