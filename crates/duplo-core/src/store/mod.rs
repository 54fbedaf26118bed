pub mod schema;
pub mod similarity;
pub mod symbol_store;
