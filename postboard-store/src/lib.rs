pub mod id;
pub mod store;
