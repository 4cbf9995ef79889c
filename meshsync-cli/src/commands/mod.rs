pub mod apply;
pub mod collections;
pub mod daemon;
pub mod query;
