//! sea-orm entities
pub mod generations;
