// nomad-common: shared types and wire formats for the nomad sync workspace

pub mod identity;
pub mod protocol;
pub mod time;
pub mod types;
