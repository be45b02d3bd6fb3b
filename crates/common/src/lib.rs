// palaver-common: shared types and the wire protocol for the palaver workspace

pub mod protocol;
pub mod types;
