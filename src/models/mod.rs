//! Domain model module declarations.

pub mod request;
pub mod section;
pub mod session;
pub mod stage;
