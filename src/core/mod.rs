pub mod domain;
pub mod errors;
pub mod protocol;
pub mod service;
pub mod session;
pub mod traits;
