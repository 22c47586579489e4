pub mod error;
pub mod response;
pub mod server;
pub mod transform;
