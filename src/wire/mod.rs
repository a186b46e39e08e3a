pub mod checksum;
pub mod message;

pub use checksum::*;
pub use message::*;
