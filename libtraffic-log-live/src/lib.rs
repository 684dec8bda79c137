//! Live side of the local traffic logger: packet capture on the loopback
//! interface, and the supervisor running capture next to the logging server.

mod capture;
mod error;
mod supervisor;

pub use capture::*;
pub use error::*;
pub use supervisor::*;
