// Utility functions

pub mod logger;
pub mod retry;
pub mod shutdown;

pub use logger::*;
pub use retry::*;
pub use shutdown::*;
