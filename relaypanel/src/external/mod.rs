mod handoff;
mod logger;

pub use handoff::*;
pub use logger::*;
