mod chain;
mod compiler;
mod logs;
mod merge;
mod override_engine;
mod sanitize;
mod script;

pub use chain::*;
pub use compiler::*;
pub use logs::*;
pub use merge::*;
pub use override_engine::*;
pub use sanitize::*;
pub use script::*;
