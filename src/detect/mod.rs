mod backend;
mod backends;
mod result;

pub use backend::DetectionSource;
pub use backends::ScriptedSource;
pub use result::{BehaviorKind, Detection};
