pub mod batcher;
pub mod dispatch;
pub mod engine;
pub mod queue;
pub mod request;
pub mod router;

pub use batcher::*;
pub use dispatch::*;
pub use engine::*;
pub use queue::*;
pub use request::*;
pub use router::*;
