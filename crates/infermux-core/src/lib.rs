pub mod backend;
pub mod config;
pub mod error;
pub mod iospec;
pub mod tensor;

pub use backend::*;
pub use config::*;
pub use error::*;
pub use iospec::*;
pub use tensor::*;
