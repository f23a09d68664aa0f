pub mod collab;
pub mod config;
pub mod control;
pub mod dispatch;

pub use collab::*;
pub use config::*;
pub use control::*;
pub use dispatch::*;
