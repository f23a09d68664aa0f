pub mod picker;
pub mod submit;

pub use picker::*;
pub use submit::*;
