pub mod errors;
pub mod identity;
pub mod ids;
pub mod policy;
pub mod report;
pub mod resources;
pub mod result;

pub use errors::*;
pub use identity::*;
pub use ids::*;
pub use policy::*;
pub use report::*;
pub use resources::*;
pub use result::*;
