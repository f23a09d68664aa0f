pub mod case;
pub mod distributor;
pub mod suite;

pub use case::*;
pub use distributor::*;
pub use suite::*;
