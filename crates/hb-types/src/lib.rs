pub mod errors;
pub mod params;
pub mod space;

pub use errors::*;
pub use params::*;
pub use space::*;
