pub mod clock;
pub mod error;
pub mod model;
pub mod traits;

pub use clock::*;
pub use error::*;
pub use model::*;
pub use traits::*;
