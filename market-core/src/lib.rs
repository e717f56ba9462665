pub mod error;
pub mod metrics;
pub mod model;
pub mod ports;
pub mod units;

pub use error::*;
pub use metrics::*;
pub use model::*;
pub use ports::*;
pub use units::*;
