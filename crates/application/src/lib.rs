pub mod ports;
pub mod use_cases;

pub use ports::{QueryRequest, ResolverPort};
pub use use_cases::{ScreenQueryUseCase, Screening};
