pub mod screen_query;

pub use screen_query::{ScreenQueryUseCase, Screening};
