pub mod answer;
pub mod wire;
