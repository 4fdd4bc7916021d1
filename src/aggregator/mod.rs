pub mod engine;
pub mod window;

pub use engine::WindowAggregator;
pub use window::WindowAccumulator;
