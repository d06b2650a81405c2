pub mod renderers;
pub mod strategies;

pub use renderers::{JsonlRendererPlugin, TextMarkers, TextRendererPlugin};
pub use strategies::{
    AdaptiveConcurrencyPlugin, ExponentialBackoffPlugin, FixedConcurrencyPlugin, LinearRetryPlugin,
};
