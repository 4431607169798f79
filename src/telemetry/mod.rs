pub mod aggregator;
pub mod classifier;
pub mod normalizer;
pub mod window;
