//! Config Module
//!
//! - `types`: PipelineConfig and its sections
//! - `loader`: file + env loading, validation

pub mod types;
pub mod loader;

#[cfg(test)]
mod tests;

pub use types::{
    PipelineConfig,
    DetectorConfig,
    WindowConfig,
    AlertConfig,
    BoundaryConfig,
    BoundaryConfigs,
    ScorerConfig,
    ModelConfig,
    ModelKind,
    VocabConfig,
    GrowthMode,
    SinkConfig,
    SinkKind,
};
pub use loader::{load_config, validate};
