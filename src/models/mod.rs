// Domain models

mod container;
mod metrics;

pub use container::{ContainerState, Entity};
pub use metrics::{MetricsRecord, RawStatsReading, Snapshot};
