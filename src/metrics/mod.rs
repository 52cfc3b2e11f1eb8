pub mod report;
pub mod sampler;

pub use report::{ActionRate, ReportWriter};
pub use sampler::{
    Clock, CounterRecord, CounterSource, MonotonicClock, StatsSampler, StatsSnapshot,
};
