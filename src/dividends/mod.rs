//! Dividend queries: fan-out aggregation and the cache-through façade

pub mod aggregator;
pub mod input;
pub mod service;

pub use aggregator::{
    global_total, partition_total, AggregationEngine, AggregationError, MergedDividends,
    PartitionDividends, PartitionFailure,
};
pub use input::spawn_line_reader;
pub use service::{CacheSettings, DividendQuery, DividendResponse, DividendService, ServiceError};
