// Domain models: scrap events, aggregates, chart history, dashboard groups

mod history;
mod scrap;
mod view;

pub use history::MachineHistory;
pub use scrap::{
    AggregatedResult, AggregationKey, RawSample, ScrapEvent, ScrapRecord, format_timestamp_ms,
    machine_id_from_topic, parse_timestamp_ms, topic_for,
};
pub use view::{MachineGroup, Selection};
