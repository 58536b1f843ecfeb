mod export;
mod interval;
mod sample;
mod store;

pub use export::{CsvLayout, RecordError, Recorder, Toggle, RECORD_FILE_FORMAT, RECORD_TIME_FORMAT};
pub use interval::{IntervalEstimate, IntervalEstimator, DEFAULT_INTERVAL_MS};
pub use sample::{Sample, ABSENT_CLIMATE, ABSENT_LEVEL};
pub use store::{SampleStore, TagState, UpdateResult, DEFAULT_HISTORY_CAPACITY};
