pub mod columnar;
pub mod error;
pub mod flat;
pub mod log;

pub use columnar::{ColumnarStore, EventRow};
pub use error::LogError;
pub use flat::{parse_flat, write_flat, FlatRow};
pub use log::{EventLog, LogOutput, FILE_TYPE, FORMAT_VERSION};
