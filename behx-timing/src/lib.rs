pub mod clock;

pub use clock::{round_to_micros, ManualClock, SessionClock, SystemClock};
