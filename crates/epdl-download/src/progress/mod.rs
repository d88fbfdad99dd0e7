//! Progress reporting: worker-side sink, speed estimation and throttling.

mod reporter;
mod speed;
mod throttle;

pub use reporter::{ProgressReporter, ProgressUpdate};
pub use speed::{SpeedMeter, format_speed};
pub use throttle::ProgressThrottle;
