mod step;
mod tick;

pub use step::{PUSH_STRENGTH, step};
pub use tick::FixedTimestep;
