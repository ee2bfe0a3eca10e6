mod stage;
mod timestamp;

pub use stage::Stage;
pub use timestamp::UtcDateTime;
