pub mod queue;

pub use queue::{DispatchItem, PrismDispatchQueue, QueueState};
