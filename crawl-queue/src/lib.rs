mod ops;

// We do this pattern (privately use a module, then re-export parts of it) so
// the internals can be reshuffled without breaking the public API.

mod types;
pub use types::Assignment;
pub use types::DeadLetterEntry;
pub use types::QueueStatus;
pub use types::QueueStrategy;
pub use types::QueueTask;
pub use types::TaskPriority;
pub use types::TaskStatus;
pub use types::WorkerRegistration;

mod error;
pub use error::QueueError;

mod config;
pub use config::QueueConfig;

mod metrics_state;
pub use metrics_state::QueueMetrics;

mod queue;
pub use queue::PriorityQueue;

pub use ops::score::{priority_score, retry_delay};
