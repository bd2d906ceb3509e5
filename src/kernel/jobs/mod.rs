//! Background job system: queue, handlers, and the worker loop.

pub mod handlers;
pub mod job;
pub mod queue;
pub mod testing;
pub mod worker;

pub use handlers::{HandlerRegistry, JobHandler};
pub use job::{ErrorKind, Job, JobPriority, JobStatus};
pub use queue::{ClaimedJob, EnqueueResult, JobQueue, JobSpec, PostgresJobQueue, QueueDepth};
pub use worker::{JobWorker, JobWorkerConfig};
