//! Kernel module - infrastructure and dependencies.

pub mod clock;
pub mod jobs;
pub mod scheduled_tasks;
pub mod service_kernel;
pub mod test_dependencies;
pub mod traits;

pub use clock::{ManualClock, SystemClock};
pub use service_kernel::ServiceKernel;
pub use test_dependencies::TestDependencies;
pub use traits::*;
