//! Built-in monitors shipped with the agent, supplementing the Monitor
//! Loader's "compiled set of known monitor implementations" with real code.

mod log_tail;
mod process_count;
mod resource;
mod service_status;

pub use log_tail::LogTailMonitor;
pub use process_count::ProcessCountMonitor;
pub use resource::ResourceMonitor;
pub use service_status::ServiceStatusMonitor;
