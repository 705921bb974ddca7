pub mod control;
pub mod report;
pub mod self_update;
pub mod system;

pub use report::ReportClient;
pub use self_update::run_self_update;
