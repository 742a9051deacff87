//! Agent use cases: local collection and dispatch to the server.

pub mod collect;
pub mod dispatch;
pub mod local;

pub use collect::run_collection_loop;
pub use dispatch::{
    BROKEN_PIPE_COOLDOWN, DispatchDeps, DispatchMode, DispatchReport, dispatch_once,
    run_report_loop,
};
pub use local::LocalMetrics;
