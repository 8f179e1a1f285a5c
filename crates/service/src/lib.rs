pub mod service;

pub use service::{
    cancel_run, doctor, get_run_distribution, get_run_report, get_run_session, load_run_report,
    poll_run_events, start_run, start_run_with_resolver, CancelRunResponse, RunProgressEvent,
    RunRequest, RunSessionSnapshot, RunSessionStatus,
};
