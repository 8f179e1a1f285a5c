pub mod deadline;
pub mod distribution;
pub mod doctor;
pub mod error;
pub mod export;
pub mod failure_log;
pub mod identity;
pub mod model;
pub mod progress;
pub mod walker;

pub use deadline::{Clock, DeadlineGuard, DeadlineState, SystemClock};
pub use distribution::DistributionTracker;
pub use doctor::{collect_doctor_info, DoctorInfo};
pub use error::{AccessError, ConfigurationError, ErrorKind, WalkError};
pub use export::{
    build_distribution_analysis, build_remediation_plan, file_timestamp, load_remediation_plan,
    timestamped_file_name, write_distribution_analysis, write_remediation_plan,
    DistributionAnalysis, IdentifierRecord, RemediationPlan,
};
pub use failure_log::{render_failure_log, write_failure_log};
pub use identity::{
    default_resolver, is_elevated, IdentityResolver, InMemoryResolver, OwnerInfo,
    PlatformResolver, ResolvedAccount,
};
pub use model::{
    DistributionEntry, DistributionSummary, FailureRecord, Identifier, ItemKind, ItemOutcome,
    OwnershipClassification, RemediationPriority, RunOutcome, RunReport, RunStatistics,
    REPORT_VERSION,
};
pub use progress::ProgressAggregator;
pub use walker::{
    run_walk, run_walk_with_callback, run_walk_with_clock, run_walk_with_items, TraversalConfig,
    WalkRunOutput,
};
