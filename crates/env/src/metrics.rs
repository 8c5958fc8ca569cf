//! Metric names recorded when the `metrics` feature is enabled.

/// Sandbox containers started and connected
pub const SANDBOXES_STARTED_TOTAL: &str = "pixelgym_sandboxes_started_total";
/// Provisioning attempts that ended in an error
pub const PROVISION_FAILURES_TOTAL: &str = "pixelgym_provision_failures_total";
/// Completed episode resets
pub const RESETS_TOTAL: &str = "pixelgym_resets_total";
/// Completed steps
pub const STEPS_TOTAL: &str = "pixelgym_steps_total";
/// Episodes that reported termination
pub const EPISODES_TERMINATED_TOTAL: &str = "pixelgym_episodes_terminated_total";
/// Observations captured
pub const OBSERVATIONS_TOTAL: &str = "pixelgym_observations_total";
/// Step duration in seconds, including dispatch and score query
pub const STEP_DURATION_SECONDS: &str = "pixelgym_step_duration_seconds";
/// Operation errors by operation name
pub const ERRORS_TOTAL: &str = "pixelgym_errors_total";
