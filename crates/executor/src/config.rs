use std::env;

/// Environment toggle enabling dry-run mode globally. Requests can override
/// it per call.
pub const DRY_RUN_ENV: &str = "COMMAND_EXECUTOR_DRY_RUN";

/// Orchestrator construction-time configuration.
///
/// The environment is consulted here and nowhere else; the rest of the engine
/// only sees the resolved values.
#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    pub dry_run: bool,
}

impl ExecutorConfig {
    pub fn from_env() -> Self {
        Self {
            dry_run: env::var(DRY_RUN_ENV).is_ok_and(|v| v == "1"),
        }
    }
}
