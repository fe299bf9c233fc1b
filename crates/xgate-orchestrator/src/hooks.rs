// crates/xgate-orchestrator/src/hooks.rs
// ============================================================================
// Module: Orchestrator hooks
// Description: Advisory before/after/failure callbacks around each stage
//              (spec §4.11). A failing hook is logged and swallowed, never
//              allowed to interrupt the pipeline.
// Dependencies: xgate-agents, tracing
// ============================================================================

use xgate_agents::AgentContext;
use xgate_core::AgentDecision;

/// Advisory callbacks invoked around each pipeline stage.
///
/// None of these methods can fail the pipeline: implementations return a
/// `Result` purely so the orchestrator can log a failure and move on,
/// mirroring spec §4.11's "exceptions raised by hooks are logged and
/// swallowed."
pub trait OrchestratorHooks: Send + Sync {
    /// Called immediately before a stage runs.
    fn before_stage(&self, _stage: &str, _context: &AgentContext) -> Result<(), String> {
        Ok(())
    }

    /// Called after a stage produces a decision.
    fn after_stage(&self, _stage: &str, _decision: &AgentDecision) -> Result<(), String> {
        Ok(())
    }

    /// Called when a stage fails or times out.
    fn on_failure(&self, _stage: &str, _error: &str) -> Result<(), String> {
        Ok(())
    }
}

/// Runs every hook, discarding any error after logging it.
pub(crate) fn run_hook<F>(stage: &str, hook_name: &str, hook: F)
where
    F: FnOnce() -> Result<(), String>,
{
    if let Err(error) = hook() {
        tracing::warn!(stage, hook_name, error, "orchestrator hook failed; swallowing");
    }
}

/// Installs no behavior for any hook. The default when a caller configures
/// none.
#[derive(Debug, Default)]
pub struct NoopHooks;

impl OrchestratorHooks for NoopHooks {}
