// crates/xgate-agents/src/agent.rs
// ============================================================================
// Module: Agent capability trait
// Description: The single capability every stage agent implements (spec
//              §4.10, §9: "a capability set, not a class hierarchy").
// Dependencies: async-trait, xgate-core
// ============================================================================

use async_trait::async_trait;
use xgate_core::AgentDecision;
use xgate_core::ExceptionRecord;

use crate::context::AgentContext;
use crate::error::AgentError;

/// A pipeline stage capability: given an exception and the shared stage
/// context, produce a decision. Implementors may mutate `exception` in
/// place (Triage sets `exception_type`/`severity`; Policy sets
/// `current_playbook_id`/`current_step`) the way the teacher's evidence and
/// dispatch interfaces take a context struct rather than reaching for
/// ambient state.
#[async_trait]
pub trait Agent: Send + Sync {
    /// The stable name this agent logs under (`"IntakeAgent"`, etc.).
    fn name(&self) -> &'static str;

    /// Processes `exception` with the accumulated `context`, returning the
    /// stage's decision.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] when the stage cannot produce a decision.
    async fn process(&self, exception: &mut ExceptionRecord, context: &mut AgentContext) -> Result<AgentDecision, AgentError>;
}
