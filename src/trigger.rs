//! Decides whether a run publishes.

use crate::config::RunContext;
use tracing::debug;

/// True only for the default publish branch. Manual dispatch and push both
/// qualify when the ref matches; the event kind alone never does.
pub fn should_publish(context: &RunContext) -> bool {
    let decision = context.is_default_publish_branch;
    debug!(
        event_kind = ?context.event_kind,
        ref_name = %context.ref_name,
        decision,
        "[TRIGGER] Evaluated publish trigger"
    );
    decision
}
