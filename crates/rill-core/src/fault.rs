//! Escalation channel for unrecoverable faults.
//!
//! Some conditions have no sink to report to — the canonical case is a
//! losing race branch receiving an error after the winner was chosen. Those
//! must become process-visible faults, not silent drops: they are logged at
//! error level and forwarded to an installed process-wide hook.

use std::sync::OnceLock;

use crate::flow::FlowError;

type FaultHook = Box<dyn Fn(&str, &FlowError) + Send + Sync>;

static HOOK: OnceLock<FaultHook> = OnceLock::new();

/// Installs the process-wide fault hook.
///
/// Returns `false` if a hook was already installed (the first installation
/// wins; the hook cannot be replaced).
pub fn set_fault_hook(hook: impl Fn(&str, &FlowError) + Send + Sync + 'static) -> bool {
    HOOK.set(Box::new(hook)).is_ok()
}

/// Reports a fault that cannot travel the normal signal channel.
///
/// Always logs; additionally invokes the installed hook, if any.
pub fn report_unrecoverable(context: &str, error: &FlowError) {
    tracing::error!(context, %error, "unrecoverable fault with no sink to report to");
    if let Some(hook) = HOOK.get() {
        hook(context, error);
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_fault_hook_receives_reports() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        // First installation wins; other tests in this process may have
        // installed theirs first, so ignore the return value and assert
        // only on what flows through.
        let installed = set_fault_hook(move |context, error| {
            sink.lock().push(format!("{context}: {error}"));
        });

        report_unrecoverable("fault-hook-test", &FlowError::message("lost branch"));

        if installed {
            let seen = seen.lock();
            assert!(seen.iter().any(|s| s.contains("fault-hook-test")));
        }
    }

    #[test]
    fn test_report_without_hook_does_not_panic() {
        report_unrecoverable("no-hook-test", &FlowError::DoubleTerminal);
    }
}
