//! Exception filters over interpreter diagnostics.
//!
//! Every diagnostic severity maps to one client-visible filter. When a
//! diagnostic arrives through `check_exception` and its filter is enabled,
//! the adapter stops the script and keeps the diagnostic around for a
//! subsequent `exceptionInfo` request.

use std::collections::HashSet;
use std::sync::Mutex;

use once_cell::sync::Lazy;

use crate::host::Severity;
use crate::protocol::{ExceptionBreakpointsFilter, ExceptionInfoResponseBody, StoppedEventBody};

#[derive(Debug, Clone, Copy)]
struct ExceptionFilter {
    filter: &'static str,
    label: &'static str,
    default: bool,
}

fn filter_for(severity: Severity) -> ExceptionFilter {
    match severity {
        Severity::AuthorWarning => ExceptionFilter {
            filter: "AUTHOR_WARNING",
            label: "Warning (dev)",
            default: false,
        },
        Severity::AuthorError => ExceptionFilter {
            filter: "AUTHOR_ERROR",
            label: "Error (dev)",
            default: true,
        },
        Severity::FatalError => ExceptionFilter {
            filter: "FATAL_ERROR",
            label: "Fatal error",
            default: true,
        },
        Severity::InternalError => ExceptionFilter {
            filter: "INTERNAL_ERROR",
            label: "Internal error",
            default: true,
        },
        Severity::Message => ExceptionFilter {
            filter: "MESSAGE",
            label: "Other messages",
            default: false,
        },
        Severity::Warning => ExceptionFilter {
            filter: "WARNING",
            label: "Warning",
            default: false,
        },
        Severity::Log => ExceptionFilter {
            filter: "LOG",
            label: "Debug log",
            default: false,
        },
        Severity::DeprecationError => ExceptionFilter {
            filter: "DEPRECATION_ERROR",
            label: "Deprecation error",
            default: true,
        },
        Severity::DeprecationWarning => ExceptionFilter {
            filter: "DEPRECATION_WARNING",
            label: "Deprecation warning",
            default: false,
        },
    }
}

static FILTER_TABLE: Lazy<Vec<(Severity, ExceptionFilter)>> = Lazy::new(|| {
    Severity::ALL
        .iter()
        .map(|&severity| (severity, filter_for(severity)))
        .collect()
});

#[derive(Debug, Clone)]
struct PendingException {
    filter_id: &'static str,
    description: String,
}

#[derive(Default)]
struct ExceptionState {
    raised: HashSet<String>,
    pending: Option<PendingException>,
}

pub struct ExceptionManager {
    state: Mutex<ExceptionState>,
}

impl Default for ExceptionManager {
    fn default() -> ExceptionManager {
        let raised = FILTER_TABLE
            .iter()
            .filter(|(_, filter)| filter.default)
            .map(|(_, filter)| filter.filter.to_string())
            .collect();
        ExceptionManager {
            state: Mutex::new(ExceptionState {
                raised,
                pending: None,
            }),
        }
    }
}

impl ExceptionManager {
    /// Filter list for the initialize response, flagged with the currently
    /// enabled defaults.
    pub fn filter_list(&self) -> Vec<ExceptionBreakpointsFilter> {
        let state = self.state.lock().unwrap();
        FILTER_TABLE
            .iter()
            .map(|(_, filter)| ExceptionBreakpointsFilter {
                filter: filter.filter.to_string(),
                label: filter.label.to_string(),
                r#default: state.raised.contains(filter.filter),
            })
            .collect()
    }

    /// Replace the enabled set with exactly the filters the client sent.
    pub fn handle_set_exception_breakpoints(&self, filters: &[String]) {
        let mut state = self.state.lock().unwrap();
        state.raised = filters.iter().cloned().collect();
    }

    /// Decide whether a diagnostic stops the script. On a hit the diagnostic
    /// is retained for `exceptionInfo` and a `stopped` event is returned for
    /// the caller to complete and send.
    pub fn check(&self, severity: Severity, text: &str) -> Option<StoppedEventBody> {
        let filter = filter_for(severity);
        let mut state = self.state.lock().unwrap();
        if !state.raised.contains(filter.filter) {
            return None;
        }
        state.pending = Some(PendingException {
            filter_id: filter.filter,
            description: text.to_string(),
        });
        Some(StoppedEventBody {
            reason: "exception",
            description: Some("Pause on exception".to_string()),
            text: Some(text.to_string()),
            all_threads_stopped: Some(true),
            ..Default::default()
        })
    }

    /// Drain the pending exception, if any.
    pub fn handle_exception_info(&self) -> Option<ExceptionInfoResponseBody> {
        let mut state = self.state.lock().unwrap();
        state.pending.take().map(|pending| ExceptionInfoResponseBody {
            exception_id: pending.filter_id.to_string(),
            break_mode: "always",
            description: Some(pending.description),
        })
    }

    pub fn clear_all(&self) {
        self.state.lock().unwrap().raised.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advertises_all_filters_with_defaults() {
        let manager = ExceptionManager::default();
        let filters = manager.filter_list();
        assert_eq!(filters.len(), 9);

        let enabled: Vec<&str> = filters
            .iter()
            .filter(|f| f.r#default)
            .map(|f| f.filter.as_str())
            .collect();
        assert_eq!(
            enabled,
            vec![
                "AUTHOR_ERROR",
                "FATAL_ERROR",
                "INTERNAL_ERROR",
                "DEPRECATION_ERROR"
            ]
        );
    }

    #[test]
    fn default_enabled_severity_stops() {
        let manager = ExceptionManager::default();
        let event = manager
            .check(Severity::FatalError, "bad toolchain")
            .expect("fatal errors stop by default");
        assert_eq!(event.reason, "exception");
        assert_eq!(event.description.as_deref(), Some("Pause on exception"));
        assert_eq!(event.text.as_deref(), Some("bad toolchain"));
    }

    #[test]
    fn disabled_severity_is_silent() {
        let manager = ExceptionManager::default();
        assert!(manager.check(Severity::Warning, "just a warning").is_none());
        assert!(manager.handle_exception_info().is_none());
    }

    #[test]
    fn set_filters_replaces_the_enabled_set() {
        let manager = ExceptionManager::default();
        manager.handle_set_exception_breakpoints(&["WARNING".to_string()]);

        assert!(manager.check(Severity::FatalError, "fatal").is_none());
        assert!(manager.check(Severity::Warning, "warn").is_some());
    }

    #[test]
    fn exception_info_drains_the_pending_exception() {
        let manager = ExceptionManager::default();
        manager.check(Severity::AuthorError, "bad author");

        let info = manager.handle_exception_info().unwrap();
        assert_eq!(info.exception_id, "AUTHOR_ERROR");
        assert_eq!(info.break_mode, "always");
        assert_eq!(info.description.as_deref(), Some("bad author"));
        assert!(manager.handle_exception_info().is_none());
    }

    #[test]
    fn clear_all_disables_everything() {
        let manager = ExceptionManager::default();
        manager.clear_all();
        assert!(manager.check(Severity::FatalError, "fatal").is_none());
        assert!(manager.filter_list().iter().all(|f| !f.r#default));
    }
}
