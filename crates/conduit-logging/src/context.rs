//! Process context injection
//!
//! The writer and the reader of a log file are separate processes that
//! usually log to the same place. This module keeps the role of the current
//! process (and a per-run instance id) in thread-local storage so every span
//! can be tagged with it.

use std::cell::RefCell;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which side of a log file this process is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessRole {
    /// Appends records and signals the reader
    Writer,
    /// Polls records with a cursor
    Reader,
    /// Inspects or clears files out of band
    Maintenance,
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessRole::Writer => write!(f, "writer"),
            ProcessRole::Reader => write!(f, "reader"),
            ProcessRole::Maintenance => write!(f, "maintenance"),
        }
    }
}

/// Context data stored in thread-local storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessContextData {
    pub role: ProcessRole,
    /// OS process id
    pub pid: u32,
    /// Unique id for this run
    pub instance_id: Uuid,
}

thread_local! {
    static PROCESS_CONTEXT: RefCell<Option<ProcessContextData>> = const { RefCell::new(None) };
}

/// RAII guard for process context
///
/// Creating the guard sets the context for the current thread; dropping it
/// restores whatever was set before.
///
/// # Example
///
/// ```ignore
/// use conduit_logging::{ProcessContextGuard, ProcessRole};
///
/// let _guard = ProcessContextGuard::new(ProcessRole::Reader);
///
/// // Spans opened in this scope carry role = "reader"
/// tracing::info_span!("poll").in_scope(|| tracing::info!("Polling ring"));
/// ```
pub struct ProcessContextGuard {
    previous: Option<ProcessContextData>,
}

impl ProcessContextGuard {
    /// Set the role with a fresh instance id
    pub fn new(role: ProcessRole) -> Self {
        Self::with_instance_id(role, Uuid::new_v4())
    }

    /// Set the role with a caller-chosen instance id
    pub fn with_instance_id(role: ProcessRole, instance_id: Uuid) -> Self {
        let data = ProcessContextData {
            role,
            pid: std::process::id(),
            instance_id,
        };
        let previous = PROCESS_CONTEXT.with(|ctx| ctx.borrow_mut().replace(data));
        Self { previous }
    }

    /// Get the current context (if any)
    pub fn current() -> Option<ProcessContextData> {
        PROCESS_CONTEXT.with(|ctx| ctx.borrow().clone())
    }

    pub fn current_role() -> Option<ProcessRole> {
        Self::current().map(|ctx| ctx.role)
    }

    pub fn current_instance_id() -> Option<Uuid> {
        Self::current().map(|ctx| ctx.instance_id)
    }
}

impl Drop for ProcessContextGuard {
    fn drop(&mut self) {
        PROCESS_CONTEXT.with(|ctx| *ctx.borrow_mut() = self.previous.take());
    }
}

/// Run a block with the given process role set
///
/// # Example
///
/// ```ignore
/// with_process_context!(ProcessRole::Writer, {
///     tracing::info!("Publishing");
/// });
/// ```
#[macro_export]
macro_rules! with_process_context {
    ($role:expr, $body:block) => {{
        let _guard = $crate::context::ProcessContextGuard::new($role);
        $body
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_sets_and_clears() {
        assert!(ProcessContextGuard::current().is_none());

        {
            let _guard = ProcessContextGuard::new(ProcessRole::Writer);
            let ctx = ProcessContextGuard::current().unwrap();
            assert_eq!(ctx.role, ProcessRole::Writer);
            assert_eq!(ctx.pid, std::process::id());
        }

        assert!(ProcessContextGuard::current().is_none());
    }

    #[test]
    fn test_nested_contexts() {
        let _outer = ProcessContextGuard::new(ProcessRole::Reader);
        let outer_id = ProcessContextGuard::current_instance_id();

        {
            let _inner = ProcessContextGuard::new(ProcessRole::Maintenance);
            assert_eq!(
                ProcessContextGuard::current_role(),
                Some(ProcessRole::Maintenance)
            );
            assert_ne!(ProcessContextGuard::current_instance_id(), outer_id);
        }

        assert_eq!(ProcessContextGuard::current_role(), Some(ProcessRole::Reader));
        assert_eq!(ProcessContextGuard::current_instance_id(), outer_id);
    }

    #[test]
    fn test_with_instance_id() {
        let instance_id = Uuid::new_v4();
        let _guard = ProcessContextGuard::with_instance_id(ProcessRole::Reader, instance_id);
        assert_eq!(ProcessContextGuard::current_instance_id(), Some(instance_id));
    }

    #[test]
    fn test_macro_scope() {
        let role = with_process_context!(ProcessRole::Writer, {
            ProcessContextGuard::current_role()
        });
        assert_eq!(role, Some(ProcessRole::Writer));
        assert!(ProcessContextGuard::current().is_none());
    }

    #[test]
    fn test_role_display() {
        assert_eq!(ProcessRole::Writer.to_string(), "writer");
        assert_eq!(ProcessRole::Maintenance.to_string(), "maintenance");
    }
}
