//! Signal actions

/// What the kernel does when a given signal is raised on a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActionType {
    /// Nothing.
    #[default]
    None,
    /// Invoke a user handler through the trampoline protocol.
    Handler,
    /// Tear the process down.
    Kill,
}

/// Per-signal action record.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalAction {
    pub action: ActionType,
    /// User-mode handler entry point.
    pub handler: u64,
    /// User-mode function the handler returns into; its one job is to
    /// invoke `sigret`.
    pub trampoline: u64,
    /// Opaque value passed to the handler in x0.
    pub userdata: u64,
}

/// Outcome of delivering a signal to a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalDelivery {
    /// Handler invoked, or the action was `None`.
    Accepted,
    /// The action demands the process be killed; the caller tears it down.
    Kill,
    /// Rejected: a handler is already executing and nesting is forbidden.
    Rejected,
}
