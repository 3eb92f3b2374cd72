#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct TaskId(pub u64);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Steps of one discovery attempt that talk to a collaborator, in execution
/// order. Version selection and comparison are pure and cannot fail that way.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum DiscoveryStep {
    FetchManifest,
    CheckInstalledState,
    FetchBundle,
    VerifyTrust,
    DryRunInstall,
    PersistPendingUpdate,
}

