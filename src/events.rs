use crate::pictures::Picture;

/// Emitted once per change of the current picture; `None` when cleared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Switched(pub Option<Picture>);

/// Requests handled by the rotation task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationCommand {
    /// Rescan the pictures directory.
    Reload,
    /// Make the named picture current until the next day boundary.
    Switch(String),
}
