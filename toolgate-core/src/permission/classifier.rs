//! Edit-class tool classification for `acceptEdits` mode.

use std::collections::HashSet;

/// Decides whether a tool modifies files or content.
pub trait EditToolClassifier: Send + Sync {
    fn is_edit_tool(&self, tool_name: &str) -> bool;
}

/// Blanket implementation for closures
impl<F> EditToolClassifier for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_edit_tool(&self, tool_name: &str) -> bool {
        self(tool_name)
    }
}

/// Tool names classified as edits by [`DefaultEditTools`].
pub const DEFAULT_EDIT_TOOLS: [&str; 4] = ["Edit", "MultiEdit", "Write", "NotebookEdit"];

/// A fixed set of tool names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultEditTools {
    names: HashSet<String>,
}

impl DefaultEditTools {
    /// Classifier for an explicit set of tool names.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for DefaultEditTools {
    fn default() -> Self {
        Self::from_names(DEFAULT_EDIT_TOOLS)
    }
}

impl EditToolClassifier for DefaultEditTools {
    fn is_edit_tool(&self, tool_name: &str) -> bool {
        self.names.contains(tool_name)
    }
}
