use std::fmt;
use std::sync::Arc;

use crate::traversal::path::GraphPath;
use crate::types::NodeId;

/// What a traversal does with a branch: whether it becomes a result and
/// whether it is expanded further.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Evaluation {
    /// Return the path and expand it.
    #[default]
    IncludeAndContinue,
    /// Return the path, do not expand it.
    IncludeAndPrune,
    /// Skip the path but expand it.
    ExcludeAndContinue,
    /// Skip the path and do not expand it.
    ExcludeAndPrune,
}

impl Evaluation {
    /// Builds an evaluation from its two flags.
    #[must_use]
    pub const fn of(includes: bool, continues: bool) -> Self {
        match (includes, continues) {
            (true, true) => Self::IncludeAndContinue,
            (true, false) => Self::IncludeAndPrune,
            (false, true) => Self::ExcludeAndContinue,
            (false, false) => Self::ExcludeAndPrune,
        }
    }

    /// `IncludeAndContinue` or `IncludeAndPrune`.
    #[must_use]
    pub const fn of_continues(continues: bool) -> Self {
        Self::of(true, continues)
    }

    /// `IncludeAndContinue` or `ExcludeAndContinue`.
    #[must_use]
    pub const fn of_includes(includes: bool) -> Self {
        Self::of(includes, true)
    }

    /// Returns `true` if the path is a result.
    #[must_use]
    pub const fn includes(self) -> bool {
        matches!(self, Self::IncludeAndContinue | Self::IncludeAndPrune)
    }

    /// Returns `true` if the path is expanded further.
    #[must_use]
    pub const fn continues(self) -> bool {
        matches!(self, Self::IncludeAndContinue | Self::ExcludeAndContinue)
    }

    /// Keeps the inclusion flag and stops expansion.
    #[must_use]
    pub const fn pruned(self) -> Self {
        Self::of(self.includes(), false)
    }
}

/// Decides the [`Evaluation`] of a path.
///
/// Any `Fn(&dyn GraphPath) -> Evaluation` closure is an evaluator.
pub trait Evaluator: Send + Sync {
    /// Evaluates `path`.
    fn evaluate(&self, path: &dyn GraphPath) -> Evaluation;
}

impl<F> Evaluator for F
where
    F: Fn(&dyn GraphPath) -> Evaluation + Send + Sync,
{
    fn evaluate(&self, path: &dyn GraphPath) -> Evaluation {
        self(path)
    }
}

/// Built-in evaluators.
pub struct Evaluators;

impl Evaluators {
    /// Includes and continues everything.
    #[must_use]
    pub fn all() -> Arc<dyn Evaluator> {
        Arc::new(|_: &dyn GraphPath| Evaluation::IncludeAndContinue)
    }

    /// Includes paths up to `depth` long and stops expanding at `depth`.
    #[must_use]
    pub fn to_depth(depth: usize) -> Arc<dyn Evaluator> {
        Arc::new(move |path: &dyn GraphPath| {
            let length = path.length();
            Evaluation::of(length <= depth, length < depth)
        })
    }

    /// Includes paths at least `depth` long.
    #[must_use]
    pub fn from_depth(depth: usize) -> Arc<dyn Evaluator> {
        Arc::new(move |path: &dyn GraphPath| Evaluation::of_includes(path.length() >= depth))
    }

    /// Includes paths exactly `depth` long and stops expanding there.
    #[must_use]
    pub fn at_depth(depth: usize) -> Arc<dyn Evaluator> {
        Arc::new(move |path: &dyn GraphPath| {
            let length = path.length();
            Evaluation::of(length == depth, length < depth)
        })
    }

    /// Includes paths ending at one of `nodes` and keeps expanding.
    #[must_use]
    pub fn include_where_end_node_is(nodes: impl IntoIterator<Item = NodeId>) -> Arc<dyn Evaluator> {
        let nodes: Vec<NodeId> = nodes.into_iter().collect();
        Arc::new(move |path: &dyn GraphPath| {
            Evaluation::of_includes(nodes.contains(&path.end_node()))
        })
    }
}

/// Several evaluators applied together: a path is included iff every
/// evaluator includes it and continued iff every evaluator continues it.
#[derive(Clone, Default)]
pub(crate) struct CombinedEvaluator {
    evaluators: Vec<Arc<dyn Evaluator>>,
}

impl CombinedEvaluator {
    pub(crate) fn push(&mut self, evaluator: Arc<dyn Evaluator>) {
        self.evaluators.push(evaluator);
    }

    pub(crate) fn evaluate(&self, path: &dyn GraphPath) -> Evaluation {
        let mut includes = true;
        let mut continues = true;
        for evaluator in &self.evaluators {
            let evaluation = evaluator.evaluate(path);
            includes &= evaluation.includes();
            continues &= evaluation.continues();
            if !includes && !continues {
                break;
            }
        }
        Evaluation::of(includes, continues)
    }
}

impl fmt::Debug for CombinedEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CombinedEvaluator")
            .field("evaluators", &self.evaluators.len())
            .finish()
    }
}
