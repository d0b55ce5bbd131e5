use crate::traversal::branch::{Branch, Expansion};
use crate::traversal::selector::BranchSelector;

/// The two frontiers of a bidirectional traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Grows from the start node.
    Start,
    /// Grows from the end node.
    End,
}

impl Side {
    pub(crate) const fn index(self) -> usize {
        match self {
            Self::Start => 0,
            Self::End => 1,
        }
    }

    /// The opposite side.
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::Start => Self::End,
            Self::End => Self::Start,
        }
    }
}

/// How a bidirectional traversal interleaves its two sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SideSelectorPolicy {
    /// One branch from each side in turn.
    #[default]
    Alternating,
    /// Both sides advance one depth level at a time, so joined paths are
    /// found in order of their length.
    Level,
    /// Like `Level`, and no deeper level is opened once a path has been
    /// found.
    LevelStopDescentOnResult,
}

impl SideSelectorPolicy {
    pub(crate) fn create<'g>(
        self,
        start: TraversalSide<'g>,
        end: TraversalSide<'g>,
        max_depth: Option<usize>,
    ) -> SelectorOrderer<'g> {
        let order = match self {
            Self::Alternating => Order::Alternating,
            Self::Level | Self::LevelStopDescentOnResult => Order::Level {
                stop_descent_on_result: self == Self::LevelStopDescentOnResult,
                max_depth: max_depth.unwrap_or(usize::MAX),
                depth: [0, 0],
                held: [None, None],
            },
        };
        SelectorOrderer {
            sides: [start, end],
            // Alternation switches before picking, so the start side goes
            // first.
            current: match order {
                Order::Alternating => Side::End,
                Order::Level { .. } => Side::Start,
            },
            order,
        }
    }
}

/// A branch selector and the expansion state it grows.
pub(crate) struct TraversalSide<'g> {
    selector: Option<BranchSelector>,
    expansion: Expansion<'g>,
}

impl<'g> TraversalSide<'g> {
    pub(crate) fn new(selector: BranchSelector, expansion: Expansion<'g>) -> Self {
        Self {
            selector: Some(selector),
            expansion,
        }
    }

    /// Pulls the next branch; once the selector runs dry it is dropped
    /// and the side answers `None` for good.
    pub(crate) fn next(&mut self) -> Option<Branch> {
        let selector = self.selector.as_mut()?;
        let branch = selector.next(&mut self.expansion);
        if branch.is_none() {
            self.selector = None;
        }
        branch
    }

    pub(crate) fn relationships_traversed(&self) -> u64 {
        self.expansion.relationships_traversed
    }

    fn is_exhausted(&self) -> bool {
        self.selector.is_none()
    }

    fn close(&mut self) {
        self.selector = None;
    }
}

enum Order {
    Alternating,
    Level {
        stop_descent_on_result: bool,
        max_depth: usize,
        /// Deepest level each side has emitted.
        depth: [usize; 2],
        /// First branch of a level a side may not open yet.
        held: [Option<Branch>; 2],
    },
}

/// Decides which side supplies the next branch of a bidirectional
/// traversal.
pub(crate) struct SelectorOrderer<'g> {
    sides: [TraversalSide<'g>; 2],
    current: Side,
    order: Order,
}

impl SelectorOrderer<'_> {
    /// The next branch and the side it grew on. `None` once both sides
    /// are exhausted; never fails.
    ///
    /// `paths_found` is the number of joined paths found so far, consulted
    /// by the stop-descent policy.
    pub(crate) fn next(&mut self, paths_found: u64) -> Option<(Side, Branch)> {
        match self.order {
            Order::Alternating => self.next_alternating(),
            Order::Level { .. } => self.next_level(paths_found),
        }
    }

    /// Relationships followed by both sides.
    pub(crate) fn relationships_traversed(&self) -> u64 {
        self.sides
            .iter()
            .map(TraversalSide::relationships_traversed)
            .sum()
    }

    fn next_alternating(&mut self) -> Option<(Side, Branch)> {
        self.current = self.current.other();
        if let Some(branch) = self.sides[self.current.index()].next() {
            return Some((self.current, branch));
        }
        self.current = self.current.other();
        let side = self.current;
        self.sides[side.index()].next().map(|branch| (side, branch))
    }

    fn next_level(&mut self, paths_found: u64) -> Option<(Side, Branch)> {
        let Order::Level {
            stop_descent_on_result,
            max_depth,
            depth,
            held,
        } = &mut self.order
        else {
            return None;
        };

        loop {
            let side = self.current;
            let (s, o) = (side.index(), side.other().index());
            let done = |sides: &[TraversalSide<'_>; 2], held: &[Option<Branch>; 2], i: usize| {
                sides[i].is_exhausted() && held[i].is_none()
            };
            let other_done = done(&self.sides, held, o);
            if done(&self.sides, held, s) {
                if other_done {
                    return None;
                }
                self.current = side.other();
                continue;
            }

            let branch = match held[s].take().or_else(|| self.sides[s].next()) {
                Some(branch) => branch,
                None => {
                    self.current = side.other();
                    continue;
                }
            };
            if branch.length() <= depth[s] {
                return Some((side, branch));
            }

            // The branch opens a new level on this side. That waits until
            // the other side has emitted its current level.
            let may_advance = other_done
                || depth[o] > depth[s]
                || (depth[o] == depth[s] && held[o].is_some());
            if !may_advance {
                held[s] = Some(branch);
                self.current = side.other();
                continue;
            }

            if *stop_descent_on_result && paths_found > 0 {
                for side in &mut self.sides {
                    side.close();
                }
                *held = [None, None];
                return None;
            }
            if branch.length().saturating_add(depth[o]) > *max_depth {
                self.sides[s].close();
                self.current = side.other();
                continue;
            }
            depth[s] = branch.length();
            return Some((side, branch));
        }
    }
}
