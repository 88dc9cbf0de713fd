use crate::pattern::{Conjunction, Mode, ResolvableId, Var};
use crate::planner::PlanResult;
use crate::planner::coster::OrderingCosting;
use crate::planner::plan::CyclicSignature;
use crate::planner::search::{CostModel, SearchSpace};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap, HashSet};

type Signature = (BTreeSet<ResolvableId>, CyclicSignature);

/// A* over ordering prefixes that degrades to beam search.
///
/// States are ranked by cost so far plus the summed heuristics of the
/// resolvables still to place. Once the frontier outgrows `frontier_limit`
/// the search continues level by level keeping the best `beam_width` states.
#[derive(Debug, Clone)]
pub struct HybridSearch {
    space: SearchSpace,
    frontier_limit: usize,
    beam_width: usize,
    max_candidates: usize,
}

struct Node {
    estimate: f64,
    sequence: usize,
    costing: OrderingCosting,
    bound: BTreeSet<Var>,
    remaining: BTreeSet<ResolvableId>,
    remaining_heuristic: f64,
}

impl Node {
    fn is_complete(&self) -> bool {
        self.remaining.is_empty()
    }
}

// Reversed so that `BinaryHeap` pops the cheapest estimate first.
impl Ord for Node {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .estimate
            .total_cmp(&self.estimate)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for Node {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Node {}

#[derive(Default)]
struct Progress {
    sequence: usize,
    expanded: HashSet<Signature>,
    completed: HashSet<CyclicSignature>,
    orderings: Vec<Vec<ResolvableId>>,
}

impl Progress {
    /// Record a finished ordering unless its cyclic signature is known.
    fn complete(&mut self, node: &Node) {
        if self.completed.insert(node.costing.cyclic_modes().clone()) {
            self.orderings.push(node.costing.ordering().to_vec());
        }
    }
}

impl HybridSearch {
    pub fn new(
        conjunction: &Conjunction,
        mode: &Mode,
        frontier_limit: usize,
        beam_width: usize,
        max_candidates: usize,
    ) -> Self {
        Self::from_space(
            SearchSpace::new(conjunction, mode),
            frontier_limit,
            beam_width,
            max_candidates,
        )
    }

    pub fn from_space(
        space: SearchSpace,
        frontier_limit: usize,
        beam_width: usize,
        max_candidates: usize,
    ) -> Self {
        Self {
            space,
            frontier_limit: frontier_limit.max(1),
            beam_width: beam_width.max(1),
            max_candidates: max_candidates.max(1),
        }
    }

    pub fn orderings(&self, model: &mut dyn CostModel) -> PlanResult<Vec<Vec<ResolvableId>>> {
        if self.space.is_empty() {
            return Ok(vec![Vec::new()]);
        }
        let all = self.space.resolvables();
        let mut heuristics = BTreeMap::new();
        for id in &all {
            heuristics.insert(*id, model.heuristic(*id)?);
        }
        let remaining_heuristic = heuristics.values().sum();
        let root = Node {
            estimate: remaining_heuristic,
            sequence: 0,
            costing: model.initial()?,
            bound: self.space.input_bounds().clone(),
            remaining: all,
            remaining_heuristic,
        };

        let mut progress = Progress {
            sequence: 1,
            ..Progress::default()
        };
        let mut frontier = BinaryHeap::from([root]);
        while let Some(node) = frontier.pop() {
            if progress.orderings.len() >= self.max_candidates {
                break;
            }
            if node.is_complete() {
                progress.complete(&node);
                continue;
            }
            if !progress.expanded.insert(node.costing.signature()) {
                continue;
            }
            for child in self.expand(model, &node, &heuristics, &mut progress)? {
                frontier.push(child);
            }
            if frontier.len() > self.frontier_limit {
                log::debug!(
                    "Frontier of {} exceeded {}, continuing with beam width {}",
                    frontier.len(),
                    self.frontier_limit,
                    self.beam_width
                );
                return self.beam(model, frontier.into_vec(), &heuristics, progress);
            }
        }
        Ok(progress.orderings)
    }

    fn beam(
        &self,
        model: &mut dyn CostModel,
        frontier: Vec<Node>,
        heuristics: &BTreeMap<ResolvableId, f64>,
        mut progress: Progress,
    ) -> PlanResult<Vec<Vec<ResolvableId>>> {
        let mut level = self.best(frontier);
        while !level.is_empty() && progress.orderings.len() < self.max_candidates {
            let mut next: HashMap<Signature, Node> = HashMap::new();
            for node in level {
                if node.is_complete() {
                    progress.complete(&node);
                    continue;
                }
                if !progress.expanded.insert(node.costing.signature()) {
                    continue;
                }
                for child in self.expand(model, &node, heuristics, &mut progress)? {
                    let signature = child.costing.signature();
                    let keep = next
                        .get(&signature)
                        .is_none_or(|existing| child.estimate < existing.estimate);
                    if keep {
                        next.insert(signature, child);
                    }
                }
            }
            level = self.best(next.into_values().collect());
        }
        Ok(progress.orderings)
    }

    /// The `beam_width` cheapest nodes, cheapest first.
    fn best(&self, mut nodes: Vec<Node>) -> Vec<Node> {
        // `Node` orders in reverse, so a descending sort puts the cheapest first.
        nodes.sort_by(|a, b| b.cmp(a));
        nodes.truncate(self.beam_width);
        nodes
    }

    fn expand(
        &self,
        model: &mut dyn CostModel,
        node: &Node,
        heuristics: &BTreeMap<ResolvableId, f64>,
        progress: &mut Progress,
    ) -> PlanResult<Vec<Node>> {
        let candidates = self.space.prefer_connected(
            self.space.enabled(&node.remaining, &node.bound),
            &node.bound,
        );
        let mut children = Vec::with_capacity(candidates.len());
        for next in candidates {
            let costing = model.extend(&node.costing, next)?;
            let mut bound = node.bound.clone();
            self.space.bind(next, &mut bound);
            let mut remaining = node.remaining.clone();
            remaining.remove(&next);
            let remaining_heuristic =
                (node.remaining_heuristic - heuristics.get(&next).copied().unwrap_or(0.0)).max(0.0);
            children.push(Node {
                estimate: costing.cost() + remaining_heuristic,
                sequence: progress.sequence,
                costing,
                bound,
                remaining,
                remaining_heuristic,
            });
            progress.sequence += 1;
        }
        Ok(children)
    }
}
