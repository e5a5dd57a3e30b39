//! Neighbour topologies.
//!
//! Every builder returns a [`NeighbourGraph`]: one adjacency list and one layout
//! position per agent index. Grid and scale-free graphs are symmetric by
//! construction. Random sampling (with replacement) and nearest-k selection are
//! one-directional and may contain asymmetric links.

use std::cmp::Reverse;
use std::f64::consts::TAU;

use bitvec::prelude::*;
use nalgebra::{Point2, Vector2};
use rand::Rng;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agent::AgentId;
use crate::error::{Result, SimError};

/// Radius multiplier applied at each depth of the radial layout
pub const LAYOUT_SHRINK: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TopologyKind {
    /// `neighbours` uniform draws with replacement per agent
    Random { neighbours: usize },
    /// `side x side` lattice without wraparound
    Grid { side: usize },
    /// The `neighbours` closest agents by layout position
    NearestK { neighbours: usize },
    /// Preferential attachment, `links` edges per newcomer
    ScaleFree { links: usize },
}

impl TopologyKind {
    pub fn name(&self) -> &'static str {
        match self {
            TopologyKind::Random { .. } => "random",
            TopologyKind::Grid { .. } => "grid",
            TopologyKind::NearestK { .. } => "nearest_k",
            TopologyKind::ScaleFree { .. } => "scale_free",
        }
    }

    /// Whether the builder guarantees a symmetric relation
    pub fn is_symmetric(&self) -> bool {
        matches!(self, TopologyKind::Grid { .. } | TopologyKind::ScaleFree { .. })
    }
}

impl Default for TopologyKind {
    fn default() -> Self {
        TopologyKind::Random { neighbours: 20 }
    }
}

/// Layout area. Only used for positions, never for simulation logic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Canvas {
    pub width: f64,
    pub height: f64,
}

impl Canvas {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn center(&self) -> Point2<f64> {
        Point2::new(self.width / 2.0, self.height / 2.0)
    }

    fn random_point<R: Rng + ?Sized>(&self, rng: &mut R) -> Point2<f64> {
        let x = rng.gen::<f64>() * self.width;
        let y = rng.gen::<f64>() * self.height;
        Point2::new(x, y)
    }
}

impl Default for Canvas {
    fn default() -> Self {
        Self::new(1500.0, 1500.0)
    }
}

/// Adjacency lists plus layout positions, indexed by agent
#[derive(Debug, Clone, Default)]
pub struct NeighbourGraph {
    adjacency: Vec<Vec<AgentId>>,
    positions: Vec<Point2<f64>>,
}

impl NeighbourGraph {
    pub fn empty(agents: usize) -> Self {
        Self {
            adjacency: vec![Vec::new(); agents],
            positions: vec![Point2::origin(); agents],
        }
    }

    pub fn len(&self) -> usize {
        self.adjacency.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adjacency.is_empty()
    }

    pub fn neighbours(&self, agent: AgentId) -> &[AgentId] {
        &self.adjacency[agent]
    }

    #[inline]
    pub fn degree(&self, agent: AgentId) -> usize {
        self.adjacency[agent].len()
    }

    /// Sum of all adjacency list lengths; twice the edge count for symmetric graphs
    pub fn total_degree(&self) -> usize {
        self.adjacency.iter().map(Vec::len).sum()
    }

    pub fn positions(&self) -> &[Point2<f64>] {
        &self.positions
    }

    /// First agent without any neighbour, if any
    pub fn isolated(&self) -> Option<AgentId> {
        self.adjacency.iter().position(Vec::is_empty)
    }

    /// True when every link a -> b is matched by a link b -> a with equal multiplicity
    pub fn is_symmetric(&self) -> bool {
        let mut balance: FxHashMap<(AgentId, AgentId), isize> = FxHashMap::default();
        for (a, neighbours) in self.adjacency.iter().enumerate() {
            for &b in neighbours {
                if a == b {
                    continue;
                }
                let key = (a.min(b), a.max(b));
                *balance.entry(key).or_default() += if a < b { 1 } else { -1 };
            }
        }
        balance.values().all(|&count| count == 0)
    }

    pub fn into_parts(self) -> (Vec<Vec<AgentId>>, Vec<Point2<f64>>) {
        (self.adjacency, self.positions)
    }

    fn link(&mut self, a: AgentId, b: AgentId) {
        self.adjacency[a].push(b);
        self.adjacency[b].push(a);
    }

    fn link_directed(&mut self, from: AgentId, to: AgentId) {
        self.adjacency[from].push(to);
    }
}

/// Build the neighbour graph for `agents` agents
pub fn build<R: Rng + ?Sized>(
    kind: TopologyKind,
    agents: usize,
    canvas: Canvas,
    rng: &mut R,
) -> Result<NeighbourGraph> {
    let graph = match kind {
        TopologyKind::Random { neighbours } => random(agents, neighbours, canvas, rng),
        TopologyKind::Grid { side } => {
            let cells = side
                .checked_mul(side)
                .ok_or_else(|| SimError::config(format!("grid side {side} is too large")))?;
            if cells != agents {
                return Err(SimError::config(format!(
                    "grid of side {side} holds {cells} agents, population has {agents}"
                )));
            }
            grid(side, canvas)
        }
        TopologyKind::NearestK { neighbours } => nearest_k(agents, neighbours, canvas, rng),
        TopologyKind::ScaleFree { links } => {
            let mut graph = scale_free(agents, links, rng);
            radial_layout(&mut graph, canvas);
            graph
        }
    };

    debug!(
        topology = kind.name(),
        agents,
        total_degree = graph.total_degree(),
        symmetric = kind.is_symmetric(),
        "Built neighbour graph"
    );
    Ok(graph)
}

/// Each agent draws `k` neighbours uniformly, with replacement, from everyone but itself.
/// Positions are scattered over the canvas afterwards.
pub fn random<R: Rng + ?Sized>(
    agents: usize,
    k: usize,
    canvas: Canvas,
    rng: &mut R,
) -> NeighbourGraph {
    let mut graph = NeighbourGraph::empty(agents);
    if agents < 2 {
        return graph;
    }

    for agent in 0..agents {
        for _ in 0..k {
            // skip over self so the remaining agents stay equally likely
            let mut other = rng.gen_range(0..agents - 1);
            if other >= agent {
                other += 1;
            }
            graph.link_directed(agent, other);
        }
    }

    for position in graph.positions.iter_mut() {
        *position = canvas.random_point(rng);
    }
    graph
}

/// Row-major `side x side` lattice linking each cell to its right and lower cell
pub fn grid(side: usize, canvas: Canvas) -> NeighbourGraph {
    let agents = side * side;
    let mut graph = NeighbourGraph::empty(agents);
    if side == 0 {
        return graph;
    }

    let cell_w = canvas.width / side as f64;
    let cell_h = canvas.height / side as f64;

    for idx in 0..agents {
        let x = idx % side;
        let y = idx / side;

        if x + 1 < side {
            graph.link(idx, idx + 1);
        }
        if y + 1 < side {
            graph.link(idx, idx + side);
        }

        graph.positions[idx] = Point2::new((x as f64 + 0.5) * cell_w, (y as f64 + 0.5) * cell_h);
    }
    graph
}

/// Scatter agents over the canvas, then link each to its `k` closest agents
pub fn nearest_k<R: Rng + ?Sized>(
    agents: usize,
    k: usize,
    canvas: Canvas,
    rng: &mut R,
) -> NeighbourGraph {
    let positions = (0..agents).map(|_| canvas.random_point(rng)).collect();
    nearest_k_from_positions(positions, k)
}

/// Greedy k-nearest selection over fixed positions.
///
/// Links are one-directional. Distance ties go to the lower index, and `k >= n - 1`
/// links every other agent.
pub fn nearest_k_from_positions(positions: Vec<Point2<f64>>, k: usize) -> NeighbourGraph {
    let agents = positions.len();
    let mut graph = NeighbourGraph {
        adjacency: vec![Vec::new(); agents],
        positions,
    };
    let wanted = k.min(agents.saturating_sub(1));

    for agent in 0..agents {
        let mut chosen: BitVec = bitvec![0; agents];
        chosen.set(agent, true);

        for _ in 0..wanted {
            let origin = graph.positions[agent];
            let mut best: Option<(AgentId, f64)> = None;
            for other in 0..agents {
                if chosen[other] {
                    continue;
                }
                let dist = nalgebra::distance_squared(&origin, &graph.positions[other]);
                if best.map_or(true, |(_, best_dist)| dist < best_dist) {
                    best = Some((other, dist));
                }
            }

            match best {
                Some((other, _)) => {
                    chosen.set(other, true);
                    graph.link_directed(agent, other);
                }
                None => break,
            }
        }
    }
    graph
}

/// Barabási–Albert growth: agents join in index order and each newcomer links to
/// `links` distinct earlier agents picked by degree-weighted roulette. Agent 0 has
/// nobody to attach to and is skipped. Positions are left at the origin.
pub fn scale_free<R: Rng + ?Sized>(agents: usize, links: usize, rng: &mut R) -> NeighbourGraph {
    let mut graph = NeighbourGraph::empty(agents);

    for newcomer in 1..agents {
        let mut candidates: Vec<AgentId> = (0..newcomer).collect();
        let wanted = links.min(newcomer);

        for _ in 0..wanted {
            let weights: Vec<f64> = candidates
                .iter()
                .map(|&existing| graph.degree(existing) as f64)
                .collect();
            let pick = roulette_select(&weights, rng);
            let target = candidates.remove(pick);
            graph.link(newcomer, target);
        }
    }
    graph
}

/// Roulette-wheel selection over non-negative weights, normalised to sum to 1.
/// A zero total falls back to a uniform pick. `weights` must not be empty.
pub fn roulette_select<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> usize {
    assert!(!weights.is_empty(), "roulette selection needs at least one candidate");

    let total: f64 = weights.iter().sum();
    let roll: f64 = rng.gen();
    if total <= 0.0 {
        return ((roll * weights.len() as f64) as usize).min(weights.len() - 1);
    }

    let mut cumulative = 0.0;
    for (idx, &weight) in weights.iter().enumerate() {
        cumulative += weight / total;
        if roll < cumulative {
            return idx;
        }
    }
    // rounding can leave the cumulative sum just under 1
    weights
        .iter()
        .rposition(|&weight| weight > 0.0)
        .unwrap_or(weights.len() - 1)
}

/// Radial layout for a finished graph.
///
/// The highest-degree agent goes to the canvas centre. Each agent's unplaced
/// neighbours sit on a circle around it, further out the more links they have
/// relative to their siblings, and the radius shrinks by [`LAYOUT_SHRINK`] per
/// level. The result is shifted so its centroid is the canvas centre.
pub fn radial_layout(graph: &mut NeighbourGraph, canvas: Canvas) {
    let agents = graph.len();
    if agents == 0 {
        return;
    }

    // stable, so equal degrees keep index order
    let mut order: Vec<AgentId> = (0..agents).collect();
    order.sort_by_key(|&agent| Reverse(graph.degree(agent)));

    let center = canvas.center();
    let base_radius = canvas.width.min(canvas.height) / 4.0;
    let mut placed: BitVec = bitvec![0; agents];

    for &root in &order {
        if placed[root] {
            continue;
        }
        graph.positions[root] = center;
        placed.set(root, true);

        // explicit stack instead of recursion; long chains would overflow otherwise
        let mut stack = vec![(root, base_radius)];
        while let Some((parent, radius)) = stack.pop() {
            let mut children = Vec::new();
            for &child in graph.neighbours(parent) {
                if !placed[child] {
                    placed.set(child, true);
                    children.push(child);
                }
            }
            if children.is_empty() {
                continue;
            }

            let max_degree = children
                .iter()
                .map(|&child| graph.degree(child))
                .max()
                .unwrap_or(1)
                .max(1) as f64;
            let step = TAU / children.len() as f64;
            let origin = graph.positions[parent];

            for (slot, &child) in children.iter().enumerate() {
                let share = graph.degree(child) as f64 / max_degree;
                let r = radius * (0.5 + 0.5 * share);
                let angle = step * slot as f64;
                graph.positions[child] = origin + Vector2::new(r * angle.cos(), r * angle.sin());
            }
            for &child in children.iter().rev() {
                stack.push((child, radius * LAYOUT_SHRINK));
            }
        }
    }

    let sum = graph
        .positions
        .iter()
        .fold(Vector2::zeros(), |acc, p| acc + p.coords);
    let centroid = Point2::from(sum / agents as f64);
    let shift = center - centroid;
    for position in graph.positions.iter_mut() {
        *position += shift;
    }
}
