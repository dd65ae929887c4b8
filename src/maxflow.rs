//! Exact s-t minimum cut on flat arrays.
//!
//! A [`FlowGraph`] holds the inner nodes of a binary labeling network, the
//! terminal costs of each node, and the inner arcs. Node `i` on the source
//! side of the cut keeps its label (label 0); on the sink side it takes the
//! alternative (label 1). [`MinCutSolver`] runs Dinic's algorithm with an
//! explicit stack, so path length is not bounded by the call stack.

use std::collections::VecDeque;

use crate::error::{ExpansionError, Result};

/// Binary flow network under construction.
#[derive(Clone, Debug, Default)]
pub struct FlowGraph {
    /// Cost paid when the node ends on the source side.
    keep: Vec<f64>,
    /// Cost paid when the node ends on the sink side.
    adopt: Vec<f64>,
    /// Inner arcs as (tail, head, capacity, reverse capacity).
    arcs: Vec<(u32, u32, f64, f64)>,
}

impl FlowGraph {
    pub fn new(nodes: usize) -> Self {
        Self {
            keep: vec![0.0; nodes],
            adopt: vec![0.0; nodes],
            arcs: Vec::new(),
        }
    }

    pub fn with_capacity(nodes: usize, arcs: usize) -> Self {
        let mut g = Self::new(nodes);
        g.arcs.reserve(arcs);
        g
    }

    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.keep.len()
    }

    pub fn add_node(&mut self) -> usize {
        self.keep.push(0.0);
        self.adopt.push(0.0);
        self.keep.len() - 1
    }

    /// Add terminal costs: `keep` if the node stays on the source side,
    /// `adopt` if it ends on the sink side. Either may be negative; only the
    /// difference matters to the cut.
    #[inline]
    pub fn add_tweights(&mut self, node: usize, keep: f64, adopt: f64) {
        self.keep[node] += keep;
        self.adopt[node] += adopt;
    }

    /// Arc `u -> v` with capacity `cap` (paid when `u` keeps and `v` adopts)
    /// and `v -> u` with capacity `rev_cap`.
    #[inline]
    pub fn add_edge(&mut self, u: usize, v: usize, cap: f64, rev_cap: f64) {
        self.arcs.push((u as u32, v as u32, cap, rev_cap));
    }

    /// Cut value of an explicit assignment (`true` = sink side), excluding
    /// the constant part of the terminal costs. Used to check the solver.
    pub fn cut_cost(&self, sink_side: &[bool]) -> f64 {
        let mut c = 0.0;
        for i in 0..self.num_nodes() {
            c += if sink_side[i] { self.adopt[i] } else { self.keep[i] };
        }
        for &(u, v, cap, rev) in &self.arcs {
            let (su, sv) = (sink_side[u as usize], sink_side[v as usize]);
            if !su && sv {
                c += cap;
            } else if su && !sv {
                c += rev;
            }
        }
        c
    }
}

/// Result of a minimum cut.
#[derive(Clone, Debug)]
pub struct MinCut {
    /// Value of the maximum flow (the cut value minus the constant terminal part).
    pub flow: f64,
    sink_side: Vec<bool>,
}

impl MinCut {
    /// Whether node `i` ends on the sink side (takes the alternative label).
    #[inline]
    pub fn adopts(&self, node: usize) -> bool {
        self.sink_side[node]
    }

    pub fn sink_side(&self) -> &[bool] {
        &self.sink_side
    }
}

/// Dinic max-flow solver. Scratch buffers are kept between calls.
#[derive(Debug, Default)]
pub struct MinCutSolver {
    head: Vec<u32>,
    cap: Vec<f64>,
    first: Vec<usize>,
    adj: Vec<u32>,
    level: Vec<i32>,
    cursor: Vec<usize>,
    path: Vec<u32>,
    queue: VecDeque<u32>,
}

impl MinCutSolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute a minimum cut of `graph`. Nodes not reachable from the source
    /// in the final residual graph are reported on the sink side.
    pub fn solve(&mut self, graph: &FlowGraph) -> Result<MinCut> {
        let n = graph.num_nodes();
        let (s, t) = (n, n + 1);
        self.build(graph, s, t)?;

        let mut flow = 0.0;
        while self.bfs(s, t) {
            flow += self.blocking_flow(s, t);
        }

        // Source side = reachable in the residual graph (last BFS).
        let sink_side = self.level[..n].iter().map(|&l| l < 0).collect();
        Ok(MinCut { flow, sink_side })
    }

    fn push_arc(&mut self, u: usize, v: usize, cap: f64, rev: f64) {
        self.head.push(v as u32);
        self.cap.push(cap);
        self.head.push(u as u32);
        self.cap.push(rev);
    }

    /// Lay out arcs in pairs (`e`, `e ^ 1`) and index them by tail (CSR).
    fn build(&mut self, graph: &FlowGraph, s: usize, t: usize) -> Result<()> {
        let n = graph.num_nodes();
        let total = n + 2;
        self.head.clear();
        self.cap.clear();

        for i in 0..n {
            let net = graph.adopt[i] - graph.keep[i];
            if !net.is_finite() {
                return Err(ExpansionError::infeasible(format!(
                    "node {} has terminal costs keep={} adopt={}",
                    i, graph.keep[i], graph.adopt[i]
                )));
            }
            if net > 0.0 {
                self.push_arc(s, i, net, 0.0);
            } else if net < 0.0 {
                self.push_arc(i, t, -net, 0.0);
            }
        }
        for &(u, v, cap, rev) in &graph.arcs {
            let (u, v) = (u as usize, v as usize);
            if u >= n || v >= n || u == v {
                return Err(ExpansionError::infeasible(format!(
                    "arc {} -> {} in a network of {} nodes",
                    u, v, n
                )));
            }
            if !(cap.is_finite() && rev.is_finite() && cap >= 0.0 && rev >= 0.0) {
                return Err(ExpansionError::infeasible(format!(
                    "arc {} -> {} has capacities {} / {}",
                    u, v, cap, rev
                )));
            }
            if cap > 0.0 || rev > 0.0 {
                self.push_arc(u, v, cap, rev);
            }
        }

        // Counting sort of arc ids by tail; the tail of e is head[e ^ 1].
        self.first.clear();
        self.first.resize(total + 1, 0);
        for e in 0..self.head.len() {
            self.first[self.head[e ^ 1] as usize + 1] += 1;
        }
        for v in 0..total {
            self.first[v + 1] += self.first[v];
        }
        self.adj.clear();
        self.adj.resize(self.head.len(), 0);
        self.cursor.clear();
        self.cursor.extend_from_slice(&self.first[..total]);
        for e in 0..self.head.len() {
            let tail = self.head[e ^ 1] as usize;
            self.adj[self.cursor[tail]] = e as u32;
            self.cursor[tail] += 1;
        }

        self.level.clear();
        self.level.resize(total, -1);
        Ok(())
    }

    fn bfs(&mut self, s: usize, t: usize) -> bool {
        self.level.fill(-1);
        self.level[s] = 0;
        self.queue.clear();
        self.queue.push_back(s as u32);
        while let Some(v) = self.queue.pop_front() {
            let v = v as usize;
            for &e in &self.adj[self.first[v]..self.first[v + 1]] {
                let to = self.head[e as usize] as usize;
                if self.cap[e as usize] > 0.0 && self.level[to] < 0 {
                    self.level[to] = self.level[v] + 1;
                    self.queue.push_back(to as u32);
                }
            }
        }
        self.level[t] >= 0
    }

    /// Saturate every shortest augmenting path of the current level graph.
    fn blocking_flow(&mut self, s: usize, t: usize) -> f64 {
        let total = self.level.len();
        self.cursor.clear();
        self.cursor.extend_from_slice(&self.first[..total]);
        self.path.clear();

        let mut pushed = 0.0;
        let mut v = s;
        loop {
            if v == t {
                let f = self
                    .path
                    .iter()
                    .map(|&e| self.cap[e as usize])
                    .fold(f64::INFINITY, f64::min);
                // The bottleneck arc drops to exactly zero.
                let mut cut_at = self.path.len();
                for (i, &e) in self.path.iter().enumerate() {
                    let e = e as usize;
                    self.cap[e] -= f;
                    self.cap[e ^ 1] += f;
                    if cut_at == self.path.len() && self.cap[e] <= 0.0 {
                        cut_at = i;
                    }
                }
                pushed += f;
                // Resume from the tail of the first saturated arc.
                v = if cut_at == 0 {
                    s
                } else {
                    self.head[self.path[cut_at - 1] as usize] as usize
                };
                self.path.truncate(cut_at);
                continue;
            }

            let mut advanced = false;
            while self.cursor[v] < self.first[v + 1] {
                let e = self.adj[self.cursor[v]] as usize;
                let to = self.head[e] as usize;
                if self.cap[e] > 0.0 && self.level[to] == self.level[v] + 1 {
                    self.path.push(e as u32);
                    v = to;
                    advanced = true;
                    break;
                }
                self.cursor[v] += 1;
            }
            if advanced {
                continue;
            }

            // Dead end: retreat one arc and skip it.
            let Some(e) = self.path.pop() else {
                break;
            };
            self.level[v] = -1;
            v = self.head[e as usize ^ 1] as usize;
            self.cursor[v] += 1;
        }
        pushed
    }
}
