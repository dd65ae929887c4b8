//! Reduction of one expansion move to a binary flow network.
//!
//! Within a block, every site whose label differs from `alpha` becomes a free
//! node: source side keeps the current label, sink side adopts `alpha`. Sites
//! already labeled `alpha` and sites outside the block are frozen; their edges
//! to free nodes fold into terminal costs.
//!
//! A pair of free nodes with distinct labels `a != b` gets an auxiliary node
//! when the pair's cost triple is a metric on `{a, b, alpha}` (the
//! Boykov-Veksler-Zabih construction). Every other pair uses the direct
//! Kolmogorov-Zabih decomposition. A direct pair whose term is not submodular
//! has its coupling truncated to zero; the engine still checks every move
//! against the exact energy before it applies it.

use crate::block::Block;
use crate::cost::CostModel;
use crate::error::{ExpansionError, Result};
use crate::maxflow::{FlowGraph, MinCut};

const FROZEN: u32 = u32::MAX;

/// Binary network for one block and one candidate label.
#[derive(Debug)]
pub struct ExpansionNetwork {
    pub graph: FlowGraph,
    /// Global site of every free node, in node order. Auxiliary nodes follow
    /// the free nodes and have no site.
    pub sites: Vec<u32>,
    pub aux_nodes: usize,
    /// Pair terms whose coupling was truncated.
    pub truncated: usize,
}

impl ExpansionNetwork {
    /// Sites the cut moves to `alpha`.
    pub fn moving_sites(&self, cut: &MinCut) -> Vec<u32> {
        self.sites
            .iter()
            .enumerate()
            .filter(|&(node, _)| cut.adopts(node))
            .map(|(_, &site)| site)
            .collect()
    }
}

enum Pair {
    Aux,
    Direct,
    Truncated,
}

/// Build the expansion network of `block` for candidate label `alpha`.
pub fn build(model: &CostModel, labels: &[u32], alpha: u32, block: &Block) -> Result<ExpansionNetwork> {
    let t = model.topology();
    if labels.len() != t.num_sites() {
        return Err(ExpansionError::infeasible(format!(
            "labeling has {} sites, grid has {}",
            labels.len(),
            t.num_sites()
        )));
    }
    if alpha as usize >= model.n_labels() {
        return Err(ExpansionError::infeasible(format!(
            "candidate label {} outside [0, {})",
            alpha,
            model.n_labels()
        )));
    }
    if block.x1 > t.width || block.y1 > t.height || block.area() == 0 {
        return Err(ExpansionError::infeasible(format!(
            "block {:?} does not fit a {}x{} grid",
            block, t.width, t.height
        )));
    }

    // Pass 1: number the free nodes.
    let mut node_of = vec![FROZEN; block.area()];
    let mut sites = Vec::new();
    for s in block.sites(t) {
        if labels[s] != alpha {
            let (x, y) = t.coords(s);
            node_of[block.local(x, y)] = sites.len() as u32;
            sites.push(s as u32);
        }
    }
    let node = |site: usize| -> Option<usize> {
        let (x, y) = t.coords(site);
        if !block.contains(x, y) {
            return None;
        }
        let n = node_of[block.local(x, y)];
        (n != FROZEN).then_some(n as usize)
    };

    let degree = t.connectivity.degree() as usize;
    let mut graph = FlowGraph::with_capacity(sites.len(), sites.len() * degree / 2);
    for (i, &s) in sites.iter().enumerate() {
        let s = s as usize;
        graph.add_tweights(
            i,
            model.unary_cost(s, labels[s]),
            model.unary_cost(s, alpha),
        );
    }

    // Pass 2: pair terms. Edges inside the block are visited from their
    // forward origin; edges entering from outside from their head.
    let mut aux_nodes = 0;
    let mut truncated = 0;
    for p in block.sites(t) {
        let lp = labels[p];
        let np = node(p);

        for (dir, q) in t.forward_neighbors(p) {
            let lq = labels[q];
            let v = |a: u32, b: u32| model.pairwise_cost(p, dir, a, b);
            match (np, node(q)) {
                (Some(i), Some(j)) => {
                    match add_pair(&mut graph, i, j, v(lp, lq), v(lp, alpha), v(alpha, lq), v(alpha, alpha), lp != lq) {
                        Pair::Aux => aux_nodes += 1,
                        Pair::Truncated => truncated += 1,
                        Pair::Direct => {}
                    }
                }
                (Some(i), None) => graph.add_tweights(i, v(lp, lq), v(alpha, lq)),
                (None, Some(j)) => graph.add_tweights(j, v(lp, lq), v(lp, alpha)),
                (None, None) => {}
            }
        }

        let Some(i) = np else {
            continue;
        };
        for (dir, r) in t.backward_neighbors(p) {
            let (rx, ry) = t.coords(r);
            if block.contains(rx, ry) {
                continue;
            }
            let lr = labels[r];
            graph.add_tweights(
                i,
                model.pairwise_cost(r, dir, lr, lp),
                model.pairwise_cost(r, dir, lr, alpha),
            );
        }
    }

    Ok(ExpansionNetwork {
        graph,
        sites,
        aux_nodes,
        truncated,
    })
}

/// Add the pair term `E(xi, xj)` with `E(0,0) = a`, `E(0,1) = b`,
/// `E(1,0) = c`, `E(1,1) = d` (0 = keep, 1 = adopt).
fn add_pair(graph: &mut FlowGraph, i: usize, j: usize, a: f64, b: f64, c: f64, d: f64, distinct: bool) -> Pair {
    if distinct {
        // Relative to E(1,1), the triple must be a metric for the auxiliary
        // node to reproduce E exactly.
        let (a1, b1, c1) = (a - d, b - d, c - d);
        if a1 >= 0.0 && b1 >= 0.0 && c1 >= 0.0 && a1 <= b1 + c1 && b1 <= a1 + c1 && c1 <= a1 + b1 {
            let k = graph.add_node();
            graph.add_tweights(k, a1, 0.0);
            graph.add_edge(i, k, b1, b1);
            graph.add_edge(k, j, c1, c1);
            return Pair::Aux;
        }
    }

    // E = a + (c - a) xi + (d - c) xj + (b + c - a - d) (1 - xi) xj
    graph.add_tweights(i, 0.0, c - a);
    graph.add_tweights(j, 0.0, d - c);
    let coupling = b + c - a - d;
    if coupling > 0.0 {
        graph.add_edge(i, j, coupling, 0.0);
        Pair::Direct
    } else if coupling < -1e-9 * (1.0 + a.abs() + d.abs()) {
        Pair::Truncated
    } else {
        Pair::Direct
    }
}
