//! Shared helpers for the integration tests: graph generators and a
//! sequential Bellman-Ford reference.

#![allow(dead_code)]

use std::collections::BTreeMap;

use safra_sim::{NodeId, Topology, TopologyBuilder};

/// Small deterministic linear congruential generator
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed)
    }

    pub fn next_u64(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    /// Integer-valued weight in `1..=max`, so sums stay exact
    pub fn weight(&mut self, max: u64) -> f64 {
        (self.next_u64() % max + 1) as f64
    }
}

pub fn name(i: usize) -> String {
    format!("n{i}")
}

fn declare(count: usize) -> TopologyBuilder {
    Topology::builder().nodes((0..count).map(name))
}

pub fn ring(count: usize, rng: &mut Lcg) -> Topology {
    let mut builder = declare(count);
    for i in 0..count {
        builder = builder.edge(name(i), name((i + 1) % count), rng.weight(9));
    }
    builder.root(name(0)).build().unwrap()
}

pub fn grid(side: usize, rng: &mut Lcg) -> Topology {
    let mut builder = declare(side * side);
    for row in 0..side {
        for col in 0..side {
            let here = row * side + col;
            if col + 1 < side {
                builder = builder.edge(name(here), name(here + 1), rng.weight(9));
            }
            if row + 1 < side {
                builder = builder.edge(name(here), name(here + side), rng.weight(9));
            }
        }
    }
    builder.root(name(0)).build().unwrap()
}

pub fn complete(count: usize, rng: &mut Lcg) -> Topology {
    let mut builder = declare(count);
    for a in 0..count {
        for b in a + 1..count {
            builder = builder.edge(name(a), name(b), rng.weight(9));
        }
    }
    builder.root(name(count - 1)).build().unwrap()
}

/// One hub with `leaves` spokes; the root is a leaf, so every update to the
/// other leaves is relayed by the hub
pub fn star(leaves: usize, rng: &mut Lcg) -> Topology {
    let mut builder = declare(leaves + 1);
    for leaf in 1..=leaves {
        builder = builder.edge(name(0), name(leaf), rng.weight(9));
    }
    builder.root(name(1)).build().unwrap()
}

/// Random spanning tree plus `extra` chords
pub fn random(count: usize, extra: usize, rng: &mut Lcg) -> Topology {
    let mut edges = std::collections::BTreeSet::new();
    for i in 1..count {
        let parent = (rng.next_u64() as usize) % i;
        edges.insert((parent, i));
    }
    let mut attempts = 0;
    while edges.len() < count - 1 + extra && attempts < 10 * extra {
        attempts += 1;
        let a = (rng.next_u64() as usize) % count;
        let b = (rng.next_u64() as usize) % count;
        if a != b {
            edges.insert((a.min(b), a.max(b)));
        }
    }

    let mut builder = declare(count);
    for (a, b) in edges {
        builder = builder.edge(name(a), name(b), rng.weight(20));
    }
    let root = (rng.next_u64() as usize) % count;
    builder.root(name(root)).build().unwrap()
}

/// Sequential reference distances
pub fn bellman_ford(topology: &Topology) -> BTreeMap<NodeId, f64> {
    let mut distance = vec![f64::INFINITY; topology.len()];
    distance[topology.root_index()] = 0.0;
    for _ in 1..topology.len() {
        let mut changed = false;
        for (i, entry) in topology.nodes().iter().enumerate() {
            if distance[i].is_infinite() {
                continue;
            }
            for link in &entry.neighbors {
                let candidate = distance[i] + link.weight;
                if candidate < distance[link.index] {
                    distance[link.index] = candidate;
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }
    topology
        .nodes()
        .iter()
        .zip(distance)
        .map(|(entry, d)| (entry.id.clone(), d))
        .collect()
}

/// The five-node scenario: P root, expected Q=2 R=2 S=3 T=3
pub fn five_nodes() -> Topology {
    Topology::builder()
        .nodes(["P", "Q", "R", "S", "T"])
        .edge("P", "Q", 2.0)
        .edge("P", "R", 2.0)
        .edge("Q", "R", 2.0)
        .edge("R", "T", 1.0)
        .edge("R", "S", 1.0)
        .edge("T", "S", 1.0)
        .root("P")
        .build()
        .unwrap()
}
