//! Directed dependency graph over change ids.
//!
//! Atomic groups come from two sources: strongly connected components of
//! the full graph (circular dependencies) and directed SCCs of the
//! strength-1.0 subgraph. Directed SCCs matter: a one-way chain A->B->C is
//! orderable and must not collapse into one unsplittable group.

use indexmap::{IndexMap, IndexSet};
use petgraph::Direction;
use petgraph::algo::{has_path_connecting, tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;
use tracing::{debug, warn};

use crate::core::model::{AtomicGroup, Change, Dependency};

/// Changed-line budget above which an atomic group gets split.
pub const ATOMIC_GROUP_LINE_BUDGET: usize = 500;

/// Path fragments that mark interface/model/type files.
const INTERFACE_PATTERNS: &[&str] = &["/model/", "/models/", "/types/", "interface.go", ".d.ts"];

#[derive(Debug, Clone)]
struct EdgeData {
    strength: f64,
}

/// Nodes are change ids; an edge source->target means source depends on
/// target, so target applies before or together with source.
pub struct DependencyGraph {
    graph: DiGraph<String, EdgeData>,
    nodes: IndexMap<String, NodeIndex>,
    changes: IndexMap<String, Change>,
    dependencies: Vec<Dependency>,
}

/// Shape summary reported alongside results.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphStatistics {
    pub num_nodes: usize,
    pub num_edges: usize,
    pub num_sccs: usize,
    pub is_dag: bool,
    pub avg_in_degree: f64,
    pub avg_out_degree: f64,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            nodes: IndexMap::new(),
            changes: IndexMap::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn add_changes(&mut self, changes: &[Change]) {
        for change in changes {
            if self.nodes.contains_key(&change.id) {
                continue;
            }
            let idx = self.graph.add_node(change.id.clone());
            self.nodes.insert(change.id.clone(), idx);
            self.changes.insert(change.id.clone(), change.clone());
        }
    }

    pub fn add_dependencies(&mut self, dependencies: &[Dependency]) {
        for dep in dependencies {
            let (Some(&src), Some(&dst)) =
                (self.nodes.get(&dep.source), self.nodes.get(&dep.target))
            else {
                warn!(source = %dep.source, target = %dep.target, "dropping edge with unknown endpoint");
                continue;
            };
            self.graph.add_edge(
                src,
                dst,
                EdgeData {
                    strength: dep.strength,
                },
            );
            self.dependencies.push(dep.clone());
        }
    }

    pub fn change(&self, id: &str) -> Option<&Change> {
        self.changes.get(id)
    }

    pub fn change_ids(&self) -> impl Iterator<Item = &String> {
        self.changes.keys()
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    /// Change ids this change depends on (its edge targets).
    pub fn dependencies_of(&self, id: &str) -> Vec<String> {
        let Some(&idx) = self.nodes.get(id) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(idx, Direction::Outgoing)
            .map(|n| self.graph[n].clone())
            .collect()
    }

    /// Change ids that depend on this change (its edge sources).
    pub fn dependents_of(&self, id: &str) -> Vec<String> {
        let Some(&idx) = self.nodes.get(id) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(idx, Direction::Incoming)
            .map(|n| self.graph[n].clone())
            .collect()
    }

    /// Multi-node SCCs of the full graph, i.e. circular dependencies.
    pub fn circular_components(&self) -> Vec<Vec<String>> {
        tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| scc.len() > 1)
            .map(|scc| scc.iter().map(|&n| self.graph[n].clone()).collect())
            .collect()
    }

    /// Multi-node directed SCCs of the strength-1.0 subgraph.
    fn strong_components(&self) -> Vec<Vec<String>> {
        let mut strong: DiGraph<String, ()> = DiGraph::new();
        let mut map: IndexMap<&str, NodeIndex> = IndexMap::new();
        for id in self.nodes.keys() {
            map.insert(id.as_str(), strong.add_node(id.clone()));
        }
        for edge in self.graph.edge_indices() {
            if self.graph[edge].strength >= 1.0
                && let Some((a, b)) = self.graph.edge_endpoints(edge)
            {
                let src = map[self.graph[a].as_str()];
                let dst = map[self.graph[b].as_str()];
                strong.add_edge(src, dst, ());
            }
        }
        tarjan_scc(&strong)
            .into_iter()
            .filter(|scc| scc.len() > 1)
            .map(|scc| scc.iter().map(|&n| strong[n].clone()).collect())
            .collect()
    }

    /// Atomic groups: circular SCCs plus strong-edge SCCs, deduplicated by
    /// member set, then split along directory/interface boundaries when a
    /// group exceeds the changed-line budget.
    pub fn find_atomic_groups(&self) -> Vec<AtomicGroup> {
        let mut groups = Vec::new();
        let mut seen: IndexSet<Vec<String>> = IndexSet::new();

        for (idx, scc) in self.circular_components().into_iter().enumerate() {
            let mut key = scc.clone();
            key.sort();
            if !seen.insert(key) {
                continue;
            }
            groups.push(AtomicGroup {
                id: format!("scc_{idx}"),
                change_ids: scc,
                reason: "Circular dependency - changes must stay together".to_string(),
            });
        }

        for (idx, scc) in self.strong_components().into_iter().enumerate() {
            let mut key = scc.clone();
            key.sort();
            if !seen.insert(key) {
                continue;
            }
            groups.push(AtomicGroup {
                id: format!("strong_{idx}"),
                change_ids: scc,
                reason: "Critical dependencies - must not be split".to_string(),
            });
        }

        let split: Vec<AtomicGroup> = groups
            .into_iter()
            .flat_map(|g| self.split_oversized_group(g))
            .collect();

        debug!(groups = split.len(), "atomic groups computed");
        split
    }

    fn group_size(&self, ids: &[String]) -> usize {
        ids.iter()
            .filter_map(|id| self.changes.get(id))
            .map(Change::changed_lines)
            .sum()
    }

    /// Split an over-budget group: first by immediate parent directory,
    /// else into interfaces/models vs implementations, else keep as-is.
    fn split_oversized_group(&self, group: AtomicGroup) -> Vec<AtomicGroup> {
        if self.group_size(&group.change_ids) <= ATOMIC_GROUP_LINE_BUDGET {
            return vec![group];
        }

        let mut by_dir: IndexMap<String, Vec<String>> = IndexMap::new();
        for id in &group.change_ids {
            let dir = self
                .changes
                .get(id)
                .map(|c| c.parent_dir().to_string())
                .unwrap_or_default();
            by_dir.entry(dir).or_default().push(id.clone());
        }

        if by_dir.len() > 1 {
            return by_dir
                .into_iter()
                .enumerate()
                .map(|(i, (dir, ids))| AtomicGroup {
                    id: format!("{}_dir_{i}", group.id),
                    change_ids: ids,
                    reason: format!("{} (split by directory {dir})", group.reason),
                })
                .collect();
        }

        let (interfaces, implementations): (Vec<String>, Vec<String>) = group
            .change_ids
            .iter()
            .cloned()
            .partition(|id| {
                self.changes
                    .get(id)
                    .is_some_and(|c| is_interface_file(&c.file))
            });

        if !interfaces.is_empty() && !implementations.is_empty() {
            return vec![
                AtomicGroup {
                    id: format!("{}_iface", group.id),
                    change_ids: interfaces,
                    reason: format!("{} (interfaces/models)", group.reason),
                },
                AtomicGroup {
                    id: format!("{}_impl", group.id),
                    change_ids: implementations,
                    reason: format!("{} (implementations)", group.reason),
                },
            ];
        }

        vec![group]
    }

    /// Topologically sorted change ids, dependencies first.
    ///
    /// On cycles, removes one edge per multi-node SCC and retries until the
    /// graph sorts; the node cap bounds the iteration.
    pub fn topological_order(&self) -> Vec<String> {
        let mut work = self.graph.map(|_, id| id.clone(), |_, _| ());

        let mut attempts = 0usize;
        loop {
            match toposort(&work, None) {
                Ok(order) => {
                    // toposort puts sources before their targets; we apply
                    // targets (dependencies) first
                    return order.into_iter().rev().map(|n| work[n].clone()).collect();
                }
                Err(_) if attempts < work.node_count() => {
                    attempts += 1;
                    let mut removed = false;
                    for scc in tarjan_scc(&work) {
                        if scc.len() < 2 {
                            continue;
                        }
                        // Remove one intra-SCC edge to break the cycle
                        'outer: for &a in &scc {
                            for b in work.neighbors(a).collect::<Vec<_>>() {
                                if scc.contains(&b)
                                    && let Some(e) = work.find_edge(a, b)
                                {
                                    work.remove_edge(e);
                                    removed = true;
                                    break 'outer;
                                }
                            }
                        }
                    }
                    if !removed {
                        warn!("cycle detected but no removable edge found");
                        return self.nodes.keys().cloned().collect();
                    }
                }
                Err(_) => {
                    warn!("cycle breaking did not converge, using insertion order");
                    return self.nodes.keys().cloned().collect();
                }
            }
        }
    }

    /// Whether a direct edge exists between the two changes, either way.
    pub fn has_edge_between(&self, id1: &str, id2: &str) -> bool {
        let (Some(&a), Some(&b)) = (self.nodes.get(id1), self.nodes.get(id2)) else {
            return false;
        };
        self.graph.find_edge(a, b).is_some() || self.graph.find_edge(b, a).is_some()
    }

    /// False iff the two changes sit on a directed cycle together or share
    /// a strength-1.0 edge in either direction.
    pub fn can_separate(&self, id1: &str, id2: &str) -> bool {
        let (Some(&a), Some(&b)) = (self.nodes.get(id1), self.nodes.get(id2)) else {
            return true;
        };

        let forward = has_path_connecting(&self.graph, a, b, None);
        let backward = has_path_connecting(&self.graph, b, a, None);
        if forward && backward {
            return false;
        }

        for dep in &self.dependencies {
            if dep.is_critical()
                && ((dep.source == id1 && dep.target == id2)
                    || (dep.source == id2 && dep.target == id1))
            {
                return false;
            }
        }

        true
    }

    pub fn statistics(&self) -> GraphStatistics {
        let nodes = self.graph.node_count();
        let edges = self.graph.edge_count();
        let in_sum: usize = self
            .graph
            .node_indices()
            .map(|n| self.graph.neighbors_directed(n, Direction::Incoming).count())
            .sum();
        let out_sum: usize = self
            .graph
            .node_indices()
            .map(|n| self.graph.neighbors_directed(n, Direction::Outgoing).count())
            .sum();

        GraphStatistics {
            num_nodes: nodes,
            num_edges: edges,
            num_sccs: tarjan_scc(&self.graph).len(),
            is_dag: toposort(&self.graph, None).is_ok(),
            avg_in_degree: in_sum as f64 / nodes.max(1) as f64,
            avg_out_degree: out_sum as f64 / nodes.max(1) as f64,
        }
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Interface/model/type file heuristics used when splitting large groups.
pub fn is_interface_file(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    if INTERFACE_PATTERNS.iter().any(|p| lower.contains(p)) {
        return true;
    }
    // result.* files carry shared result/status types
    lower
        .rsplit('/')
        .next()
        .is_some_and(|f| f.starts_with("result."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{ChangeKind, DependencyKind};

    fn change(id_file: &str, hunk: usize, lines: usize) -> Change {
        Change {
            id: Change::make_id(id_file, hunk),
            file: id_file.to_string(),
            hunk_index: hunk,
            kind: ChangeKind::Add,
            symbols: vec![],
            line_range: (1, 1 + lines),
            content: String::new(),
            added_lines: lines,
            removed_lines: 0,
        }
    }

    fn dep(source: &str, target: &str, strength: f64) -> Dependency {
        Dependency {
            source: source.to_string(),
            target: target.to_string(),
            kind: DependencyKind::DefinesUses,
            strength,
            reason: String::new(),
        }
    }

    fn graph_of(changes: Vec<Change>, deps: Vec<Dependency>) -> DependencyGraph {
        let mut g = DependencyGraph::new();
        g.add_changes(&changes);
        g.add_dependencies(&deps);
        g
    }

    #[test]
    fn one_way_strong_chain_is_not_atomic() {
        // A -> B -> C with strength 1.0: orderable, never an atomic group
        let g = graph_of(
            vec![change("a.py", 0, 10), change("b.py", 0, 10), change("c.py", 0, 10)],
            vec![
                dep("a.py:hunk_0", "b.py:hunk_0", 1.0),
                dep("b.py:hunk_0", "c.py:hunk_0", 1.0),
            ],
        );
        assert!(g.find_atomic_groups().is_empty());
    }

    #[test]
    fn mutual_edges_form_an_atomic_group() {
        // S3: circular modifies collapse into one group
        let g = graph_of(
            vec![change("a.py", 0, 10), change("b.py", 0, 10)],
            vec![
                dep("a.py:hunk_0", "b.py:hunk_0", 1.0),
                dep("b.py:hunk_0", "a.py:hunk_0", 1.0),
            ],
        );
        let groups = g.find_atomic_groups();
        assert_eq!(groups.len(), 1);
        let mut members = groups[0].change_ids.clone();
        members.sort();
        assert_eq!(members, vec!["a.py:hunk_0", "b.py:hunk_0"]);
    }

    #[test]
    fn oversized_group_splits_by_directory() {
        // S4: a cyclic group spanning /model/ and /impl/ over the budget
        let mut changes = Vec::new();
        let mut deps = Vec::new();
        for i in 0..6 {
            changes.push(change(&format!("pkg/model/m{i}.go"), 0, 80));
            changes.push(change(&format!("pkg/impl/i{i}.go"), 0, 70));
        }
        // One big cycle through all twelve changes
        let ids: Vec<String> = changes.iter().map(|c| c.id.clone()).collect();
        for w in ids.windows(2) {
            deps.push(dep(&w[0], &w[1], 1.0));
        }
        deps.push(dep(&ids[ids.len() - 1], &ids[0], 1.0));

        let g = graph_of(changes, deps);
        let groups = g.find_atomic_groups();
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().all(|grp| {
            let dirs: IndexSet<&str> = grp
                .change_ids
                .iter()
                .map(|id| id.rsplit_once('/').map(|(d, _)| d).unwrap_or(""))
                .collect();
            dirs.len() == 1
        }));
        assert!(groups.iter().all(|grp| g.group_size(&grp.change_ids) <= 500));
    }

    #[test]
    fn topological_order_puts_dependencies_first() {
        let g = graph_of(
            vec![change("use.py", 0, 5), change("def.py", 0, 5)],
            vec![dep("use.py:hunk_0", "def.py:hunk_0", 0.8)],
        );
        let order = g.topological_order();
        let def_pos = order.iter().position(|i| i == "def.py:hunk_0").unwrap();
        let use_pos = order.iter().position(|i| i == "use.py:hunk_0").unwrap();
        assert!(def_pos < use_pos);
    }

    #[test]
    fn topological_order_breaks_cycles() {
        let g = graph_of(
            vec![change("a.py", 0, 5), change("b.py", 0, 5), change("c.py", 0, 5)],
            vec![
                dep("a.py:hunk_0", "b.py:hunk_0", 0.8),
                dep("b.py:hunk_0", "a.py:hunk_0", 0.8),
                dep("c.py:hunk_0", "a.py:hunk_0", 0.8),
            ],
        );
        let order = g.topological_order();
        assert_eq!(order.len(), 3);
    }

    #[test]
    fn separability_rules() {
        let g = graph_of(
            vec![change("a.py", 0, 5), change("b.py", 0, 5), change("c.py", 0, 5)],
            vec![
                dep("a.py:hunk_0", "b.py:hunk_0", 1.0),
                dep("c.py:hunk_0", "a.py:hunk_0", 0.5),
            ],
        );
        // Strong edge binds a and b
        assert!(!g.can_separate("a.py:hunk_0", "b.py:hunk_0"));
        // Weak one-way edge stays separable
        assert!(g.can_separate("c.py:hunk_0", "a.py:hunk_0"));
        // No relation at all
        assert!(g.can_separate("c.py:hunk_0", "b.py:hunk_0"));
    }

    #[test]
    fn statistics_shape() {
        let g = graph_of(
            vec![change("a.py", 0, 5), change("b.py", 0, 5)],
            vec![dep("a.py:hunk_0", "b.py:hunk_0", 1.0)],
        );
        let stats = g.statistics();
        assert_eq!(stats.num_nodes, 2);
        assert_eq!(stats.num_edges, 1);
        assert!(stats.is_dag);
        assert!((stats.avg_out_degree - 0.5).abs() < 1e-9);
    }

    #[test]
    fn interface_file_patterns() {
        assert!(is_interface_file("pkg/models/user.go"));
        assert!(is_interface_file("src/types/index.ts"));
        assert!(is_interface_file("api/interface.go"));
        assert!(is_interface_file("web/app.d.ts"));
        assert!(is_interface_file("pkg/result.go"));
        assert!(!is_interface_file("pkg/server/handler.go"));
    }
}
