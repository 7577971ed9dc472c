//! The dependency graph: post-order file ordering and cycle detection
//! (§4.4).

use rustc_hash::{FxHashMap, FxHashSet};
use std::path::{Path, PathBuf};

/// A cycle found while walking the dependency graph, reported as the
/// sequence of files from the entry point back to the file that closes
/// the loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cycle {
    pub path: Vec<PathBuf>,
}

#[derive(Default)]
pub struct DependencyGraph {
    edges: FxHashMap<PathBuf, Vec<PathBuf>>,
}

impl DependencyGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `from` requires `to`. Both files are added to the
    /// graph even if `to` has no outgoing edges of its own yet.
    pub fn add_edge(&mut self, from: PathBuf, to: PathBuf) {
        self.edges.entry(from).or_default().push(to.clone());
        self.edges.entry(to).or_default();
    }

    #[must_use]
    pub fn dependencies_of(&self, file: &Path) -> &[PathBuf] {
        self.edges.get(file).map_or(&[], Vec::as_slice)
    }

    /// Depth-first post-order traversal from `entry`: every file
    /// appears after all of its dependencies, which is the order the
    /// inferrer and IR builder must process files in for whole-program
    /// inference to see each file's signatures before its dependents
    /// (§4.4, §4.5). Returns the first cycle found instead of an
    /// ordering if the graph isn't a DAG.
    pub fn post_order(&self, entry: &Path) -> Result<Vec<PathBuf>, Cycle> {
        let mut order = Vec::new();
        let mut visited = FxHashSet::default();
        let mut on_stack = Vec::new();
        self.visit(entry, &mut visited, &mut on_stack, &mut order)?;
        Ok(order)
    }

    fn visit(
        &self,
        file: &Path,
        visited: &mut FxHashSet<PathBuf>,
        on_stack: &mut Vec<PathBuf>,
        order: &mut Vec<PathBuf>,
    ) -> Result<(), Cycle> {
        if visited.contains(file) {
            return Ok(());
        }
        if let Some(start) = on_stack.iter().position(|f| f == file) {
            let mut path = on_stack[start..].to_vec();
            path.push(file.to_path_buf());
            return Err(Cycle { path });
        }
        on_stack.push(file.to_path_buf());
        for dep in self.dependencies_of(file).to_vec() {
            self.visit(&dep, visited, on_stack, order)?;
        }
        on_stack.pop();
        visited.insert(file.to_path_buf());
        order.push(file.to_path_buf());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_order_places_dependencies_before_dependents() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(PathBuf::from("a.rb"), PathBuf::from("b.rb"));
        graph.add_edge(PathBuf::from("b.rb"), PathBuf::from("c.rb"));

        let order = graph.post_order(Path::new("a.rb")).unwrap();
        assert_eq!(
            order,
            vec![PathBuf::from("c.rb"), PathBuf::from("b.rb"), PathBuf::from("a.rb")]
        );
    }

    #[test]
    fn cycle_is_detected() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(PathBuf::from("a.rb"), PathBuf::from("b.rb"));
        graph.add_edge(PathBuf::from("b.rb"), PathBuf::from("a.rb"));

        let err = graph.post_order(Path::new("a.rb")).unwrap_err();
        assert_eq!(err.path.first(), Some(&PathBuf::from("a.rb")));
        assert_eq!(err.path.last(), Some(&PathBuf::from("a.rb")));
    }

    #[test]
    fn diamond_dependency_visits_each_file_once() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(PathBuf::from("a.rb"), PathBuf::from("b.rb"));
        graph.add_edge(PathBuf::from("a.rb"), PathBuf::from("c.rb"));
        graph.add_edge(PathBuf::from("b.rb"), PathBuf::from("d.rb"));
        graph.add_edge(PathBuf::from("c.rb"), PathBuf::from("d.rb"));

        let order = graph.post_order(Path::new("a.rb")).unwrap();
        assert_eq!(order.iter().filter(|f| f.as_path() == Path::new("d.rb")).count(), 1);
        assert_eq!(order.last(), Some(&PathBuf::from("a.rb")));
    }
}
