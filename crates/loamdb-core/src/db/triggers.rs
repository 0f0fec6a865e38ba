use crate::{
    error::Error,
    registry::Model,
    schema::FieldStorage,
    value::FieldKind,
};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

///
/// FieldNode
///
/// One `(entity, field)` node of the dependency graph.
///

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct FieldNode {
    pub model: String,
    pub field: String,
}

impl FieldNode {
    #[must_use]
    pub fn new(model: &str, field: &str) -> Self {
        Self {
            model: model.to_string(),
            field: field.to_string(),
        }
    }
}

///
/// Hop
///
/// How to navigate from records whose source field changed to the records
/// whose target field is impacted.
///

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum Hop {
    /// Read the named many2one on the changed records; its values are the
    /// impacted ids. Used to reverse a one2many segment.
    ReadField { model: String, field: String },
    /// Impacted records are those of `model` whose relational `field`
    /// references any changed id. Used to reverse many2one/many2many
    /// segments.
    SearchReferrers { model: String, field: String },
}

///
/// Edge
///
/// "When source changes, target must be recomputed/invalidated", with the
/// hop chain locating the impacted records, applied in order starting from
/// the changed ones.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Edge {
    pub source: FieldNode,
    pub target: FieldNode,
    pub hops: Vec<Hop>,
}

///
/// DependencyGraph
///
/// Static graph over `(entity, field)` nodes, built once at registry build
/// from `depends` paths, related aliases, and delegation. Cycles are
/// permitted; trigger-tree construction never re-enters a node already on
/// the current path, so every tree is finite.
///

#[derive(Debug, Default)]
pub struct DependencyGraph {
    by_source: BTreeMap<(String, String), Vec<Edge>>,
}

impl DependencyGraph {
    /// Build the graph from the compiled models.
    pub fn build(models: &BTreeMap<String, Rc<Model>>) -> Result<Self, Error> {
        let mut graph = Self::default();
        for model in models.values() {
            for field in model.fields() {
                let target = FieldNode::new(&model.name, &field.name);
                let paths: Vec<String> = match &field.storage {
                    FieldStorage::Computed { depends, .. } => depends.clone(),
                    FieldStorage::Related { path } => vec![path.clone()],
                    FieldStorage::Stored => continue,
                };
                for path in &paths {
                    graph.add_path(models, model, &target, path)?;
                }
            }
        }
        Ok(graph)
    }

    fn add_path(
        &mut self,
        models: &BTreeMap<String, Rc<Model>>,
        origin: &Rc<Model>,
        target: &FieldNode,
        path: &str,
    ) -> Result<(), Error> {
        let mut cur = origin.clone();
        let mut hops: Vec<Hop> = Vec::new();
        let segments: Vec<&str> = path.split('.').collect();

        for (i, segment) in segments.iter().enumerate() {
            let field = cur.field(segment).map_err(|_| {
                Error::registry(format!(
                    "dependency path '{path}' of {}.{}: unknown field '{segment}' on '{}'",
                    target.model, target.field, cur.name
                ))
            })?;

            self.add_edge(Edge {
                source: FieldNode::new(&cur.name, segment),
                target: target.clone(),
                hops: hops.clone(),
            });

            if i + 1 == segments.len() {
                break;
            }

            // Reverse hop for the segment, prepended so chains resolve
            // innermost-first.
            let (comodel, hop) = match &field.kind {
                FieldKind::Many2one { comodel } => (
                    comodel.clone(),
                    Hop::SearchReferrers {
                        model: cur.name.clone(),
                        field: (*segment).to_string(),
                    },
                ),
                FieldKind::One2many { comodel, inverse } => (
                    comodel.clone(),
                    Hop::ReadField {
                        model: comodel.clone(),
                        field: inverse.clone(),
                    },
                ),
                FieldKind::Many2many { comodel, .. } => (
                    comodel.clone(),
                    Hop::SearchReferrers {
                        model: cur.name.clone(),
                        field: (*segment).to_string(),
                    },
                ),
                _ => {
                    return Err(Error::registry(format!(
                        "dependency path '{path}' of {}.{} traverses non-relational field '{segment}'",
                        target.model, target.field
                    )));
                }
            };
            hops.insert(0, hop);
            cur = models.get(&comodel).cloned().ok_or_else(|| {
                Error::registry(format!(
                    "dependency path '{path}' of {}.{}: unknown entity '{comodel}'",
                    target.model, target.field
                ))
            })?;
        }
        Ok(())
    }

    fn add_edge(&mut self, edge: Edge) {
        let key = (edge.source.model.clone(), edge.source.field.clone());
        let edges = self.by_source.entry(key).or_default();
        if !edges.contains(&edge) {
            edges.push(edge);
        }
    }

    #[must_use]
    pub fn edges_from(&self, model: &str, field: &str) -> &[Edge] {
        self.by_source
            .get(&(model.to_string(), field.to_string()))
            .map_or(&[], Vec::as_slice)
    }

    /// All `(entity, field)` nodes downstream of the seeds.
    #[must_use]
    pub fn transitive_closure(&self, seeds: &[FieldNode]) -> BTreeSet<FieldNode> {
        let mut out = BTreeSet::new();
        let mut stack: Vec<FieldNode> = seeds.to_vec();
        while let Some(node) = stack.pop() {
            for edge in self.edges_from(&node.model, &node.field) {
                if out.insert(edge.target.clone()) {
                    stack.push(edge.target.clone());
                }
            }
        }
        out
    }

    /// Build the trigger tree for a seed set: the root carries the fields
    /// directly impacted on the changed records themselves, children are
    /// keyed by the relational hop needed to find further impacted records.
    #[must_use]
    pub fn trigger_tree(&self, seeds: &[FieldNode]) -> TriggerTree {
        let mut tree = TriggerTree::default();
        let mut on_path = BTreeSet::new();
        for seed in seeds {
            self.expand_into(seed, &mut tree, &mut on_path);
        }
        tree
    }

    fn expand_into(
        &self,
        node: &FieldNode,
        tree: &mut TriggerTree,
        on_path: &mut BTreeSet<FieldNode>,
    ) {
        if !on_path.insert(node.clone()) {
            return;
        }
        for edge in self.edges_from(&node.model, &node.field) {
            let subtree = tree.descend(&edge.hops);
            if !subtree.fields.contains(&edge.target) {
                subtree.fields.push(edge.target.clone());
            }
            self.expand_into(&edge.target, subtree, on_path);
        }
        on_path.remove(node);
    }
}

///
/// TriggerTree
///

#[derive(Clone, Debug, Default)]
pub struct TriggerTree {
    /// Impacted fields at this level, in insertion order.
    pub fields: Vec<FieldNode>,
    pub children: Vec<(Hop, TriggerTree)>,
}

impl TriggerTree {
    /// Walk (creating as needed) the child chain for a hop sequence.
    fn descend(&mut self, hops: &[Hop]) -> &mut Self {
        let mut cur = self;
        for hop in hops {
            let pos = match cur.children.iter().position(|(h, _)| h == hop) {
                Some(pos) => pos,
                None => {
                    cur.children.push((hop.clone(), Self::default()));
                    cur.children.len() - 1
                }
            };
            cur = &mut cur.children[pos].1;
        }
        cur
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.children.is_empty()
    }

    /// Total number of field entries, tree-wide.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
            + self
                .children
                .iter()
                .map(|(_, t)| t.len())
                .sum::<usize>()
    }
}
