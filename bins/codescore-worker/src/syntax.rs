/// Syntax Tree - structural view of a submission
///
/// The sandbox parses the submission with the graded language's own parser and
/// returns the tree flattened in pre-order: each node names its kind and the
/// index of its parent. Because the order is pre-order, a node's first child
/// (if any) sits immediately after it.
///
/// Analyses here are plain visitors over that list:
/// - node-kind census (syntax diversity)
/// - call-target shapes (logical originality)
/// - unsafe call detection (security)

use serde::Deserialize;
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SyntaxNode {
    pub kind: String,
    pub parent: Option<usize>,
    /// Identifier for `Name` nodes, attribute for `Attribute` nodes
    #[serde(default)]
    pub name: Option<String>,
}

impl SyntaxNode {
    #[cfg(test)]
    pub fn new(kind: &str, parent: Option<usize>, name: Option<&str>) -> Self {
        Self {
            kind: kind.to_string(),
            parent,
            name: name.map(str::to_string),
        }
    }

    fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }
}

#[derive(Debug, Clone)]
pub struct SyntaxTree {
    nodes: Vec<SyntaxNode>,
}

const DYNAMIC_EVALUATION: &[&str] = &["eval", "exec"];
const PROCESS_SPAWN_ATTRIBUTES: &[&str] = &[
    "Popen", "system", "popen", "spawnl", "spawnle", "spawnlp", "spawnlpe", "spawnv", "spawnve",
    "spawnvp", "spawnvpe",
];
const SUBPROCESS_HELPERS: &[&str] = &[
    "run", "call", "check_call", "check_output", "getoutput", "getstatusoutput",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsafeCall {
    DynamicEvaluation(String),
    ProcessSpawn(String),
}

impl fmt::Display for UnsafeCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnsafeCall::DynamicEvaluation(name) => write!(f, "dynamic evaluation via {}()", name),
            UnsafeCall::ProcessSpawn(name) => write!(f, "process spawn via {}()", name),
        }
    }
}

impl SyntaxTree {
    /// Build a tree from pre-order nodes. Every parent must precede its child.
    pub fn from_nodes(nodes: Vec<SyntaxNode>) -> Result<Self, String> {
        if nodes.is_empty() {
            return Err("empty syntax tree".to_string());
        }
        for (idx, node) in nodes.iter().enumerate() {
            match node.parent {
                None if idx != 0 => return Err(format!("node {} has no parent", idx)),
                Some(parent) if parent >= idx => {
                    return Err(format!("node {} points forward to parent {}", idx, parent))
                }
                _ => {}
            }
        }
        Ok(Self { nodes })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    fn first_child(&self, idx: usize) -> Option<(usize, &SyntaxNode)> {
        self.nodes
            .get(idx + 1)
            .filter(|node| node.parent == Some(idx))
            .map(|node| (idx + 1, node))
    }

    /// Distinct node kinds appearing anywhere in the tree
    pub fn node_kinds(&self) -> BTreeSet<&str> {
        self.nodes.iter().map(|node| node.kind.as_str()).collect()
    }

    /// Callee of every call expression, with its index
    fn callees(&self) -> impl Iterator<Item = (usize, &SyntaxNode)> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.is("Call"))
            .filter_map(|(idx, _)| self.first_child(idx))
    }

    /// Distinct kinds of call targets: `Name` for `f()`, `Attribute` for
    /// `obj.m()`, `Call` for `f()()`, and so on
    pub fn call_shapes(&self) -> BTreeSet<&str> {
        self.callees().map(|(_, callee)| callee.kind.as_str()).collect()
    }

    pub fn unsafe_calls(&self) -> Vec<UnsafeCall> {
        let mut found = Vec::new();
        for (idx, callee) in self.callees() {
            let Some(name) = callee.name.as_deref() else {
                continue;
            };
            if callee.is("Name") && DYNAMIC_EVALUATION.contains(&name) {
                found.push(UnsafeCall::DynamicEvaluation(name.to_string()));
            } else if callee.is("Attribute") {
                let receiver = self
                    .first_child(idx)
                    .filter(|(_, node)| node.is("Name"))
                    .and_then(|(_, node)| node.name.as_deref());
                if PROCESS_SPAWN_ATTRIBUTES.contains(&name) {
                    found.push(UnsafeCall::ProcessSpawn(qualified(receiver, name)));
                } else if receiver == Some("subprocess") && SUBPROCESS_HELPERS.contains(&name) {
                    found.push(UnsafeCall::ProcessSpawn(qualified(receiver, name)));
                }
            }
        }
        found
    }
}

fn qualified(receiver: Option<&str>, attr: &str) -> String {
    match receiver {
        Some(receiver) => format!("{}.{}", receiver, attr),
        None => attr.to_string(),
    }
}
