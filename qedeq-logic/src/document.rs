//! Module document AST
//!
//! A document has a header with its imports and a body of chapters,
//! sections and nodes. Nodes carry the formulas and terms the checker looks
//! at; their order matters because a constant may only be used after it was
//! defined.

use crate::context::{LocationPath, PathSegment};
use crate::element::LogicElement;
use serde::{Deserialize, Serialize};

/// Import declaration in a module header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSpec {
    /// Label under which the imported module is referenced
    pub label: String,
    /// Location of the imported module, usually relative to the importer
    pub location: String,
}

impl ImportSpec {
    pub fn new(label: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            location: location.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Header {
    pub title: String,
    pub imports: Vec<ImportSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModuleDocument {
    pub header: Header,
    pub chapters: Vec<Chapter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    pub sections: Vec<Section>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Axiom {
        formula: LogicElement,
    },
    /// Predicate constant introduced without a defining formula
    InitialPredicateDefinition {
        name: String,
        arity: usize,
        variables: Vec<LogicElement>,
    },
    PredicateDefinition {
        name: String,
        arity: usize,
        variables: Vec<LogicElement>,
        formula: LogicElement,
    },
    /// Function constant introduced without a defining term
    InitialFunctionDefinition {
        name: String,
        arity: usize,
        variables: Vec<LogicElement>,
    },
    FunctionDefinition {
        name: String,
        arity: usize,
        variables: Vec<LogicElement>,
        term: LogicElement,
    },
    Proposition {
        formula: LogicElement,
    },
    Rule {
        name: String,
    },
}

impl NodeKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            NodeKind::Axiom { .. } => "axiom",
            NodeKind::InitialPredicateDefinition { .. } => "initial predicate definition",
            NodeKind::PredicateDefinition { .. } => "predicate definition",
            NodeKind::InitialFunctionDefinition { .. } => "initial function definition",
            NodeKind::FunctionDefinition { .. } => "function definition",
            NodeKind::Proposition { .. } => "proposition",
            NodeKind::Rule { .. } => "rule",
        }
    }
}

/// Node together with its position in the document
#[derive(Debug, Clone, Copy)]
pub struct NodeRef<'a> {
    pub chapter: usize,
    pub section: usize,
    pub index: usize,
    pub node: &'a Node,
}

impl NodeRef<'_> {
    pub fn location(&self) -> LocationPath {
        LocationPath::root()
            .child(PathSegment::Chapter(self.chapter))
            .child(PathSegment::Section(self.section))
            .child(PathSegment::Node(self.index))
    }
}

impl ModuleDocument {
    pub fn imports(&self) -> &[ImportSpec] {
        &self.header.imports
    }

    /// All nodes in document order
    pub fn nodes(&self) -> impl Iterator<Item = NodeRef<'_>> {
        self.chapters.iter().enumerate().flat_map(|(c, chapter)| {
            chapter.sections.iter().enumerate().flat_map(move |(s, section)| {
                section.nodes.iter().enumerate().map(move |(n, node)| NodeRef {
                    chapter: c,
                    section: s,
                    index: n,
                    node,
                })
            })
        })
    }

    pub fn node_count(&self) -> usize {
        self.chapters
            .iter()
            .flat_map(|chapter| chapter.sections.iter())
            .map(|section| section.nodes.len())
            .sum()
    }

    pub fn find_node(&self, id: &str) -> Option<NodeRef<'_>> {
        self.nodes().find(|node| node.node.id == id)
    }
}

/// Fluent construction of documents
#[derive(Debug, Default)]
pub struct DocumentBuilder {
    document: ModuleDocument,
}

impl DocumentBuilder {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            document: ModuleDocument {
                header: Header {
                    title: title.into(),
                    imports: Vec::new(),
                },
                chapters: Vec::new(),
            },
        }
    }

    pub fn import(mut self, label: impl Into<String>, location: impl Into<String>) -> Self {
        self.document.header.imports.push(ImportSpec::new(label, location));
        self
    }

    pub fn chapter(mut self, title: impl Into<String>) -> Self {
        self.document.chapters.push(Chapter {
            title: title.into(),
            sections: Vec::new(),
        });
        self
    }

    pub fn section(mut self, title: impl Into<String>) -> Self {
        if self.document.chapters.is_empty() {
            self = self.chapter("");
        }
        if let Some(chapter) = self.document.chapters.last_mut() {
            chapter.sections.push(Section {
                title: title.into(),
                nodes: Vec::new(),
            });
        }
        self
    }

    /// Append a node to the last section, opening one if needed
    pub fn node(mut self, id: impl Into<String>, kind: NodeKind) -> Self {
        let needs_section = self
            .document
            .chapters
            .last()
            .map_or(true, |chapter| chapter.sections.is_empty());
        if needs_section {
            self = self.section("");
        }
        if let Some(section) = self
            .document
            .chapters
            .last_mut()
            .and_then(|chapter| chapter.sections.last_mut())
        {
            section.nodes.push(Node {
                id: id.into(),
                kind,
            });
        }
        self
    }

    pub fn axiom(self, id: impl Into<String>, formula: LogicElement) -> Self {
        self.node(id, NodeKind::Axiom { formula })
    }

    pub fn proposition(self, id: impl Into<String>, formula: LogicElement) -> Self {
        self.node(id, NodeKind::Proposition { formula })
    }

    pub fn initial_predicate(self, id: impl Into<String>, name: &str, arity: usize) -> Self {
        self.node(
            id,
            NodeKind::InitialPredicateDefinition {
                name: name.to_string(),
                arity,
                variables: argument_variables(arity),
            },
        )
    }

    pub fn predicate_definition(
        self,
        id: impl Into<String>,
        name: &str,
        variables: Vec<LogicElement>,
        formula: LogicElement,
    ) -> Self {
        self.node(
            id,
            NodeKind::PredicateDefinition {
                name: name.to_string(),
                arity: variables.len(),
                variables,
                formula,
            },
        )
    }

    pub fn initial_function(self, id: impl Into<String>, name: &str, arity: usize) -> Self {
        self.node(
            id,
            NodeKind::InitialFunctionDefinition {
                name: name.to_string(),
                arity,
                variables: argument_variables(arity),
            },
        )
    }

    pub fn function_definition(
        self,
        id: impl Into<String>,
        name: &str,
        variables: Vec<LogicElement>,
        term: LogicElement,
    ) -> Self {
        self.node(
            id,
            NodeKind::FunctionDefinition {
                name: name.to_string(),
                arity: variables.len(),
                variables,
                term,
            },
        )
    }

    pub fn build(self) -> ModuleDocument {
        self.document
    }
}

/// `x1 .. xn` as subject variables
fn argument_variables(arity: usize) -> Vec<LogicElement> {
    (1..=arity)
        .map(|i| LogicElement::subject_variable(&format!("x{i}")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_node_order() {
        let document = DocumentBuilder::new("Logic")
            .import("base", "base.xml")
            .chapter("Basics")
            .initial_predicate("def_in", "in", 2)
            .axiom("ax1", LogicElement::predicate_variable("A", vec![]))
            .section("More")
            .proposition("prop1", LogicElement::predicate_variable("B", vec![]))
            .build();

        assert_eq!(document.imports().len(), 1);
        assert_eq!(document.node_count(), 3);
        let ids: Vec<_> = document.nodes().map(|node| node.node.id.clone()).collect();
        assert_eq!(ids, vec!["def_in", "ax1", "prop1"]);

        let prop = document.find_node("prop1").unwrap();
        assert_eq!(prop.location().to_string(), "chapter[0]/section[1]/node[0]");
    }

    #[test]
    fn test_node_without_chapter() {
        let document = DocumentBuilder::new("Empty")
            .axiom("ax", LogicElement::predicate_variable("A", vec![]))
            .build();
        assert_eq!(document.chapters.len(), 1);
        assert_eq!(document.node_count(), 1);
        assert_eq!(document.find_node("ax").unwrap().node.kind.kind_name(), "axiom");
    }
}
