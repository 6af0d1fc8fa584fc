//! Locations inside modules
//!
//! A [`ModuleContext`] names a module and a path into its document, for
//! example `chapter[0]/section[2]/node[1]/formula/element[1]`. Diagnostics
//! carry one so that downstream tools can point at the offending node.

use crate::address::ModuleAddress;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One step of a location path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathSegment {
    Header,
    Import(usize),
    Chapter(usize),
    Section(usize),
    Node(usize),
    Field(String),
    Element(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Header => f.write_str("header"),
            PathSegment::Import(index) => write!(f, "import[{index}]"),
            PathSegment::Chapter(index) => write!(f, "chapter[{index}]"),
            PathSegment::Section(index) => write!(f, "section[{index}]"),
            PathSegment::Node(index) => write!(f, "node[{index}]"),
            PathSegment::Field(name) => f.write_str(name),
            PathSegment::Element(index) => write!(f, "element[{index}]"),
        }
    }
}

/// Path from the document root to some part of it
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocationPath {
    segments: Vec<PathSegment>,
}

impl LocationPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn push(&mut self, segment: PathSegment) {
        self.segments.push(segment);
    }

    pub fn pop(&mut self) -> Option<PathSegment> {
        self.segments.pop()
    }

    pub fn child(&self, segment: PathSegment) -> Self {
        let mut path = self.clone();
        path.push(segment);
        path
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn starts_with(&self, prefix: &LocationPath) -> bool {
        self.segments.starts_with(&prefix.segments)
    }
}

impl fmt::Display for LocationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

/// Module plus location inside it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleContext {
    pub address: ModuleAddress,
    pub location: LocationPath,
}

impl ModuleContext {
    pub fn new(address: ModuleAddress) -> Self {
        Self {
            address,
            location: LocationPath::root(),
        }
    }

    pub fn at(address: ModuleAddress, location: LocationPath) -> Self {
        Self { address, location }
    }

    pub fn child(&self, segment: PathSegment) -> Self {
        Self {
            address: self.address.clone(),
            location: self.location.child(segment),
        }
    }

    pub fn push(&mut self, segment: PathSegment) {
        self.location.push(segment);
    }

    pub fn pop(&mut self) -> Option<PathSegment> {
        self.location.pop()
    }
}

impl fmt::Display for ModuleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.location.is_empty() {
            write!(f, "{}", self.address)
        } else {
            write!(f, "{}#{}", self.address, self.location)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let address = ModuleAddress::new("m/a.xml").unwrap();
        let context = ModuleContext::new(address)
            .child(PathSegment::Chapter(0))
            .child(PathSegment::Section(2))
            .child(PathSegment::Node(1))
            .child(PathSegment::Field("formula".into()))
            .child(PathSegment::Element(1));
        assert_eq!(
            context.to_string(),
            "m/a.xml#chapter[0]/section[2]/node[1]/formula/element[1]"
        );
    }

    #[test]
    fn test_push_pop() {
        let mut context = ModuleContext::new(ModuleAddress::new("m/a.xml").unwrap());
        context.push(PathSegment::Header);
        context.push(PathSegment::Import(3));
        assert_eq!(context.location.to_string(), "header/import[3]");
        assert_eq!(context.pop(), Some(PathSegment::Import(3)));
        assert!(context.location.starts_with(&LocationPath::root().child(PathSegment::Header)));
        assert_eq!(context.to_string(), "m/a.xml#header");
    }
}
