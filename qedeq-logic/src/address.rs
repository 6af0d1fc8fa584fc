//! Module addresses
//!
//! An address is an opaque, already resolved identifier such as
//! `qedeq/sample/set_theory_v1.xml`. Equality and hashing are by the full text.

use crate::error::{LogicError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

/// Canonical identifier of a module
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleAddress(Arc<str>);

impl ModuleAddress {
    pub fn new(address: impl AsRef<str>) -> Result<Self> {
        let address = address.as_ref().trim();
        if address.is_empty() {
            return Err(LogicError::invalid_address("address must not be empty"));
        }
        if address.ends_with('/') {
            return Err(LogicError::invalid_address(format!(
                "address '{address}' names a directory"
            )));
        }
        Ok(Self(Arc::from(address)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment without its extension
    pub fn name(&self) -> &str {
        let file = self.file_name();
        match file.rfind('.') {
            Some(0) | None => file,
            Some(index) => &file[..index],
        }
    }

    /// Last path segment
    pub fn file_name(&self) -> &str {
        match self.0.rfind('/') {
            Some(index) => &self.0[index + 1..],
            None => &self.0,
        }
    }

    /// Everything up to and including the last `/`
    pub fn directory(&self) -> &str {
        match self.0.rfind('/') {
            Some(index) => &self.0[..=index],
            None => "",
        }
    }

    /// Resolve a location relative to this address
    ///
    /// Absolute locations (starting with `/` or carrying a scheme) are taken
    /// as they are; `./` and `../` segments are normalized.
    pub fn resolve(&self, location: &str) -> Result<ModuleAddress> {
        let location = location.trim();
        if location.starts_with('/') || location.contains("://") {
            return ModuleAddress::new(location);
        }

        let (prefix, directory) = split_scheme(self.directory());
        let mut segments: Vec<&str> = directory.split('/').filter(|s| !s.is_empty()).collect();
        for segment in location.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    if segments.pop().is_none() {
                        return Err(LogicError::invalid_address(format!(
                            "location '{location}' leaves the root of '{}'",
                            self
                        )));
                    }
                }
                other => segments.push(other),
            }
        }

        let absolute = directory.starts_with('/');
        let mut resolved = String::from(prefix);
        if absolute {
            resolved.push('/');
        }
        resolved.push_str(&segments.join("/"));
        ModuleAddress::new(resolved)
    }
}

fn split_scheme(directory: &str) -> (&str, &str) {
    match directory.find("://") {
        Some(index) => directory.split_at(index + 3),
        None => ("", directory),
    }
}

impl fmt::Display for ModuleAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ModuleAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModuleAddress({})", self.0)
    }
}

impl Serialize for ModuleAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ModuleAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        ModuleAddress::new(text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_and_directory() {
        let address = ModuleAddress::new("qedeq/sample/logic_v1.xml").unwrap();
        assert_eq!(address.name(), "logic_v1");
        assert_eq!(address.file_name(), "logic_v1.xml");
        assert_eq!(address.directory(), "qedeq/sample/");
    }

    #[test]
    fn test_resolve_relative() {
        let address = ModuleAddress::new("qedeq/sample/logic_v1.xml").unwrap();
        assert_eq!(
            address.resolve("set_theory_v1.xml").unwrap().as_str(),
            "qedeq/sample/set_theory_v1.xml"
        );
        assert_eq!(
            address.resolve("../math/./group.xml").unwrap().as_str(),
            "qedeq/math/group.xml"
        );
        assert!(address.resolve("../../../x.xml").is_err());
    }

    #[test]
    fn test_resolve_with_scheme() {
        let address = ModuleAddress::new("http://qedeq.org/0_04/doc/math/qedeq_logic_v1.xml").unwrap();
        assert_eq!(
            address.resolve("qedeq_set_theory_v1.xml").unwrap().as_str(),
            "http://qedeq.org/0_04/doc/math/qedeq_set_theory_v1.xml"
        );
        assert_eq!(
            address.resolve("file:///tmp/a.xml").unwrap().as_str(),
            "file:///tmp/a.xml"
        );
    }

    #[test]
    fn test_invalid() {
        assert!(ModuleAddress::new("  ").is_err());
        assert!(ModuleAddress::new("dir/").is_err());
    }

    #[test]
    fn test_serde() {
        let address = ModuleAddress::new("a/b.xml").unwrap();
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, "\"a/b.xml\"");
        let back: ModuleAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, address);
    }
}
