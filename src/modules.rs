//! Module source lookup for `import`.
//!
//! The interpreter only depends on the splice contract: given a module name,
//! a loader produces source text, which is lexed into its own token vector
//! and executed to EOF before the importer's cursor resumes.

use std::collections::HashMap;
use std::fs;
use std::io;

/// Resolves a module name to its source text.
pub trait ModuleLoader {
    fn load(&self, name: &str) -> io::Result<String>;
}

/// Resolves `import NAME;` to a sibling file `NAME.choco` in the current
/// working directory.
#[derive(Debug, Default)]
pub struct FsLoader;

impl ModuleLoader for FsLoader {
    fn load(&self, name: &str) -> io::Result<String> {
        fs::read_to_string(format!("{}.choco", name))
    }
}

/// An in-memory loader, for embedding and tests.
#[derive(Debug, Default)]
pub struct MapLoader {
    modules: HashMap<String, String>,
}

impl MapLoader {
    pub fn new() -> MapLoader {
        MapLoader::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.modules.insert(name.into(), source.into());
    }
}

impl ModuleLoader for MapLoader {
    fn load(&self, name: &str) -> io::Result<String> {
        self.modules.get(name).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no module named {}", name))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_loader_serves_inserted_sources() {
        let mut loader = MapLoader::new();
        loader.insert("util", "let x = 1;");
        assert_eq!(loader.load("util").unwrap(), "let x = 1;");
        assert!(loader.load("missing").is_err());
    }
}
