//! Field masks and their application
//!
//! A [`FieldMask`] is the flat set of paths that survive masking. Each path
//! is either kept whole ([`MaskEntry::Keep`]) or is a container whose own
//! children are filtered ([`MaskEntry::Descend`]). The root path is always
//! `Descend`. Anything not reachable through the mask is removed, so a
//! denied field is absent from the output, never nulled.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};

/// One step of a path into a document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

/// Location of a value inside a document
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath(Vec<PathSegment>);

impl FieldPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Field(name.to_string()));
        Self(segments)
    }

    pub fn index(&self, index: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Index(index));
        Self(segments)
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// RFC 6901 JSON pointer, for `Value::pointer`
    pub fn to_pointer(&self) -> String {
        let mut pointer = String::new();
        for segment in &self.0 {
            pointer.push('/');
            match segment {
                PathSegment::Field(name) => {
                    pointer.push_str(&name.replace('~', "~0").replace('/', "~1"))
                }
                PathSegment::Index(i) => pointer.push_str(&i.to_string()),
            }
        }
        pointer
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("$");
        }
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            match segment {
                PathSegment::Field(name) => f.write_str(name)?,
                PathSegment::Index(idx) => write!(f, "{}", idx)?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskEntry {
    /// The value at this path survives as-is
    Keep,
    /// The container survives; its children are filtered by the mask
    Descend,
}

/// The set of surviving paths for one document and action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMask {
    entries: BTreeMap<FieldPath, MaskEntry>,
}

impl Default for FieldMask {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldMask {
    /// A mask that keeps an empty root object
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(FieldPath::root(), MaskEntry::Descend);
        Self { entries }
    }

    pub fn insert(&mut self, path: FieldPath, entry: MaskEntry) {
        self.entries.insert(path, entry);
    }

    pub fn get(&self, path: &FieldPath) -> Option<MaskEntry> {
        self.entries.get(path).copied()
    }

    /// Whether the value at `path` survives (whole or filtered)
    pub fn allows(&self, path: &FieldPath) -> bool {
        self.entries.contains_key(path)
    }

    /// Top-level fields that survive, in name order
    pub fn top_level_fields(&self) -> Vec<String> {
        self.entries
            .keys()
            .filter_map(|path| match path.segments() {
                [PathSegment::Field(name)] => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    /// Prune a copy of `document` to the mask
    pub fn apply(&self, document: &Value) -> Value {
        let mut output = match document {
            Value::Object(_) => document.clone(),
            _ => return Value::Object(Map::new()),
        };

        // Deepest paths first: pruning an array shifts the indices below it
        for (path, entry) in self.entries.iter().rev() {
            if *entry != MaskEntry::Descend {
                continue;
            }
            let Some(container) = output.pointer_mut(&path.to_pointer()) else {
                continue;
            };
            match container {
                Value::Object(map) => map.retain(|key, _| self.allows(&path.child(key))),
                Value::Array(items) => {
                    let mut index = 0;
                    items.retain(|_| {
                        let keep = self.allows(&path.index(index));
                        index += 1;
                        keep
                    });
                }
                _ => {}
            }
        }
        output
    }

    /// Paths present in `document` that masking removes, outermost only
    pub fn dropped_paths(&self, document: &Value) -> Vec<FieldPath> {
        if !document.is_object() {
            return Vec::new();
        }

        let mut dropped = Vec::new();
        for (path, entry) in &self.entries {
            if *entry != MaskEntry::Descend {
                continue;
            }
            match document.pointer(&path.to_pointer()) {
                Some(Value::Object(map)) => dropped.extend(
                    map.keys()
                        .map(|key| path.child(key))
                        .filter(|child| !self.allows(child)),
                ),
                Some(Value::Array(items)) => dropped.extend(
                    (0..items.len())
                        .map(|i| path.index(i))
                        .filter(|child| !self.allows(child)),
                ),
                _ => {}
            }
        }
        dropped
    }
}

/// Prune `document` to `mask`
pub fn apply_mask(document: &Value, mask: &FieldMask) -> Value {
    mask.apply(document)
}
