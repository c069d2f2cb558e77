//! The scope graph: a lexically nested symbol table with transport
//! boundaries.
//!
//! Scopes form a tree held in an arena; each scope carries a session id
//! (`local`, `ssh:server1`, ...), its variable entries, and an import set.
//! A scope created for a transport-changing decorator is *sealed*: name
//! resolution from inside stops at the seal unless the name was imported
//! into the boundary or the value's taint is agnostic (literals cross
//! freely).
//!
//! Sibling scopes never see each other's entries; resolution only ever
//! walks the parent chain.

use rustc_hash::{FxHashMap, FxHashSet};

use opal_common::Value;
use opal_registry::ValueClass;

use crate::error::ScopeError;

/// Session id of the root scope: the machine the planner runs on.
pub const SESSION_LOCAL: &str = "local";

/// Index of a scope in the graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeId(usize);

/// Where a variable's value came from.
#[derive(Debug, Clone, PartialEq)]
pub enum Origin {
    /// A literal or a pure expression over literals.
    Literal,
    /// A value decorator invocation, by dotted path.
    Decorator(String),
}

/// Transport sensitivity of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Taint {
    /// Crosses any boundary (literals).
    Agnostic,
    /// Resolved in its defining session; crossing a sealed boundary
    /// requires an import.
    LocalOnly,
    /// Never crosses a sealed boundary, import or not.
    Sealed,
}

/// A variable entry in a scope.
#[derive(Debug, Clone, PartialEq)]
pub struct VarEntry {
    pub origin: Origin,
    pub value: Value,
    pub class: ValueClass,
    pub taint: Taint,
}

struct Scope {
    parent: Option<ScopeId>,
    children: Vec<ScopeId>,
    session_id: String,
    transport_boundary: bool,
    sealed: bool,
    entries: FxHashMap<String, VarEntry>,
    imports: FxHashSet<String>,
}

/// A successful resolution: the entry, where it lives, and whether the
/// walk crossed any sealed boundary (imported crossings included). The
/// planner uses the crossing flag to refuse binding secrets remotely.
#[derive(Debug)]
pub struct Resolution<'a> {
    pub entry: &'a VarEntry,
    pub scope: ScopeId,
    pub crossed_sealed: bool,
}

/// Lexically nested symbol table with transport-boundary sealing.
pub struct ScopeGraph {
    arena: Vec<Scope>,
    current: ScopeId,
}

impl ScopeGraph {
    /// A graph with a single root scope for the given session (the root is
    /// never exitable).
    pub fn new(session_id: impl Into<String>) -> Self {
        let root = Scope {
            parent: None,
            children: Vec::new(),
            session_id: session_id.into(),
            transport_boundary: false,
            sealed: false,
            entries: FxHashMap::default(),
            imports: FxHashSet::default(),
        };
        Self {
            arena: vec![root],
            current: ScopeId(0),
        }
    }

    /// Session id of the current scope.
    pub fn current_session(&self) -> &str {
        &self.arena[self.current.0].session_id
    }

    /// Session id of an arbitrary scope.
    pub fn session_of(&self, id: ScopeId) -> &str {
        &self.arena[id.0].session_id
    }

    /// Insert an entry into the current scope.
    pub fn store(
        &mut self,
        name: impl Into<String>,
        origin: Origin,
        value: Value,
        class: ValueClass,
        taint: Taint,
    ) {
        self.arena[self.current.0].entries.insert(
            name.into(),
            VarEntry {
                origin,
                value,
                class,
                taint,
            },
        );
    }

    /// Push a new child scope. A transport boundary is sealed by default.
    pub fn enter(&mut self, session_id: impl Into<String>, transport_boundary: bool) -> ScopeId {
        let id = ScopeId(self.arena.len());
        self.arena.push(Scope {
            parent: Some(self.current),
            children: Vec::new(),
            session_id: session_id.into(),
            transport_boundary,
            sealed: transport_boundary,
            entries: FxHashMap::default(),
            imports: FxHashSet::default(),
        });
        self.arena[self.current.0].children.push(id);
        self.current = id;
        id
    }

    /// Pop the current scope. The root scope is never exitable.
    pub fn exit(&mut self) -> Result<(), ScopeError> {
        match self.arena[self.current.0].parent {
            Some(parent) => {
                self.current = parent;
                Ok(())
            }
            None => Err(ScopeError::ExitRoot),
        }
    }

    /// Permit `name` to cross the nearest enclosing sealed boundary.
    ///
    /// Import allows *resolution* only; the planner separately refuses to
    /// bind secret-classed entries into remote invocations.
    pub fn import(&mut self, name: impl Into<String>) {
        let mut id = self.current;
        loop {
            if self.arena[id.0].sealed {
                self.arena[id.0].imports.insert(name.into());
                return;
            }
            match self.arena[id.0].parent {
                Some(parent) => id = parent,
                None => {
                    // No sealed boundary above: importing at the root is a
                    // no-op but harmless.
                    self.arena[id.0].imports.insert(name.into());
                    return;
                }
            }
        }
    }

    /// Resolve a name, walking the parent chain.
    ///
    /// Crossing a sealed boundary (walking out of a sealed scope) fails for
    /// non-agnostic values unless the name was imported into that boundary.
    /// A `LocalOnly` value crossing unimported is [`ScopeError::CrossSessionLeakage`];
    /// a `Sealed` value never crosses.
    pub fn resolve(&self, name: &str) -> Result<Resolution<'_>, ScopeError> {
        let start_session = self.current_session().to_string();
        let mut id = self.current;
        let mut crossed_sealed = false;
        let mut unimported_boundary: Option<ScopeId> = None;

        loop {
            let scope = &self.arena[id.0];
            if let Some(entry) = scope.entries.get(name) {
                if entry.taint == Taint::Agnostic {
                    return Ok(Resolution {
                        entry,
                        scope: id,
                        crossed_sealed,
                    });
                }
                if let Some(boundary) = unimported_boundary {
                    let boundary_scope = &self.arena[boundary.0];
                    let parent_session = boundary_scope
                        .parent
                        .map(|p| self.arena[p.0].session_id.clone())
                        .unwrap_or_default();
                    return Err(match entry.taint {
                        Taint::LocalOnly => ScopeError::CrossSessionLeakage {
                            name: name.to_string(),
                            source_session: scope.session_id.clone(),
                            target_session: start_session,
                        },
                        _ => ScopeError::TransportBoundary {
                            name: name.to_string(),
                            parent_session,
                            current_session: start_session,
                        },
                    });
                }
                if crossed_sealed && entry.taint == Taint::Sealed {
                    return Err(ScopeError::CrossSessionLeakage {
                        name: name.to_string(),
                        source_session: scope.session_id.clone(),
                        target_session: start_session,
                    });
                }
                return Ok(Resolution {
                    entry,
                    scope: id,
                    crossed_sealed,
                });
            }

            // Walking out of a sealed scope crosses its boundary.
            if scope.sealed {
                crossed_sealed = true;
                if !scope.imports.contains(name) && unimported_boundary.is_none() {
                    unimported_boundary = Some(id);
                }
            }

            match scope.parent {
                Some(parent) => id = parent,
                None => {
                    return Err(ScopeError::NotFound {
                        name: name.to_string(),
                    })
                }
            }
        }
    }

    /// Metadata lookup with the same traversal rules as [`Self::resolve`].
    pub fn get_entry(&self, name: &str) -> Result<&VarEntry, ScopeError> {
        self.resolve(name).map(|r| r.entry)
    }

    /// Overwrite the value of an existing entry in its defining scope.
    ///
    /// Used by assignment operators; resolution rules apply to the lookup.
    pub fn update(&mut self, name: &str, value: Value) -> Result<(), ScopeError> {
        self.update_entry(name, |entry| entry.value = value)
    }

    /// Mutate an existing entry in its defining scope. The planner uses
    /// this to merge class/taint when assignment operators mix values.
    pub fn update_entry(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut VarEntry),
    ) -> Result<(), ScopeError> {
        let scope = self.resolve(name)?.scope;
        let entry = self.arena[scope.0]
            .entries
            .get_mut(name)
            .expect("resolve found the entry in this scope");
        f(entry);
        Ok(())
    }

    /// Session ids from the root down to the current scope.
    pub fn scope_path(&self) -> Vec<&str> {
        let mut path = Vec::new();
        let mut id = Some(self.current);
        while let Some(scope_id) = id {
            let scope = &self.arena[scope_id.0];
            path.push(scope.session_id.as_str());
            id = scope.parent;
        }
        path.reverse();
        path
    }

    /// Number of transport boundaries between the current scope and the root.
    pub fn transport_depth(&self) -> usize {
        let mut depth = 0;
        let mut id = Some(self.current);
        while let Some(scope_id) = id {
            let scope = &self.arena[scope_id.0];
            if scope.transport_boundary {
                depth += 1;
            }
            id = scope.parent;
        }
        depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agnostic(value: i64) -> (Origin, Value, ValueClass, Taint) {
        (Origin::Literal, Value::Int(value), ValueClass::Data, Taint::Agnostic)
    }

    fn local_only(value: &str) -> (Origin, Value, ValueClass, Taint) {
        (
            Origin::Decorator("env".into()),
            Value::String(value.into()),
            ValueClass::Config,
            Taint::LocalOnly,
        )
    }

    fn store(graph: &mut ScopeGraph, name: &str, v: (Origin, Value, ValueClass, Taint)) {
        graph.store(name, v.0, v.1, v.2, v.3);
    }

    #[test]
    fn lookup_walks_parent_chain() {
        let mut graph = ScopeGraph::new("local");
        store(&mut graph, "X", agnostic(1));
        graph.enter("local", false);
        let r = graph.resolve("X").unwrap();
        assert_eq!(r.entry.value, Value::Int(1));
        assert!(!r.crossed_sealed);
    }

    #[test]
    fn missing_name_is_not_found() {
        let graph = ScopeGraph::new("local");
        assert!(matches!(
            graph.resolve("NOPE"),
            Err(ScopeError::NotFound { .. })
        ));
    }

    #[test]
    fn shadowing_resolves_innermost() {
        let mut graph = ScopeGraph::new("local");
        store(&mut graph, "X", agnostic(1));
        graph.enter("local", false);
        store(&mut graph, "X", agnostic(2));
        assert_eq!(graph.resolve("X").unwrap().entry.value, Value::Int(2));
        graph.exit().unwrap();
        assert_eq!(graph.resolve("X").unwrap().entry.value, Value::Int(1));
    }

    #[test]
    fn exit_at_root_errors() {
        let mut graph = ScopeGraph::new("local");
        assert!(matches!(graph.exit(), Err(ScopeError::ExitRoot)));
    }

    #[test]
    fn literals_cross_sealed_boundaries() {
        let mut graph = ScopeGraph::new("local");
        store(&mut graph, "N", agnostic(3));
        graph.enter("ssh:web1", true);
        assert_eq!(graph.resolve("N").unwrap().entry.value, Value::Int(3));
    }

    #[test]
    fn local_only_values_leak_across_sealed_boundaries() {
        let mut graph = ScopeGraph::new("local");
        store(&mut graph, "HOME", local_only("/home/dev"));
        graph.enter("ssh:server1", true);
        match graph.resolve("HOME") {
            Err(ScopeError::CrossSessionLeakage {
                name,
                source_session,
                target_session,
            }) => {
                assert_eq!(name, "HOME");
                assert_eq!(source_session, "local");
                assert_eq!(target_session, "ssh:server1");
            }
            other => panic!("expected CrossSessionLeakage, got {other:?}"),
        }
    }

    #[test]
    fn import_permits_crossing() {
        let mut graph = ScopeGraph::new("local");
        store(&mut graph, "HOME", local_only("/home/dev"));
        graph.enter("ssh:server1", true);
        graph.import("HOME");
        let r = graph.resolve("HOME").unwrap();
        assert!(r.crossed_sealed);
        assert_eq!(r.entry.value, Value::String("/home/dev".into()));
    }

    #[test]
    fn sealed_taint_never_crosses_even_imported() {
        let mut graph = ScopeGraph::new("local");
        graph.store(
            "TOKEN",
            Origin::Decorator("file.read".into()),
            Value::String("hush".into()),
            ValueClass::Secret,
            Taint::Sealed,
        );
        graph.enter("ssh:server1", true);
        graph.import("TOKEN");
        assert!(matches!(
            graph.resolve("TOKEN"),
            Err(ScopeError::CrossSessionLeakage { .. })
        ));
    }

    #[test]
    fn non_sealed_scopes_do_not_block() {
        let mut graph = ScopeGraph::new("local");
        store(&mut graph, "HOME", local_only("/home/dev"));
        graph.enter("local", false); // e.g. a @retry block
        assert!(graph.resolve("HOME").is_ok());
    }

    #[test]
    fn siblings_are_invisible() {
        let mut graph = ScopeGraph::new("local");
        graph.enter("local", false);
        store(&mut graph, "A", agnostic(1));
        graph.exit().unwrap();
        graph.enter("local", false);
        assert!(matches!(
            graph.resolve("A"),
            Err(ScopeError::NotFound { .. })
        ));
    }

    #[test]
    fn scope_path_and_transport_depth() {
        let mut graph = ScopeGraph::new("local");
        graph.enter("ssh:web1", true);
        graph.enter("ssh:web1", false); // e.g. a @retry block inside ssh
        assert_eq!(graph.scope_path(), vec!["local", "ssh:web1", "ssh:web1"]);
        assert_eq!(graph.transport_depth(), 1);
    }

    #[test]
    fn update_mutates_defining_scope() {
        let mut graph = ScopeGraph::new("local");
        store(&mut graph, "N", agnostic(1));
        graph.enter("local", false);
        graph.update("N", Value::Int(5)).unwrap();
        graph.exit().unwrap();
        assert_eq!(graph.resolve("N").unwrap().entry.value, Value::Int(5));
    }
}
