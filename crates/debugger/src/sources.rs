//! Source identity bookkeeping: which interpreter window currently shows
//! which source, and breakpoints waiting for a source to appear.
use std::collections::HashMap;

use protocol::Token;

use crate::types::SourceReference;

/// Bidirectional `token <-> sourceRef` map, with a permanent `path -> sourceRef`
/// index.
///
/// A path keeps its `sourceRef` for the life of the adapter, so reopening it
/// yields the same reference. At most one token is bound to a path at a time.
#[derive(Debug)]
pub(crate) struct SourceBindings {
    next_ref: SourceReference,
    by_path: HashMap<String, SourceReference>,
    paths: HashMap<SourceReference, String>,
    token_by_ref: HashMap<SourceReference, Token>,
    ref_by_token: HashMap<Token, SourceReference>,
}

impl Default for SourceBindings {
    fn default() -> Self {
        Self {
            // DAP treats 0 as "no reference"
            next_ref: 1,
            by_path: HashMap::new(),
            paths: HashMap::new(),
            token_by_ref: HashMap::new(),
            ref_by_token: HashMap::new(),
        }
    }
}

impl SourceBindings {
    /// Bind `token` to `path`, returning the path's reference.
    pub(crate) fn bind(&mut self, token: Token, path: &str) -> SourceReference {
        let source_ref = match self.by_path.get(path) {
            Some(r) => *r,
            None => {
                let r = self.next_ref;
                self.next_ref += 1;
                self.by_path.insert(path.to_string(), r);
                self.paths.insert(r, path.to_string());
                r
            }
        };

        if let Some(previous) = self.ref_by_token.get(&token).copied()
            && previous != source_ref
        {
            tracing::debug!(token, previous, source_ref, "window now shows a different source");
            self.token_by_ref.remove(&previous);
        }

        if let Some(old_token) = self.token_by_ref.insert(source_ref, token)
            && old_token != token
        {
            tracing::debug!(old_token, token, %path, "source rebound to a new window");
            self.ref_by_token.remove(&old_token);
        }
        self.ref_by_token.insert(token, source_ref);
        source_ref
    }

    /// Forget the binding for `token`. The path keeps its reference.
    pub(crate) fn unbind(&mut self, token: Token) {
        if let Some(r) = self.ref_by_token.remove(&token)
            && self.token_by_ref.get(&r) == Some(&token)
        {
            self.token_by_ref.remove(&r);
        }
    }

    pub(crate) fn source_ref(&self, token: Token) -> Option<SourceReference> {
        self.ref_by_token.get(&token).copied()
    }

    pub(crate) fn ref_for_path(&self, path: &str) -> Option<SourceReference> {
        self.by_path.get(path).copied()
    }

    pub(crate) fn path(&self, source_ref: SourceReference) -> Option<&str> {
        self.paths.get(&source_ref).map(String::as_str)
    }

    pub(crate) fn token_for_ref(&self, source_ref: SourceReference) -> Option<Token> {
        self.token_by_ref.get(&source_ref).copied()
    }

    pub(crate) fn token_for_path(&self, path: &str) -> Option<Token> {
        self.ref_for_path(path).and_then(|r| self.token_for_ref(r))
    }
}

/// How a host request named a source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum SourceKey {
    Path(String),
    Ref(SourceReference),
}

/// Line sets waiting for a source to be opened by the interpreter.
///
/// Each request for a source replaces the previous set for that source.
#[derive(Debug, Default)]
pub(crate) struct DeferredBreakpoints {
    generation: u64,
    pending: HashMap<SourceKey, (u64, Vec<i64>)>,
}

impl DeferredBreakpoints {
    pub(crate) fn defer(&mut self, key: SourceKey, lines: Vec<i64>) {
        self.generation += 1;
        self.pending.insert(key, (self.generation, lines));
    }

    /// Remove and return the newest line set recorded under either key.
    pub(crate) fn take(&mut self, path: &str, source_ref: SourceReference) -> Option<Vec<i64>> {
        let by_path = self.pending.remove(&SourceKey::Path(path.to_string()));
        let by_ref = self.pending.remove(&SourceKey::Ref(source_ref));
        match (by_path, by_ref) {
            (Some(a), Some(b)) => Some(if a.0 >= b.0 { a.1 } else { b.1 }),
            (Some(a), None) | (None, Some(a)) => Some(a.1),
            (None, None) => None,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}
