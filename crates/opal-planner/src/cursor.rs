//! A cursor over the parser's event stream.
//!
//! The planner consumes events directly -- no intermediate tree. The cursor
//! provides peeking, balanced skipping of whole nodes, and token access.
//! The parser guarantees balance, so mismatched Open/Close here is an
//! internal invariant violation, not a user error.

use opal_common::token::{Token, TokenKind};
use opal_parser::{Event, EventKind, NodeKind, ParseTree};

pub(crate) struct EventCursor<'t> {
    tree: &'t ParseTree,
    pos: usize,
}

impl<'t> EventCursor<'t> {
    pub(crate) fn new(tree: &'t ParseTree) -> Self {
        Self { tree, pos: 0 }
    }

    pub(crate) fn peek(&self) -> Option<Event> {
        self.tree.events.get(self.pos).copied()
    }

    /// Current event index; pairs with [`Self::set_pos`] for realigning
    /// after an aborted branch.
    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    pub(crate) fn set_pos(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub(crate) fn bump(&mut self) -> Option<Event> {
        let event = self.peek();
        if event.is_some() {
            self.pos += 1;
        }
        event
    }

    pub(crate) fn at_open(&self, kind: NodeKind) -> bool {
        self.peek()
            .is_some_and(|e| e.kind == EventKind::Open && e.node_kind() == Some(kind))
    }

    pub(crate) fn at_close(&self, kind: NodeKind) -> bool {
        self.peek()
            .is_some_and(|e| e.kind == EventKind::Close && e.node_kind() == Some(kind))
    }

    /// Kind of the token referenced by the current event, if it is a Token
    /// event.
    pub(crate) fn token_kind(&self) -> Option<TokenKind> {
        self.peek()
            .and_then(|e| e.token_index())
            .map(|i| self.tree.tokens[i].kind)
    }

    pub(crate) fn token_at(&self, index: usize) -> &'t Token {
        &self.tree.tokens[index]
    }

    pub(crate) fn token_text(&self, index: usize) -> &'t str {
        self.tree.token_text(index)
    }

    /// Consume an Open event of the given kind.
    ///
    /// # Panics
    ///
    /// Panics if the cursor is not at that Open -- the walk and the grammar
    /// are out of step, which is a bug.
    pub(crate) fn expect_open(&mut self, kind: NodeKind) {
        assert!(
            self.at_open(kind),
            "planner expected Open({kind:?}) at event {}, found {:?}",
            self.pos,
            self.peek()
        );
        self.pos += 1;
    }

    /// Consume the Close event of the given kind.
    pub(crate) fn expect_close(&mut self, kind: NodeKind) {
        assert!(
            self.at_close(kind),
            "planner expected Close({kind:?}) at event {}, found {:?}",
            self.pos,
            self.peek()
        );
        self.pos += 1;
    }

    /// Skip one event or one whole node (when at an Open, through its
    /// matching Close).
    pub(crate) fn skip(&mut self) {
        let Some(event) = self.bump() else { return };
        if event.kind != EventKind::Open {
            return;
        }
        let mut depth = 1u32;
        while depth > 0 {
            match self.bump() {
                Some(e) if e.kind == EventKind::Open => depth += 1,
                Some(e) if e.kind == EventKind::Close => depth -= 1,
                Some(_) => {}
                None => break,
            }
        }
    }

    /// Token indices of all Token events directly or transitively inside
    /// the node starting at the cursor. The cursor must sit on an Open; it
    /// ends just past the matching Close.
    pub(crate) fn node_token_indices(&mut self) -> Vec<usize> {
        let mut indices = Vec::new();
        let Some(open) = self.bump() else {
            return indices;
        };
        debug_assert_eq!(open.kind, EventKind::Open);
        let mut depth = 1u32;
        while depth > 0 {
            match self.bump() {
                Some(e) if e.kind == EventKind::Open => depth += 1,
                Some(e) if e.kind == EventKind::Close => depth -= 1,
                Some(e) => indices.push(e.token_index().expect("token event")),
                None => break,
            }
        }
        indices
    }
}
