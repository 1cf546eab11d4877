//! In-memory view of the deck forest.
//!
//! Built from a snapshot of decks for a single request and dropped
//! afterwards; decks can be re-parented, so closures are never cached
//! across requests.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::models::{Deck, DeckId};

pub struct DeckTree<'a> {
    decks: HashMap<&'a str, &'a Deck>,
    children: HashMap<&'a str, Vec<&'a Deck>>,
}

/// One line of the indented deck listing.
#[derive(Debug, Clone, PartialEq)]
pub struct DeckRow<'a> {
    pub deck: &'a Deck,
    pub depth: usize,
    pub has_children: bool,
}

impl<'a> DeckTree<'a> {
    pub fn new(decks: &'a [Deck]) -> Self {
        let mut by_id = HashMap::with_capacity(decks.len());
        let mut children: HashMap<&'a str, Vec<&'a Deck>> = HashMap::new();

        for deck in decks {
            by_id.insert(deck.id.as_str(), deck);
            if let Some(parent) = deck.parent_deck_id.as_deref() {
                children.entry(parent).or_default().push(deck);
            }
        }

        for siblings in children.values_mut() {
            siblings.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        }

        Self {
            decks: by_id,
            children,
        }
    }

    pub fn get(&self, deck_id: &str) -> Option<&'a Deck> {
        self.decks.get(deck_id).copied()
    }

    pub fn contains(&self, deck_id: &str) -> bool {
        self.decks.contains_key(deck_id)
    }

    pub fn children_of(&self, deck_id: &str) -> &[&'a Deck] {
        self.children.get(deck_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The deck itself plus every transitive descendant.
    ///
    /// The requested id is always a member, known or not. A visited set
    /// guards the walk, so a corrupted parent chain that loops back on
    /// itself still terminates.
    pub fn subtree_of(&self, deck_id: &str) -> HashSet<DeckId> {
        let mut visited: HashSet<DeckId> = HashSet::new();
        let mut pending: VecDeque<&str> = VecDeque::new();

        visited.insert(deck_id.to_string());
        pending.push_back(deck_id);

        while let Some(current) = pending.pop_front() {
            for child in self.children_of(current) {
                if visited.insert(child.id.clone()) {
                    pending.push_back(child.id.as_str());
                }
            }
        }

        visited
    }

    /// Whether making `new_parent` the parent of `deck_id` would close a loop.
    pub fn would_create_cycle(&self, deck_id: &str, new_parent: &str) -> bool {
        self.subtree_of(deck_id).contains(new_parent)
    }

    /// Depth-first listing, roots first, siblings ordered by name.
    ///
    /// Decks whose parent is missing from the snapshot are listed as roots so
    /// nothing disappears from the outline. Decks caught in a parent cycle
    /// have no root to hang from; they are appended starting at depth 0.
    pub fn outline(&self) -> Vec<DeckRow<'a>> {
        let mut roots: Vec<&'a Deck> = self
            .decks
            .values()
            .filter(|deck| match deck.parent_deck_id.as_deref() {
                None => true,
                Some(parent) => !self.contains(parent),
            })
            .copied()
            .collect();
        roots.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));

        let mut rows = Vec::with_capacity(self.decks.len());
        let mut seen: HashSet<&str> = HashSet::new();
        for root in roots {
            self.walk(root, 0, &mut seen, &mut rows);
        }

        if seen.len() < self.decks.len() {
            let mut stranded: Vec<&'a Deck> = self
                .decks
                .values()
                .filter(|deck| !seen.contains(deck.id.as_str()))
                .copied()
                .collect();
            stranded.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
            for deck in stranded {
                if !seen.contains(deck.id.as_str()) {
                    self.walk(deck, 0, &mut seen, &mut rows);
                }
            }
        }

        rows
    }

    fn walk(&self, deck: &'a Deck, depth: usize, seen: &mut HashSet<&'a str>, rows: &mut Vec<DeckRow<'a>>) {
        if !seen.insert(deck.id.as_str()) {
            return;
        }
        let children = self.children_of(&deck.id);
        rows.push(DeckRow {
            deck,
            depth,
            has_children: !children.is_empty(),
        });
        for &child in children {
            self.walk(child, depth + 1, seen, rows);
        }
    }
}
