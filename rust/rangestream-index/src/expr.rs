//! Query expression trees attached to index streams.
//!
//! Streams and their merge results carry a small expression language: field
//! equality terms, conjunctions, disjunctions, and marker wrappers that record
//! why a subtree could not be evaluated against the index (delayed fields and
//! exceeded thresholds). Nodes are immutable and shared through [`ExprRef`].
//!
//! Conjunction and disjunction constructors normalize their input: nested
//! nodes of the same kind are spliced in, children are sorted by canonical
//! form and deduplicated, and a single-child node collapses to that child.
//! Two trees are therefore logically equal exactly when their canonical
//! strings are equal.

use std::sync::Arc;

use ahash::AHashMap;
use itertools::Itertools;

pub type ExprRef = Arc<Expr>;

#[derive(Clone, Copy)]
enum JunctionKind {
    And,
    Or,
}

#[derive(Debug, PartialEq, Eq, Hash)]
pub enum Expr {
    /// Field equality term, the leaf of every tree.
    Term { field: String, value: String },
    /// Conjunction of two or more children.
    And(Vec<ExprRef>),
    /// Disjunction of two or more children.
    Or(Vec<ExprRef>),
    /// Subtree whose field is not indexed for the query date range; it must
    /// be evaluated against retrieved documents instead of the index.
    Delayed(ExprRef),
    /// Subtree whose value expansion exceeded the configured threshold.
    ExceededValue(ExprRef),
    /// Subtree whose term expansion exceeded the configured threshold.
    ExceededTerm(ExprRef),
}

impl Expr {
    pub fn term(field: impl Into<String>, value: impl Into<String>) -> ExprRef {
        Arc::new(Expr::Term {
            field: field.into(),
            value: value.into(),
        })
    }

    /// Builds a normalized conjunction. Returns `None` for empty input and
    /// the sole child unchanged for single-element input.
    pub fn and(children: impl IntoIterator<Item = ExprRef>) -> Option<ExprRef> {
        Self::junction(children, JunctionKind::And)
    }

    /// Builds a normalized disjunction. Returns `None` for empty input and
    /// the sole child unchanged for single-element input.
    pub fn or(children: impl IntoIterator<Item = ExprRef>) -> Option<ExprRef> {
        Self::junction(children, JunctionKind::Or)
    }

    fn junction(
        children: impl IntoIterator<Item = ExprRef>,
        kind: JunctionKind,
    ) -> Option<ExprRef> {
        let mut flat = Vec::new();
        for child in children {
            match (&*child, kind) {
                (Expr::And(inner), JunctionKind::And) | (Expr::Or(inner), JunctionKind::Or) => {
                    flat.extend(inner.iter().cloned());
                }
                _ => flat.push(child),
            }
        }
        let mut flat: Vec<ExprRef> = flat
            .into_iter()
            .sorted_by(|a, b| a.canonical().cmp(&b.canonical()))
            .dedup_by(|a, b| a.canonical() == b.canonical())
            .collect();
        match flat.len() {
            0 => None,
            1 => Some(flat.remove(0)),
            _ => Some(Arc::new(match kind {
                JunctionKind::And => Expr::And(flat),
                JunctionKind::Or => Expr::Or(flat),
            })),
        }
    }

    pub fn delayed(source: ExprRef) -> ExprRef {
        Arc::new(Expr::Delayed(source))
    }

    pub fn exceeded_value(source: ExprRef) -> ExprRef {
        Arc::new(Expr::ExceededValue(source))
    }

    pub fn exceeded_term(source: ExprRef) -> ExprRef {
        Arc::new(Expr::ExceededTerm(source))
    }

    /// Returns `true` for marker-wrapped nodes that defer evaluation.
    pub fn is_marked(&self) -> bool {
        matches!(
            self,
            Expr::Delayed(_) | Expr::ExceededValue(_) | Expr::ExceededTerm(_)
        )
    }

    /// Unwraps one level of marker, yielding the node the marker annotates.
    /// Plain nodes are their own source.
    pub fn source(expr: &ExprRef) -> &ExprRef {
        match &**expr {
            Expr::Delayed(inner) | Expr::ExceededValue(inner) | Expr::ExceededTerm(inner) => inner,
            _ => expr,
        }
    }

    /// Canonical textual form. Children of conjunctions and disjunctions are
    /// already sorted, so two logically equal trees render identically.
    pub fn canonical(&self) -> String {
        match self {
            Expr::Term { field, value } => format!("{field} == '{value}'"),
            Expr::And(children) => {
                format!("({})", children.iter().map(|c| c.canonical()).join(" && "))
            }
            Expr::Or(children) => {
                format!("({})", children.iter().map(|c| c.canonical()).join(" || "))
            }
            Expr::Delayed(inner) => format!("_Delayed_({})", inner.canonical()),
            Expr::ExceededValue(inner) => format!("_Value_({})", inner.canonical()),
            Expr::ExceededTerm(inner) => format!("_Term_({})", inner.canonical()),
        }
    }
}

/// Insertion-ordered set of expressions, deduplicated by the canonical form
/// of each node's source.
///
/// When a plain node and a marker-wrapped node share a source, the marked one
/// wins: the marker records information the plain node lacks.
#[derive(Debug, Default, Clone)]
pub struct ExprSet {
    by_source: AHashMap<String, usize>,
    items: Vec<ExprRef>,
}

impl ExprSet {
    pub fn new() -> ExprSet {
        Default::default()
    }

    pub fn insert(&mut self, expr: ExprRef) {
        let key = Expr::source(&expr).canonical();
        match self.by_source.entry(key) {
            std::collections::hash_map::Entry::Occupied(slot) => {
                let idx = *slot.get();
                if expr.is_marked() && !self.items[idx].is_marked() {
                    self.items[idx] = expr;
                }
            }
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(self.items.len());
                self.items.push(expr);
            }
        }
    }

    /// Inserts a node, splicing in the children of a top-level disjunction
    /// so that branches shared between disjunctions deduplicate.
    pub fn insert_or_terms(&mut self, expr: &ExprRef) {
        match &**expr {
            Expr::Or(children) => {
                for child in children {
                    self.insert(child.clone());
                }
            }
            _ => self.insert(expr.clone()),
        }
    }

    pub fn extend(&mut self, exprs: impl IntoIterator<Item = ExprRef>) {
        for expr in exprs {
            self.insert(expr);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExprRef> {
        self.items.iter()
    }

    pub fn and_node(&self) -> Option<ExprRef> {
        Expr::and(self.items.iter().cloned())
    }

    pub fn or_node(&self) -> Option<ExprRef> {
        Expr::or(self.items.iter().cloned())
    }
}

impl FromIterator<ExprRef> for ExprSet {
    fn from_iter<T: IntoIterator<Item = ExprRef>>(iter: T) -> ExprSet {
        let mut set = ExprSet::new();
        set.extend(iter);
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_canonical() {
        assert_eq!(Expr::term("FIELD", "VALUE").canonical(), "FIELD == 'VALUE'");
    }

    #[test]
    fn and_flattens_and_sorts() {
        let a = Expr::term("A", "1");
        let b = Expr::term("B", "2");
        let c = Expr::term("C", "3");
        let inner = Expr::and([b.clone(), c.clone()]).unwrap();
        let node = Expr::and([inner, a.clone()]).unwrap();
        assert_eq!(node.canonical(), "(A == '1' && B == '2' && C == '3')");
    }

    #[test]
    fn or_dedupes_children() {
        let a = Expr::term("A", "1");
        let node = Expr::or([a.clone(), Expr::term("A", "1"), Expr::term("B", "2")]).unwrap();
        assert_eq!(node.canonical(), "(A == '1' || B == '2')");
    }

    #[test]
    fn single_child_collapses() {
        let a = Expr::term("A", "1");
        let node = Expr::and([a.clone(), a.clone()]).unwrap();
        assert_eq!(node.canonical(), a.canonical());
        assert!(Expr::or(std::iter::empty()).is_none());
    }

    #[test]
    fn logically_equal_trees_render_identically() {
        let ab = Expr::or([Expr::term("A", "1"), Expr::term("B", "2")]).unwrap();
        let ba = Expr::or([Expr::term("B", "2"), Expr::term("A", "1")]).unwrap();
        assert_eq!(ab.canonical(), ba.canonical());
    }

    #[test]
    fn set_prefers_marked_duplicates() {
        let term = Expr::term("A", "1");
        let mut set = ExprSet::new();
        set.insert(term.clone());
        set.insert(Expr::delayed(term.clone()));
        assert_eq!(set.len(), 1);
        assert_eq!(set.iter().next().unwrap().canonical(), "_Delayed_(A == '1')");

        // A later plain duplicate does not displace the marked entry.
        set.insert(term);
        assert_eq!(set.len(), 1);
        assert!(set.iter().next().unwrap().is_marked());
    }

    #[test]
    fn set_splits_disjunction_branches() {
        let a = Expr::term("A", "1");
        let b = Expr::term("B", "2");
        let c = Expr::term("C", "3");
        let mut set = ExprSet::new();
        set.insert_or_terms(&Expr::or([a.clone(), b.clone()]).unwrap());
        set.insert_or_terms(&Expr::or([b, c]).unwrap());
        assert_eq!(set.len(), 3);
        assert_eq!(
            set.or_node().unwrap().canonical(),
            "(A == '1' || B == '2' || C == '3')"
        );
    }
}
