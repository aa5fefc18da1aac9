//! Query-plan objects as the workers consume them.
//!
//! The parser and planner live outside the core; what crosses into it is
//! a [`PlanNode`] tree (a tagged variant - the original's operator class
//! hierarchy discharged at plan build time), a [`SymbolTable`] sizing the
//! evaluation frame, and a [`Parameters`] bag of stripped literals. The
//! [`PlanConsumer`] caches all three per plan id on every worker.

use std::sync::Arc;

use arachne_common::types::Value;
use arachne_common::utils::error::{Error, Result};
use arcstr::ArcStr;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Identifier of a plan installed on every worker.
pub type PlanId = u64;

/// A named slot in the evaluation frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    /// Variable name, for diagnostics.
    pub name: ArcStr,
    /// Frame position.
    pub position: usize,
}

impl Symbol {
    /// Creates a symbol.
    #[must_use]
    pub fn new(name: impl Into<ArcStr>, position: usize) -> Self {
        Self {
            name: name.into(),
            position,
        }
    }
}

/// All symbols of one plan; frames are sized by the highest position.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
}

impl SymbolTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a symbol at the next free position.
    pub fn create(&mut self, name: impl Into<ArcStr>) -> Symbol {
        let symbol = Symbol::new(name, self.symbols.len());
        self.symbols.push(symbol.clone());
        symbol
    }

    /// One past the highest frame position in use.
    #[must_use]
    pub fn max_position(&self) -> usize {
        self.symbols.len()
    }

    /// All symbols.
    #[must_use]
    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }
}

/// User-provided parameters (and stripped literals), obtainable by token
/// position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    storage: Vec<(i32, Value)>,
}

impl Parameters {
    /// Creates an empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value under a token position.
    pub fn add(&mut self, position: i32, value: Value) {
        self.storage.push((position, value));
    }

    /// The value stored for a token position.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Query`] when the position is absent.
    pub fn at_token_position(&self, position: i32) -> Result<&Value> {
        self.storage
            .iter()
            .find(|(p, _)| *p == position)
            .map(|(_, v)| v)
            .ok_or_else(|| Error::Query(format!("no parameter at token position {position}")))
    }

    /// The `position`-th stripped value, in insertion order.
    #[must_use]
    pub fn at(&self, position: usize) -> Option<&(i32, Value)> {
        self.storage.get(position)
    }

    /// Number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Returns `true` when no parameters are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Iterates (token position, value) pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &(i32, Value)> {
        self.storage.iter()
    }
}

/// Where an operand's value comes from at execution time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValueSource {
    /// A literal baked into the plan.
    Literal(Value),
    /// A parameter, by token position.
    Parameter(i32),
}

impl ValueSource {
    /// Resolves against a parameter bag.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Query`] for a missing parameter.
    pub fn resolve(&self, params: &Parameters) -> Result<Value> {
        match self {
            ValueSource::Literal(value) => Ok(value.clone()),
            ValueSource::Parameter(position) => {
                params.at_token_position(*position).cloned()
            }
        }
    }
}

/// One bound of a property range scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeBound {
    /// The bound's value.
    pub value: ValueSource,
    /// Whether the bound itself is included.
    pub inclusive: bool,
}

/// Edge direction for expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Follow outgoing edges.
    Out,
    /// Follow incoming edges.
    In,
}

/// A plan operator tree.
///
/// Each variant holds its input (except [`Once`](PlanNode::Once), the
/// leaf every pipeline bottoms out in) and the state it needs; the
/// matching cursor variants live in [`cursor`](crate::cursor).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PlanNode {
    /// Produces a single empty row; the start of every pipeline.
    Once,
    /// Emits every visible vertex into `output`.
    ScanAll {
        /// Upstream operator.
        input: Box<PlanNode>,
        /// Frame slot for the vertex.
        output: Symbol,
    },
    /// Emits vertices carrying a label.
    ScanAllByLabel {
        /// Upstream operator.
        input: Box<PlanNode>,
        /// Frame slot for the vertex.
        output: Symbol,
        /// Label name (interned worker-side).
        label: ArcStr,
    },
    /// Emits vertices whose property equals a value.
    ScanAllByLabelPropertyValue {
        /// Upstream operator.
        input: Box<PlanNode>,
        /// Frame slot for the vertex.
        output: Symbol,
        /// Label name.
        label: ArcStr,
        /// Property name.
        property: ArcStr,
        /// The value to match.
        value: ValueSource,
    },
    /// Emits vertices whose property falls in a range, in value order.
    ScanAllByLabelPropertyRange {
        /// Upstream operator.
        input: Box<PlanNode>,
        /// Frame slot for the vertex.
        output: Symbol,
        /// Label name.
        label: ArcStr,
        /// Property name.
        property: ArcStr,
        /// Lower bound, if any.
        lower: Option<RangeBound>,
        /// Upper bound, if any.
        upper: Option<RangeBound>,
    },
    /// Expands edges from the vertex in `from`.
    Expand {
        /// Upstream operator.
        input: Box<PlanNode>,
        /// Frame slot holding the source vertex.
        from: Symbol,
        /// Frame slot for the traversed edge.
        edge: Symbol,
        /// Frame slot for the peer vertex.
        to: Symbol,
        /// Which incident edges to follow.
        direction: Direction,
    },
    /// Keeps rows where a vertex property equals a value.
    Filter {
        /// Upstream operator.
        input: Box<PlanNode>,
        /// Frame slot holding the vertex to test.
        symbol: Symbol,
        /// Property name.
        property: ArcStr,
        /// The value to match.
        value: ValueSource,
    },
    /// Marks the pipeline's output row as complete.
    Produce {
        /// Upstream operator.
        input: Box<PlanNode>,
        /// The symbols a row consists of.
        symbols: Vec<Symbol>,
    },
}

/// A cached plan: the operator tree plus its symbol table.
#[derive(Debug)]
pub struct PlanPack {
    /// The operator tree.
    pub plan: Arc<PlanNode>,
    /// Its symbol table.
    pub symbol_table: SymbolTable,
}

/// Worker-local cache mapping plan ids to plan packs.
#[derive(Debug, Default)]
pub struct PlanConsumer {
    plans: DashMap<PlanId, Arc<PlanPack>>,
}

impl PlanConsumer {
    /// Creates an empty consumer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs (or replaces) a plan under an id.
    pub fn dispatch(&self, plan_id: PlanId, plan: PlanNode, symbol_table: SymbolTable) {
        self.plans.insert(
            plan_id,
            Arc::new(PlanPack {
                plan: Arc::new(plan),
                symbol_table,
            }),
        );
    }

    /// The plan pack for an id.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Query`] for an unknown id.
    pub fn plan_for(&self, plan_id: PlanId) -> Result<Arc<PlanPack>> {
        self.plans
            .get(&plan_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| Error::Query(format!("unknown plan id {plan_id}")))
    }

    /// Retires a plan.
    pub fn remove(&self, plan_id: PlanId) {
        self.plans.remove(&plan_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_table_positions() {
        let mut table = SymbolTable::new();
        let n = table.create("n");
        let m = table.create("m");
        assert_eq!(n.position, 0);
        assert_eq!(m.position, 1);
        assert_eq!(table.max_position(), 2);
    }

    #[test]
    fn parameters_by_token_position() {
        let mut params = Parameters::new();
        params.add(17, Value::from("x"));
        params.add(3, Value::from(9i64));
        assert_eq!(params.at_token_position(3).unwrap(), &Value::from(9i64));
        assert!(params.at_token_position(99).is_err());
        assert_eq!(params.at(0), Some(&(17, Value::from("x"))));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn value_source_resolution() {
        let mut params = Parameters::new();
        params.add(0, Value::from(42i64));
        assert_eq!(
            ValueSource::Literal(Value::from(1i64)).resolve(&params).unwrap(),
            Value::from(1i64)
        );
        assert_eq!(
            ValueSource::Parameter(0).resolve(&params).unwrap(),
            Value::from(42i64)
        );
        assert!(ValueSource::Parameter(5).resolve(&params).is_err());
    }

    #[test]
    fn consumer_dispatch_and_remove() {
        let consumer = PlanConsumer::new();
        let mut table = SymbolTable::new();
        let n = table.create("n");
        consumer.dispatch(
            7,
            PlanNode::ScanAll {
                input: Box::new(PlanNode::Once),
                output: n,
            },
            table,
        );
        assert!(consumer.plan_for(7).is_ok());
        assert!(consumer.plan_for(8).is_err());
        consumer.remove(7);
        assert!(consumer.plan_for(7).is_err());
    }

    #[test]
    fn plan_trees_serialize() {
        let mut table = SymbolTable::new();
        let n = table.create("n");
        let plan = PlanNode::Produce {
            input: Box::new(PlanNode::ScanAllByLabel {
                input: Box::new(PlanNode::Once),
                output: n.clone(),
                label: ArcStr::from("Person"),
            }),
            symbols: vec![n],
        };
        let bytes = bincode::serde::encode_to_vec(&plan, bincode::config::standard()).unwrap();
        let (back, _): (PlanNode, _) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard()).unwrap();
        assert!(matches!(back, PlanNode::Produce { .. }));
    }
}
