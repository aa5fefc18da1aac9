//! Cursors: the executable mirror of the plan operator variants.
//!
//! A cursor pulls one row at a time into a [`Frame`] - the positional
//! array of values the plan's symbols index into. Pulls are synchronous
//! and CPU-bound; the only way one stops early is the transaction's
//! abort flag, checked at every pull boundary.

use std::collections::VecDeque;
use std::ops::Bound;

use arachne_common::types::{GlobalAddress, Value};
use arachne_common::utils::error::{Error, Result};
use arachne_core::store::{PropertyFilter, VertexFilter};
use arachne_engine::DatabaseAccessor;
use arcstr::ArcStr;

use crate::messages::FrameValue;
use crate::plan::{Direction, PlanNode, RangeBound, ValueSource};

/// The evaluation frame: one slot per symbol position.
#[derive(Debug, Clone)]
pub struct Frame {
    slots: Vec<FrameValue>,
}

impl Frame {
    /// Creates a frame with `size` slots, all null.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            slots: vec![FrameValue::Value(Value::Null); size],
        }
    }

    /// Reads a slot.
    #[must_use]
    pub fn get(&self, position: usize) -> &FrameValue {
        &self.slots[position]
    }

    /// Writes a slot.
    pub fn set(&mut self, position: usize, value: FrameValue) {
        self.slots[position] = value;
    }

    /// Number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` for a zero-symbol frame.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Everything a pull needs besides the frame: the transactional accessor
/// and the parameter bag.
pub struct ExecutionContext<'a> {
    /// The transaction's database accessor.
    pub dba: &'a DatabaseAccessor,
    /// Parameters of the executing query.
    pub params: &'a crate::plan::Parameters,
}

/// Which vertices a scan cursor produces.
#[derive(Debug, Clone)]
pub enum ScanKind {
    /// Every visible vertex.
    All,
    /// Vertices carrying a label.
    Label(ArcStr),
    /// Vertices whose property equals a value.
    PropertyValue {
        /// Label name.
        label: ArcStr,
        /// Property name.
        property: ArcStr,
        /// Expected value.
        value: ValueSource,
    },
    /// Vertices whose property falls in a range.
    PropertyRange {
        /// Label name.
        label: ArcStr,
        /// Property name.
        property: ArcStr,
        /// Lower bound.
        lower: Option<RangeBound>,
        /// Upper bound.
        upper: Option<RangeBound>,
    },
}

impl ScanKind {
    fn fetch(&self, ctx: &ExecutionContext<'_>) -> Result<VecDeque<GlobalAddress>> {
        let catalogs = ctx.dba.store().catalogs();
        let filter = match self {
            ScanKind::All => VertexFilter::All,
            ScanKind::Label(label) => VertexFilter::Label(catalogs.label(label)),
            ScanKind::PropertyValue {
                label,
                property,
                value,
            } => VertexFilter::LabelProperty {
                label: catalogs.label(label),
                property: catalogs.property(property),
                filter: PropertyFilter::Equal(value.resolve(ctx.params)?),
            },
            ScanKind::PropertyRange {
                label,
                property,
                lower,
                upper,
            } => {
                let resolve = |bound: &Option<RangeBound>| -> Result<Bound<Value>> {
                    Ok(match bound {
                        None => Bound::Unbounded,
                        Some(b) => {
                            let value = b.value.resolve(ctx.params)?;
                            if b.inclusive {
                                Bound::Included(value)
                            } else {
                                Bound::Excluded(value)
                            }
                        }
                    })
                };
                VertexFilter::LabelProperty {
                    label: catalogs.label(label),
                    property: catalogs.property(property),
                    filter: PropertyFilter::Range {
                        lower: resolve(lower)?,
                        upper: resolve(upper)?,
                    },
                }
            }
        };
        Ok(ctx
            .dba
            .vertices(&filter)?
            .into_iter()
            .map(|v| v.address())
            .collect())
    }
}

/// The executable form of a plan: one cursor variant per operator.
pub enum Cursor {
    /// Emits a single empty row.
    Once {
        /// Whether the row was already emitted.
        pulled: bool,
    },
    /// Emits vertices matching a scan into a frame slot.
    Scan {
        /// Upstream cursor.
        input: Box<Cursor>,
        /// Frame position for the vertex.
        output: usize,
        /// What to scan.
        kind: ScanKind,
        /// Remaining vertices for the current input row.
        queue: Option<VecDeque<GlobalAddress>>,
    },
    /// Expands incident edges of a frame's vertex.
    Expand {
        /// Upstream cursor.
        input: Box<Cursor>,
        /// Frame position holding the source vertex.
        from: usize,
        /// Frame position for the edge.
        edge: usize,
        /// Frame position for the peer vertex.
        to: usize,
        /// Which incident list to follow.
        direction: Direction,
        /// Remaining (edge, peer) pairs for the current input row.
        queue: Option<VecDeque<(GlobalAddress, GlobalAddress)>>,
    },
    /// Keeps rows whose vertex property equals a value.
    Filter {
        /// Upstream cursor.
        input: Box<Cursor>,
        /// Frame position holding the vertex to test.
        symbol: usize,
        /// Property name.
        property: ArcStr,
        /// Expected value.
        value: ValueSource,
    },
    /// Marks rows as complete output.
    Produce {
        /// Upstream cursor.
        input: Box<Cursor>,
    },
}

/// Builds the cursor tree for a plan.
#[must_use]
pub fn make_cursor(plan: &PlanNode) -> Cursor {
    match plan {
        PlanNode::Once => Cursor::Once { pulled: false },
        PlanNode::ScanAll { input, output } => Cursor::Scan {
            input: Box::new(make_cursor(input)),
            output: output.position,
            kind: ScanKind::All,
            queue: None,
        },
        PlanNode::ScanAllByLabel {
            input,
            output,
            label,
        } => Cursor::Scan {
            input: Box::new(make_cursor(input)),
            output: output.position,
            kind: ScanKind::Label(label.clone()),
            queue: None,
        },
        PlanNode::ScanAllByLabelPropertyValue {
            input,
            output,
            label,
            property,
            value,
        } => Cursor::Scan {
            input: Box::new(make_cursor(input)),
            output: output.position,
            kind: ScanKind::PropertyValue {
                label: label.clone(),
                property: property.clone(),
                value: value.clone(),
            },
            queue: None,
        },
        PlanNode::ScanAllByLabelPropertyRange {
            input,
            output,
            label,
            property,
            lower,
            upper,
        } => Cursor::Scan {
            input: Box::new(make_cursor(input)),
            output: output.position,
            kind: ScanKind::PropertyRange {
                label: label.clone(),
                property: property.clone(),
                lower: lower.clone(),
                upper: upper.clone(),
            },
            queue: None,
        },
        PlanNode::Expand {
            input,
            from,
            edge,
            to,
            direction,
        } => Cursor::Expand {
            input: Box::new(make_cursor(input)),
            from: from.position,
            edge: edge.position,
            to: to.position,
            direction: *direction,
            queue: None,
        },
        PlanNode::Filter {
            input,
            symbol,
            property,
            value,
        } => Cursor::Filter {
            input: Box::new(make_cursor(input)),
            symbol: symbol.position,
            property: property.clone(),
            value: value.clone(),
        },
        PlanNode::Produce { input, .. } => Cursor::Produce {
            input: Box::new(make_cursor(input)),
        },
    }
}

impl Cursor {
    /// Pulls the next row into `frame`. Returns `Ok(false)` on
    /// exhaustion.
    ///
    /// # Errors
    ///
    /// Surfaces [`Error::HintedAbort`] when the transaction was told to
    /// stop, and propagates storage and evaluation errors.
    pub fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> Result<bool> {
        ctx.dba.check_abort()?;
        match self {
            Cursor::Once { pulled } => {
                if *pulled {
                    return Ok(false);
                }
                *pulled = true;
                Ok(true)
            }
            Cursor::Scan {
                input,
                output,
                kind,
                queue,
            } => loop {
                if let Some(q) = queue {
                    if let Some(address) = q.pop_front() {
                        frame.set(*output, FrameValue::Vertex(address));
                        return Ok(true);
                    }
                }
                if !input.pull(frame, ctx)? {
                    return Ok(false);
                }
                *queue = Some(kind.fetch(ctx)?);
            },
            Cursor::Expand {
                input,
                from,
                edge,
                to,
                direction,
                queue,
            } => loop {
                if let Some(q) = queue {
                    if let Some((edge_addr, peer)) = q.pop_front() {
                        frame.set(*edge, FrameValue::Edge(edge_addr));
                        frame.set(*to, FrameValue::Vertex(peer));
                        return Ok(true);
                    }
                }
                if !input.pull(frame, ctx)? {
                    return Ok(false);
                }
                let FrameValue::Vertex(address) = frame.get(*from) else {
                    return Err(Error::Query("expand source is not a vertex".into()));
                };
                let record = ctx.dba.vertex(*address).record()?;
                let entries = match direction {
                    Direction::Out => &record.out_edges,
                    Direction::In => &record.in_edges,
                };
                *queue = Some(entries.iter().map(|e| (e.edge, e.peer)).collect());
            },
            Cursor::Filter {
                input,
                symbol,
                property,
                value,
            } => loop {
                if !input.pull(frame, ctx)? {
                    return Ok(false);
                }
                let FrameValue::Vertex(address) = frame.get(*symbol) else {
                    return Err(Error::Query("filter target is not a vertex".into()));
                };
                let actual = ctx.dba.vertex(*address).property(property)?;
                if actual.is_null() {
                    continue;
                }
                let expected = value.resolve(ctx.params)?;
                if actual.total_cmp(&expected).is_eq() {
                    return Ok(true);
                }
            },
            Cursor::Produce { input } => input.pull(frame, ctx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{Parameters, Symbol, SymbolTable};
    use arachne_engine::Database;

    fn scan_plan(table: &mut SymbolTable) -> (PlanNode, Symbol) {
        let n = table.create("n");
        (
            PlanNode::Produce {
                input: Box::new(PlanNode::ScanAll {
                    input: Box::new(PlanNode::Once),
                    output: n.clone(),
                }),
                symbols: vec![n.clone()],
            },
            n,
        )
    }

    #[test]
    fn once_pulls_exactly_once() {
        let db = Database::in_memory();
        let dba = db.access().unwrap();
        let params = Parameters::new();
        let ctx = ExecutionContext {
            dba: &dba,
            params: &params,
        };
        let mut cursor = make_cursor(&PlanNode::Once);
        let mut frame = Frame::new(0);
        assert!(cursor.pull(&mut frame, &ctx).unwrap());
        assert!(!cursor.pull(&mut frame, &ctx).unwrap());
    }

    #[test]
    fn scan_all_streams_visible_vertices() {
        let db = Database::in_memory();
        let setup = db.access().unwrap();
        for _ in 0..3 {
            setup.create_vertex().unwrap();
        }
        setup.commit().unwrap();

        let dba = db.access().unwrap();
        let params = Parameters::new();
        let ctx = ExecutionContext {
            dba: &dba,
            params: &params,
        };
        let mut table = SymbolTable::new();
        let (plan, n) = scan_plan(&mut table);
        let mut cursor = make_cursor(&plan);
        let mut frame = Frame::new(table.max_position());

        let mut seen = 0;
        while cursor.pull(&mut frame, &ctx).unwrap() {
            assert!(matches!(frame.get(n.position), FrameValue::Vertex(_)));
            seen += 1;
        }
        assert_eq!(seen, 3);
    }

    #[test]
    fn expand_follows_out_edges() {
        let db = Database::in_memory();
        let setup = db.access().unwrap();
        let a = setup.create_vertex().unwrap();
        a.add_label("Start").unwrap();
        let b = setup.create_vertex().unwrap();
        let c = setup.create_vertex().unwrap();
        setup.create_edge(&a, &b, "E").unwrap();
        setup.create_edge(&a, &c, "E").unwrap();
        let b_addr = b.address();
        let c_addr = c.address();
        setup.commit().unwrap();

        let dba = db.access().unwrap();
        let params = Parameters::new();
        let ctx = ExecutionContext {
            dba: &dba,
            params: &params,
        };
        let mut table = SymbolTable::new();
        let n = table.create("n");
        let e = table.create("e");
        let m = table.create("m");
        let plan = PlanNode::Expand {
            input: Box::new(PlanNode::ScanAllByLabel {
                input: Box::new(PlanNode::Once),
                output: n.clone(),
                label: ArcStr::from("Start"),
            }),
            from: n,
            edge: e.clone(),
            to: m.clone(),
            direction: Direction::Out,
        };
        let mut cursor = make_cursor(&plan);
        let mut frame = Frame::new(table.max_position());

        let mut peers = Vec::new();
        while cursor.pull(&mut frame, &ctx).unwrap() {
            assert!(matches!(frame.get(e.position), FrameValue::Edge(_)));
            if let FrameValue::Vertex(peer) = frame.get(m.position) {
                peers.push(*peer);
            }
        }
        assert_eq!(peers, vec![b_addr, c_addr]);
    }

    #[test]
    fn filter_with_parameter() {
        let db = Database::in_memory();
        let setup = db.access().unwrap();
        for age in [10i64, 20, 30] {
            let v = setup.create_vertex().unwrap();
            v.set_property("age", Value::from(age)).unwrap();
        }
        setup.commit().unwrap();

        let dba = db.access().unwrap();
        let mut params = Parameters::new();
        params.add(0, Value::from(20i64));
        let ctx = ExecutionContext {
            dba: &dba,
            params: &params,
        };
        let mut table = SymbolTable::new();
        let n = table.create("n");
        let plan = PlanNode::Filter {
            input: Box::new(PlanNode::ScanAll {
                input: Box::new(PlanNode::Once),
                output: n.clone(),
            }),
            symbol: n.clone(),
            property: ArcStr::from("age"),
            value: ValueSource::Parameter(0),
        };
        let mut cursor = make_cursor(&plan);
        let mut frame = Frame::new(table.max_position());

        let mut hits = 0;
        while cursor.pull(&mut frame, &ctx).unwrap() {
            hits += 1;
        }
        assert_eq!(hits, 1);
    }

    #[test]
    fn abort_flag_stops_pulls() {
        let db = Database::in_memory();
        let dba = db.access().unwrap();
        let params = Parameters::new();
        let ctx = ExecutionContext {
            dba: &dba,
            params: &params,
        };
        let mut cursor = make_cursor(&PlanNode::Once);
        let mut frame = Frame::new(0);
        dba.transaction().set_should_abort();
        assert!(matches!(
            cursor.pull(&mut frame, &ctx),
            Err(Error::HintedAbort)
        ));
    }
}
