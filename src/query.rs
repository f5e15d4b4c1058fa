use crate::catalog::RelationManager;
use crate::error::StorageError;
use crate::index::BTreeCursor;
use crate::record::{RecordScan, RecordStore};
use crate::schema::{attribute_position, Attribute, CompOp, Value};
use crate::tuple::{concat_tuples, decode_tuple, encode_tuple, tuple_field};

/// A pull-based relational operator. Tuples use the API format over
/// [`Operator::attributes`].
pub trait Operator {
    fn next_tuple(&mut self) -> anyhow::Result<Option<Vec<u8>>>;

    fn attributes(&self) -> Vec<Attribute>;
}

impl<O: Operator + ?Sized> Operator for Box<O> {
    fn next_tuple(&mut self) -> anyhow::Result<Option<Vec<u8>>> {
        (**self).next_tuple()
    }

    fn attributes(&self) -> Vec<Attribute> {
        (**self).attributes()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Value(Value),
    /// A qualified attribute name, `table.attr`.
    Attr(String),
}

/// `lhs_attr op rhs`, where `lhs_attr` is a qualified attribute name.
#[derive(Clone, Debug, PartialEq)]
pub struct Condition {
    pub lhs_attr: String,
    pub op: CompOp,
    pub rhs: Operand,
}

fn qualify(table: &str, attrs: &[Attribute]) -> Vec<Attribute> {
    attrs
        .iter()
        .map(|attr| Attribute::new(format!("{table}.{}", attr.name), attr.attr_type, attr.length))
        .collect()
}

/// Full scan over a table.
pub struct TableScan {
    manager: RelationManager,
    table: String,
    attrs: Vec<Attribute>,
    scan: RecordScan,
}

impl TableScan {
    pub fn new(manager: &RelationManager, table: &str) -> anyhow::Result<Self> {
        let attrs = manager.get_attributes(table)?;
        let scan = Self::open_scan(manager, table, &attrs)?;
        Ok(Self {
            manager: manager.clone(),
            table: table.to_string(),
            attrs: qualify(table, &attrs),
            scan,
        })
    }

    fn open_scan(
        manager: &RelationManager,
        table: &str,
        attrs: &[Attribute],
    ) -> anyhow::Result<RecordScan> {
        let names: Vec<&str> = attrs.iter().map(|attr| attr.name.as_str()).collect();
        manager.scan(table, "", CompOp::NoOp, None, &names)
    }

    /// Restarts the scan from the first record.
    pub fn rewind(&mut self) -> anyhow::Result<()> {
        let attrs = self.manager.get_attributes(&self.table)?;
        self.scan = Self::open_scan(&self.manager, &self.table, &attrs)?;
        Ok(())
    }
}

impl Operator for TableScan {
    fn next_tuple(&mut self) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.scan.next_record()?.map(|(_, tuple)| tuple))
    }

    fn attributes(&self) -> Vec<Attribute> {
        self.attrs.clone()
    }
}

/// Scan over a table in the key order of one of its indexes.
pub struct IndexScan {
    manager: RelationManager,
    table: String,
    attr: String,
    store: RecordStore,
    table_attrs: Vec<Attribute>,
    attrs: Vec<Attribute>,
    cursor: BTreeCursor,
}

impl IndexScan {
    /// Starts over the whole key range of the index on `table.attr`.
    pub fn new(manager: &RelationManager, table: &str, attr: &str) -> anyhow::Result<Self> {
        let (store, table_attrs) = manager.table_store(table)?;
        let cursor = manager.index_scan(table, attr, None, None, true, true)?;
        Ok(Self {
            manager: manager.clone(),
            table: table.to_string(),
            attr: attr.to_string(),
            store,
            attrs: qualify(table, &table_attrs),
            table_attrs,
            cursor,
        })
    }

    /// Re-keys the scan to a new range. `None` bounds are unbounded.
    pub fn set_iterator(
        &mut self,
        low: Option<&Value>,
        high: Option<&Value>,
        low_inclusive: bool,
        high_inclusive: bool,
    ) -> anyhow::Result<()> {
        self.cursor = self.manager.index_scan(
            &self.table,
            &self.attr,
            low,
            high,
            low_inclusive,
            high_inclusive,
        )?;
        Ok(())
    }

    /// Qualified name of the indexed attribute.
    pub fn key_attribute(&self) -> anyhow::Result<&Attribute> {
        let position = attribute_position(&self.table_attrs, &self.attr)?;
        Ok(&self.attrs[position])
    }
}

impl Operator for IndexScan {
    fn next_tuple(&mut self) -> anyhow::Result<Option<Vec<u8>>> {
        let Some((rid, _)) = self.cursor.next_entry()? else {
            return Ok(None);
        };
        Ok(Some(self.store.read_record(&self.table_attrs, rid)?))
    }

    fn attributes(&self) -> Vec<Attribute> {
        self.attrs.clone()
    }
}

enum Rhs {
    Value(Value),
    Attr(usize),
}

/// Keeps the input tuples that satisfy a [`Condition`].
pub struct Filter<O> {
    input: O,
    attrs: Vec<Attribute>,
    op: CompOp,
    predicate: Option<(usize, Rhs)>,
}

impl<O: Operator> Filter<O> {
    pub fn new(input: O, condition: Condition) -> anyhow::Result<Self> {
        let attrs = input.attributes();
        let predicate = if condition.op == CompOp::NoOp {
            None
        } else {
            let lhs = attribute_position(&attrs, &condition.lhs_attr)?;
            let rhs = match condition.rhs {
                Operand::Value(value) => {
                    value.check_type(&attrs[lhs])?;
                    Rhs::Value(value)
                }
                Operand::Attr(name) => {
                    let rhs = attribute_position(&attrs, &name)?;
                    if attrs[rhs].attr_type != attrs[lhs].attr_type {
                        return Err(StorageError::TypeMismatch {
                            attr: name,
                            expected: attrs[lhs].attr_type,
                        }
                        .into());
                    }
                    Rhs::Attr(rhs)
                }
            };
            Some((lhs, rhs))
        };

        Ok(Self {
            input,
            attrs,
            op: condition.op,
            predicate,
        })
    }

    fn accepts(&self, tuple: &[u8]) -> anyhow::Result<bool> {
        let Some((lhs, rhs)) = &self.predicate else {
            return Ok(true);
        };
        let lhs = tuple_field(&self.attrs, tuple, *lhs)?;
        Ok(match rhs {
            Rhs::Value(value) => self.op.evaluate(lhs.as_ref(), value),
            Rhs::Attr(rhs) => match tuple_field(&self.attrs, tuple, *rhs)? {
                Some(value) => self.op.evaluate(lhs.as_ref(), &value),
                None => false,
            },
        })
    }
}

impl<O: Operator> Operator for Filter<O> {
    fn next_tuple(&mut self) -> anyhow::Result<Option<Vec<u8>>> {
        while let Some(tuple) = self.input.next_tuple()? {
            if self.accepts(&tuple)? {
                return Ok(Some(tuple));
            }
        }
        Ok(None)
    }

    fn attributes(&self) -> Vec<Attribute> {
        self.attrs.clone()
    }
}

/// Re-emits the named fields of every input tuple, in the requested order.
pub struct Project<O> {
    input: O,
    input_attrs: Vec<Attribute>,
    positions: Vec<usize>,
    attrs: Vec<Attribute>,
}

impl<O: Operator> Project<O> {
    pub fn new(input: O, names: &[&str]) -> anyhow::Result<Self> {
        let input_attrs = input.attributes();
        let positions = names
            .iter()
            .map(|name| attribute_position(&input_attrs, name))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let attrs = positions.iter().map(|i| input_attrs[*i].clone()).collect();
        Ok(Self {
            input,
            input_attrs,
            positions,
            attrs,
        })
    }
}

impl<O: Operator> Operator for Project<O> {
    fn next_tuple(&mut self) -> anyhow::Result<Option<Vec<u8>>> {
        let Some(tuple) = self.input.next_tuple()? else {
            return Ok(None);
        };
        let values = decode_tuple(&self.input_attrs, &tuple)?;
        let projected: Vec<Option<Value>> =
            self.positions.iter().map(|i| values[*i].clone()).collect();
        Ok(Some(encode_tuple(&self.attrs, &projected)?))
    }

    fn attributes(&self) -> Vec<Attribute> {
        self.attrs.clone()
    }
}

/// The outer tuple being joined and the key it probes the inner index with.
struct Probe {
    outer: Vec<u8>,
    key: Option<Value>,
    second_range: bool,
}

/// Joins `outer` with an [`IndexScan`] by probing the index once per outer tuple.
/// The condition reads `outer_attr op inner_attr` and every matching inner
/// tuple is emitted, concatenated after the outer one.
pub struct IndexNestedLoopJoin<O> {
    outer: O,
    inner: IndexScan,
    op: CompOp,
    outer_attrs: Vec<Attribute>,
    inner_attrs: Vec<Attribute>,
    outer_position: usize,
    probe: Option<Probe>,
}

impl<O: Operator> IndexNestedLoopJoin<O> {
    pub fn new(outer: O, inner: IndexScan, condition: Condition) -> anyhow::Result<Self> {
        let outer_attrs = outer.attributes();
        let outer_position = attribute_position(&outer_attrs, &condition.lhs_attr)?;

        let key_attr = inner.key_attribute()?;
        let Operand::Attr(inner_attr) = &condition.rhs else {
            return Err(StorageError::InvalidArgument(
                "join condition must compare two attributes".to_string(),
            )
            .into());
        };
        if *inner_attr != key_attr.name {
            return Err(StorageError::InvalidArgument(format!(
                "join attribute {inner_attr:?} is not the indexed attribute {:?}",
                key_attr.name
            ))
            .into());
        }
        if outer_attrs[outer_position].attr_type != key_attr.attr_type {
            return Err(StorageError::TypeMismatch {
                attr: condition.lhs_attr,
                expected: key_attr.attr_type,
            }
            .into());
        }

        let inner_attrs = inner.attributes();
        Ok(Self {
            outer,
            inner,
            op: condition.op,
            outer_attrs,
            inner_attrs,
            outer_position,
            probe: None,
        })
    }

    /// Positions the inner scan on the keys `k` with `v op k`.
    fn start_probe(&mut self, key: Option<&Value>) -> anyhow::Result<()> {
        let inner = &mut self.inner;
        match (self.op, key) {
            (CompOp::NoOp, _) => inner.set_iterator(None, None, true, true),
            (_, None) => Ok(()),
            (CompOp::Eq, Some(v)) => inner.set_iterator(Some(v), Some(v), true, true),
            (CompOp::Lt, Some(v)) => inner.set_iterator(Some(v), None, false, false),
            (CompOp::Le, Some(v)) => inner.set_iterator(Some(v), None, true, false),
            (CompOp::Gt, Some(v)) => inner.set_iterator(None, Some(v), false, false),
            (CompOp::Ge, Some(v)) => inner.set_iterator(None, Some(v), false, true),
            // keys below v first, the keys above once those run out
            (CompOp::Ne, Some(v)) => inner.set_iterator(None, Some(v), false, false),
        }
    }
}

impl<O: Operator> Operator for IndexNestedLoopJoin<O> {
    fn next_tuple(&mut self) -> anyhow::Result<Option<Vec<u8>>> {
        loop {
            if let Some(probe) = &mut self.probe {
                if let Some(inner) = self.inner.next_tuple()? {
                    return Ok(Some(concat_tuples(
                        &self.outer_attrs,
                        &probe.outer,
                        &self.inner_attrs,
                        &inner,
                    )?));
                }
                if self.op == CompOp::Ne && !probe.second_range {
                    probe.second_range = true;
                    self.inner
                        .set_iterator(probe.key.as_ref(), None, false, false)?;
                    continue;
                }
                self.probe = None;
            }

            let Some(outer) = self.outer.next_tuple()? else {
                return Ok(None);
            };
            let key = tuple_field(&self.outer_attrs, &outer, self.outer_position)?;
            if key.is_none() && self.op != CompOp::NoOp {
                continue;
            }
            self.start_probe(key.as_ref())?;
            self.probe = Some(Probe {
                outer,
                key,
                second_range: false,
            });
        }
    }

    fn attributes(&self) -> Vec<Attribute> {
        let mut attrs = self.outer_attrs.clone();
        attrs.extend(self.inner_attrs.iter().cloned());
        attrs
    }
}
