//! Row and record containers moved through the pipeline.
//!
//! A [`SourceRow`] is immutable once extracted. A [`TargetRecord`] is built
//! during transform, has its relationship slots filled by the graph passes,
//! and is then handed to the writer by shared reference, so nothing mutates
//! it after validation.

use indexmap::IndexMap;

use super::value::{Id, Value};

/// One row read from the source schema, as an ordered column map.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRow {
    fields: IndexMap<String, Value>,
}

impl SourceRow {
    /// Build a row from column/value pairs, preserving column order.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Get a column value.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields.get(column)
    }

    /// Get a text column.
    #[must_use]
    pub fn text(&self, column: &str) -> Option<&str> {
        self.fields.get(column).and_then(Value::as_str)
    }

    /// Get an integer column.
    #[must_use]
    pub fn int(&self, column: &str) -> Option<i64> {
        self.fields.get(column).and_then(Value::as_int)
    }

    /// Read a column as an identifier.
    ///
    /// Returns `None` when the column is absent, NULL, or has a shape that
    /// cannot carry an identifier.
    #[must_use]
    pub fn id_value(&self, column: &str) -> Option<Id> {
        self.fields.get(column).and_then(Value::to_id)
    }

    /// Iterate over columns in extraction order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if the row has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// One record destined for a target collection.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetRecord {
    id: Id,
    fields: IndexMap<String, Value>,
}

impl TargetRecord {
    /// Create an empty record with the given identifier.
    pub fn new(id: Id) -> Self {
        Self {
            id,
            fields: IndexMap::new(),
        }
    }

    /// The record identifier.
    #[must_use]
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Set a scalar field.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Set a single-reference field.
    pub fn set_ref(&mut self, field: impl Into<String>, id: Id) {
        self.fields.insert(field.into(), Value::Ref(id));
    }

    /// Append to an ordered reference-list field, creating it if absent.
    pub fn push_ref(&mut self, field: &str, id: Id) {
        match self.fields.get_mut(field) {
            Some(Value::RefList(list)) => list.push(id),
            _ => {
                self.fields
                    .insert(field.to_string(), Value::RefList(vec![id]));
            }
        }
    }

    /// Get a field value.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// The ids in a reference-list field, empty if absent.
    #[must_use]
    pub fn ref_list(&self, field: &str) -> &[Id] {
        match self.fields.get(field) {
            Some(Value::RefList(list)) => list.as_slice(),
            _ => &[],
        }
    }

    /// Iterate over fields in insertion order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Every reference this record carries, single refs and list elements.
    ///
    /// This is the set closure checks walk: a field is a reference exactly
    /// when it holds [`Value::Ref`] or [`Value::RefList`].
    pub fn refs(&self) -> impl Iterator<Item = &Id> {
        self.fields.values().flat_map(|v| match v {
            Value::Ref(id) => std::slice::from_ref(id).iter(),
            Value::RefList(list) => list.iter(),
            _ => [].iter(),
        })
    }
}

/// Everything extracted from the source for one entity: the rows of each
/// record set plus the rows of each relationship edge query.
#[derive(Debug, Default)]
pub struct Extraction {
    sets: IndexMap<String, Vec<SourceRow>>,
    edges: IndexMap<String, Vec<SourceRow>>,
}

impl Extraction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the rows of a record set.
    pub fn insert_set(&mut self, set: impl Into<String>, rows: Vec<SourceRow>) {
        self.sets.insert(set.into(), rows);
    }

    /// Store the rows of a relationship edge query.
    pub fn insert_edges(&mut self, query: impl Into<String>, rows: Vec<SourceRow>) {
        self.edges.insert(query.into(), rows);
    }

    /// The rows of a record set, empty if the set was not extracted.
    #[must_use]
    pub fn set_rows(&self, set: &str) -> &[SourceRow] {
        self.sets.get(set).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The rows of an edge query, empty if it was not extracted.
    #[must_use]
    pub fn edge_rows(&self, query: &str) -> &[SourceRow] {
        self.edges.get(query).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Iterate over record sets in extraction order.
    pub fn sets(&self) -> impl Iterator<Item = (&str, &[SourceRow])> {
        self.sets.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Total row count across all record sets (edge rows excluded).
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.sets.values().map(Vec::len).sum()
    }
}
