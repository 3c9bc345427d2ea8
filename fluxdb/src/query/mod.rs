//! Backend-agnostic query: an ordered list of named filters plus an
//! operation type, target model and data.
//!
//! Filter names are not validated here. The storage backend resolves them
//! and ignores the ones it does not know.

use crate::model::Value;
use indexmap::IndexMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QueryType {
    #[default]
    Select,
    Insert,
    Update,
    Delete,
    Count,
}

impl QueryType {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "select" => Some(QueryType::Select),
            "insert" => Some(QueryType::Insert),
            "update" => Some(QueryType::Update),
            "delete" => Some(QueryType::Delete),
            "count" => Some(QueryType::Count),
            _ => None,
        }
    }
}

/// One positional filter parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Value(Value),
    List(Vec<Value>),
}

impl Param {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Param::Value(v) => Some(v),
            Param::List(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_value().and_then(Value::as_str)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self.as_value()? {
            Value::Integer(n) => Some(*n),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

macro_rules! param_from {
    ($($t:ty),*) => {
        $(impl From<$t> for Param {
            fn from(value: $t) -> Self {
                Param::Value(value.into())
            }
        })*
    };
}

param_from!(Value, &str, String, i64, i32, f64, bool);

impl<T: Into<Value>> FromIterator<T> for Param {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Param::List(iter.into_iter().map(Into::into).collect())
    }
}

/// A named filter directive with positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub name: String,
    pub params: Vec<Param>,
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:?})", self.name, self.params)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    filters: Vec<Filter>,
    model_name: String,
    query_type: QueryType,
    data: IndexMap<String, Value>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_model(model_name: &str) -> Self {
        Query {
            model_name: model_name.to_string(),
            ..Self::default()
        }
    }

    /// Append a filter. Chainable; order of calls is the order of application.
    pub fn filter(mut self, name: &str, params: Vec<Param>) -> Self {
        self.push_filter(name, params);
        self
    }

    pub fn push_filter(&mut self, name: &str, params: Vec<Param>) -> &mut Self {
        self.filters.push(Filter {
            name: name.to_string(),
            params,
        });
        self
    }

    /// All filters, or only those named `name`, in insertion order.
    pub fn filters(&self, name: Option<&str>) -> Vec<&Filter> {
        self.filters
            .iter()
            .filter(|f| name.map_or(true, |n| f.name == n))
            .collect()
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn set_model_name(&mut self, name: &str) -> &mut Self {
        self.model_name = name.to_string();
        self
    }

    pub fn query_type(&self) -> QueryType {
        self.query_type
    }

    pub fn set_type(&mut self, query_type: QueryType) -> &mut Self {
        self.query_type = query_type;
        self
    }

    /// Set the type by name. Unknown names leave the type unchanged.
    pub fn set_type_name(&mut self, name: &str) -> &mut Self {
        match QueryType::parse(name) {
            Some(t) => self.query_type = t,
            None => log::warn!("Ignoring unknown query type '{name}'"),
        }
        self
    }

    /// Shallow-merge `data` over the existing data.
    pub fn set_data(&mut self, data: IndexMap<String, Value>) -> &mut Self {
        self.data.extend(data);
        self
    }

    pub fn data(&self) -> &IndexMap<String, Value> {
        &self.data
    }

    /// Stable text form of the filters, used as a cache key.
    pub fn fingerprint(&self) -> String {
        let filters: Vec<String> = self.filters.iter().map(ToString::to_string).collect();
        format!("{}:{:?}:{}", self.model_name, self.query_type, filters.join("|"))
    }

    // ── Convenience builders for the canonical vocabulary ────────────

    pub fn equal(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter("equal", vec![Param::from(field), Param::Value(value.into())])
    }

    pub fn not(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter("not", vec![Param::from(field), Param::Value(value.into())])
    }

    pub fn gt(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter("gt", vec![Param::from(field), Param::Value(value.into())])
    }

    pub fn gte(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter("gte", vec![Param::from(field), Param::Value(value.into())])
    }

    pub fn lt(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter("lt", vec![Param::from(field), Param::Value(value.into())])
    }

    pub fn lte(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter("lte", vec![Param::from(field), Param::Value(value.into())])
    }

    pub fn range(self, field: &str, lower: impl Into<Value>, upper: impl Into<Value>) -> Self {
        self.filter(
            "range",
            vec![
                Param::from(field),
                Param::Value(lower.into()),
                Param::Value(upper.into()),
            ],
        )
    }

    pub fn like(self, field: &str, pattern: &str) -> Self {
        self.filter("like", vec![Param::from(field), Param::from(pattern)])
    }

    pub fn is_in<T: Into<Value>>(self, field: &str, values: impl IntoIterator<Item = T>) -> Self {
        self.filter("in", vec![Param::from(field), values.into_iter().collect()])
    }

    pub fn order(self, field: &str, direction: Option<&str>) -> Self {
        let mut params = vec![Param::from(field)];
        if let Some(direction) = direction {
            params.push(Param::from(direction));
        }
        self.filter("order", params)
    }

    pub fn limit(self, offset: i64, count: i64) -> Self {
        self.filter("limit", vec![Param::from(offset), Param::from(count)])
    }

    /// Narrow to at most one record, keeping any offset already set.
    pub fn first(self) -> Self {
        let window = self
            .filters
            .iter()
            .rev()
            .filter(|f| f.name == "limit")
            .find_map(|f| {
                match (
                    f.params.first().and_then(Param::as_i64),
                    f.params.get(1).and_then(Param::as_i64),
                ) {
                    (Some(offset), Some(count)) => Some((offset, count)),
                    (Some(count), None) => Some((0, count)),
                    _ => None,
                }
            });
        let (offset, count) = window.unwrap_or((0, 1));
        self.limit(offset, count.min(1))
    }

    pub fn select(self, fields: &[&str]) -> Self {
        self.filter("select", fields.iter().map(|f| Param::from(*f)).collect())
    }

    pub fn distinct(self) -> Self {
        self.filter("distinct", Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filters_preserve_insertion_order() {
        let query = Query::for_model("Node")
            .equal("title", "a")
            .order("title", None)
            .equal("active", true)
            .limit(0, 10);

        let names: Vec<&str> = query.filters(None).iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["equal", "order", "equal", "limit"]);

        let equals = query.filters(Some("equal"));
        assert_eq!(equals.len(), 2);
        assert_eq!(equals[0].params[1], Param::Value(Value::from("a")));
        assert_eq!(equals[1].params[1], Param::Value(Value::Bool(true)));
    }

    #[test]
    fn test_unknown_filter_is_accepted() {
        let query = Query::new().filter("fuzzy", vec![Param::from("x")]);
        assert_eq!(query.filters(Some("fuzzy")).len(), 1);
    }

    #[test]
    fn test_first_keeps_offset() {
        let limit = |query: Query| query.filters(Some("limit")).last().map(|f| f.params.clone());
        let both = |offset: i64, count: i64| Some(vec![Param::from(offset), Param::from(count)]);

        assert_eq!(limit(Query::new().first()), both(0, 1));
        assert_eq!(limit(Query::new().limit(2, 5).first()), both(2, 1));
        assert_eq!(limit(Query::new().filter("limit", vec![Param::from(4)]).first()), both(0, 1));
        assert_eq!(limit(Query::new().limit(3, 0).first()), both(3, 0));
    }

    #[test]
    fn test_illegal_type_is_ignored() {
        let mut query = Query::new();
        query.set_type(QueryType::Delete);
        query.set_type_name("truncate");
        assert_eq!(query.query_type(), QueryType::Delete);
        query.set_type_name("COUNT");
        assert_eq!(query.query_type(), QueryType::Count);
    }

    #[test]
    fn test_set_data_merges() {
        let mut query = Query::new();
        let mut first = IndexMap::new();
        first.insert("a".to_string(), Value::Integer(1));
        first.insert("b".to_string(), Value::Integer(2));
        query.set_data(first);

        let mut second = IndexMap::new();
        second.insert("b".to_string(), Value::Integer(3));
        second.insert("c".to_string(), Value::Integer(4));
        query.set_data(second);

        let data = query.data();
        assert_eq!(data.len(), 3);
        assert_eq!(data["a"], Value::Integer(1));
        assert_eq!(data["b"], Value::Integer(3));
        assert_eq!(data["c"], Value::Integer(4));
    }

    #[test]
    fn test_in_builder_collects_list() {
        let query = Query::new().is_in("title", ["Node 1", "Node 2"]);
        let filter = &query.filters(Some("in"))[0];
        assert_eq!(
            filter.params[1],
            Param::List(vec![Value::from("Node 1"), Value::from("Node 2")])
        );
    }

    #[test]
    fn test_fingerprint_differs_by_filters() {
        let a = Query::for_model("Node").equal("title", "a");
        let b = Query::for_model("Node").equal("title", "b");
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint(), a.clone().fingerprint());
    }
}
