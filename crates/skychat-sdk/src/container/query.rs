//! 记录查询：谓词、排序、分页与 include
//!
//! 同一个 `Query` 既能序列化成 Skygear 的查询 JSON（HTTP 容器），
//! 也能在进程内直接对记录求值（内存容器）。

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::cmp::Ordering;

use super::record::{parse_date, parse_reference, Record};

/// 查询谓词
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(String, Value),
    Lt(String, Value),
    Gt(String, Value),
    And(Vec<Predicate>),
}

impl Predicate {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Predicate::Eq(field.to_string(), value.into())
    }

    pub fn lt(field: &str, value: impl Into<Value>) -> Self {
        Predicate::Lt(field.to_string(), value.into())
    }

    pub fn gt(field: &str, value: impl Into<Value>) -> Self {
        Predicate::Gt(field.to_string(), value.into())
    }

    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::And(mut items) => {
                items.push(other);
                Predicate::And(items)
            }
            first => Predicate::And(vec![first, other]),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Predicate::Eq(f, v) => json!(["eq", keypath(f), v]),
            Predicate::Lt(f, v) => json!(["lt", keypath(f), v]),
            Predicate::Gt(f, v) => json!(["gt", keypath(f), v]),
            Predicate::And(items) => {
                let mut out = vec![json!("and")];
                out.extend(items.iter().map(Predicate::to_json));
                Value::Array(out)
            }
        }
    }

    /// 在本地对记录求值
    pub fn matches(&self, record: &Record) -> bool {
        let ordering = |field: &str, value: &Value| -> Option<Ordering> {
            record.field_value(field).and_then(|actual| compare_values(&actual, value))
        };
        match self {
            Predicate::Eq(f, v) => ordering(f, v) == Some(Ordering::Equal),
            Predicate::Lt(f, v) => ordering(f, v) == Some(Ordering::Less),
            Predicate::Gt(f, v) => ordering(f, v) == Some(Ordering::Greater),
            Predicate::And(items) => items.iter().all(|p| p.matches(record)),
        }
    }
}

fn keypath(field: &str) -> Value {
    json!({ "$type": "keypath", "$val": field })
}

/// 可比较的值：日期按时间、引用按 ID、数字按数值
#[derive(Debug, PartialEq)]
enum Comparable {
    Date(DateTime<Utc>),
    Number(f64),
    Text(String),
    Bool(bool),
}

fn comparable(value: &Value) -> Option<Comparable> {
    match value {
        Value::Object(_) => parse_date(value)
            .map(Comparable::Date)
            .or_else(|| parse_reference(value).map(|id| Comparable::Text(id.to_string()))),
        Value::Number(n) => n.as_f64().map(Comparable::Number),
        Value::String(s) => Some(Comparable::Text(s.clone())),
        Value::Bool(b) => Some(Comparable::Bool(*b)),
        _ => None,
    }
}

pub(crate) fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (comparable(a), comparable(b)) {
        (Some(Comparable::Date(x)), Some(Comparable::Text(y))) => {
            parse_date(&Value::String(y)).map(|y| x.cmp(&y))
        }
        (Some(Comparable::Text(x)), Some(Comparable::Date(y))) => {
            parse_date(&Value::String(x)).map(|x| x.cmp(&y))
        }
        (Some(Comparable::Date(x)), Some(Comparable::Date(y))) => Some(x.cmp(&y)),
        (Some(Comparable::Number(x)), Some(Comparable::Number(y))) => x.partial_cmp(&y),
        (Some(Comparable::Text(x)), Some(Comparable::Text(y))) => Some(x.cmp(&y)),
        (Some(Comparable::Bool(x)), Some(Comparable::Bool(y))) => Some(x.cmp(&y)),
        (None, None) if a == b => Some(Ordering::Equal),
        _ => None,
    }
}

/// 排序条件
#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    pub field: String,
    pub ascending: bool,
}

impl Sort {
    pub fn asc(field: &str) -> Self {
        Self { field: field.to_string(), ascending: true }
    }

    pub fn desc(field: &str) -> Self {
        Self { field: field.to_string(), ascending: false }
    }
}

/// 记录查询
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub record_type: String,
    pub predicate: Option<Predicate>,
    pub sort: Vec<Sort>,
    pub limit: Option<usize>,
    /// 需要随结果一起返回的引用字段
    pub include: Vec<String>,
}

impl Query {
    pub fn new(record_type: &str) -> Self {
        Self {
            record_type: record_type.to_string(),
            predicate: None,
            sort: Vec::new(),
            limit: None,
            include: Vec::new(),
        }
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    pub fn sort_by(mut self, sort: Sort) -> Self {
        self.sort.push(sort);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn include(mut self, field: &str) -> Self {
        self.include.push(field.to_string());
        self
    }

    pub fn matches(&self, record: &Record) -> bool {
        record.record_type() == self.record_type
            && self.predicate.as_ref().map_or(true, |p| p.matches(record))
    }

    /// 按排序条件比较两条记录
    pub fn compare(&self, a: &Record, b: &Record) -> Ordering {
        for sort in &self.sort {
            let ordering = match (a.field_value(&sort.field), b.field_value(&sort.field)) {
                (Some(x), Some(y)) => compare_values(&x, &y).unwrap_or(Ordering::Equal),
                (Some(_), None) => Ordering::Greater,
                (None, Some(_)) => Ordering::Less,
                (None, None) => Ordering::Equal,
            };
            let ordering = if sort.ascending { ordering } else { ordering.reverse() };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("record_type".to_string(), json!(self.record_type));
        if let Some(predicate) = &self.predicate {
            obj.insert("predicate".to_string(), predicate.to_json());
        }
        if !self.sort.is_empty() {
            let sort: Vec<Value> = self
                .sort
                .iter()
                .map(|s| json!([keypath(&s.field), if s.ascending { "asc" } else { "desc" }]))
                .collect();
            obj.insert("sort".to_string(), Value::Array(sort));
        }
        if let Some(limit) = self.limit {
            obj.insert("limit".to_string(), json!(limit));
        }
        if !self.include.is_empty() {
            let include: Map<String, Value> = self
                .include
                .iter()
                .map(|field| (field.clone(), keypath(field)))
                .collect();
            obj.insert("include".to_string(), Value::Object(include));
        }
        Value::Object(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::record::{date_value, reference_value, RecordId};
    use chrono::TimeZone;

    fn message(key: &str, conversation: &str, minute: u32) -> Record {
        let mut record = Record::new(RecordId::new("message", key));
        record.set_reference("conversation_id", &RecordId::new("conversation", conversation));
        record.created_at = Some(Utc.with_ymd_and_hms(2017, 3, 1, 12, minute, 0).unwrap());
        record
    }

    #[test]
    fn test_reference_and_date_predicates() {
        let conv = RecordId::new("conversation", "c1");
        let before = Utc.with_ymd_and_hms(2017, 3, 1, 12, 5, 0).unwrap();
        let query = Query::new("message")
            .filter(Predicate::eq("conversation_id", reference_value(&conv)))
            .filter(Predicate::lt("_created_at", date_value(&before)));

        assert!(query.matches(&message("m1", "c1", 4)));
        assert!(!query.matches(&message("m2", "c1", 5)));
        assert!(!query.matches(&message("m3", "c2", 1)));
    }

    #[test]
    fn test_and_serializes_every_clause() {
        let query = Query::new("message")
            .filter(Predicate::eq("conversation_id", "c1"))
            .filter(Predicate::gt("_created_at", "2017-03-01T12:00:00Z"));
        let json = query.to_json();
        assert_eq!(json["predicate"][0], "and");
        assert_eq!(json["predicate"][1][0], "eq");
        assert_eq!(json["predicate"][2][0], "gt");
    }

    #[test]
    fn test_sort_descending_by_creation() {
        let query = Query::new("message").sort_by(Sort::desc("_created_at"));
        let mut records = vec![message("a", "c", 1), message("b", "c", 3), message("c", "c", 2)];
        records.sort_by(|x, y| query.compare(x, y));
        let keys: Vec<&str> = records.iter().map(|r| r.id.key.as_str()).collect();
        assert_eq!(keys, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_query_json_shape() {
        let query = Query::new("user_conversation")
            .filter(Predicate::eq("user", "u1"))
            .sort_by(Sort::asc("_updated_at"))
            .limit(10)
            .include("conversation");
        let json = query.to_json();
        assert_eq!(json["record_type"], "user_conversation");
        assert_eq!(json["predicate"][0], "eq");
        assert_eq!(json["predicate"][1]["$val"], "user");
        assert_eq!(json["sort"][0][1], "asc");
        assert_eq!(json["limit"], 10);
        assert_eq!(json["include"]["conversation"]["$val"], "conversation");
    }
}
