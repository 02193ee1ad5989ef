//! Compiled filter predicates. A filter is a nested array expression in the
//! style document; it compiles into a tagged tree that is evaluated against
//! a feature's properties. Anything the compiler cannot make sense of
//! becomes the always-true predicate so a bad style still renders.

use log::warn;
use serde_json::Value as JsonValue;

use crate::tile::{Properties, PropValue};

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All(Vec<Filter>),
    Any(Vec<Filter>),
    None(Vec<Filter>),
    Eq(String, FilterValue),
    Neq(String, FilterValue),
    In(String, Vec<FilterValue>),
    NotIn(String, Vec<FilterValue>),
    Has(String),
    NotHas(String),
    Cmp(Comparison, String, f64),
    True,
}

impl Filter {
    /// Compile a filter value; malformed input degrades to [`Filter::True`].
    pub fn compile(value: &JsonValue) -> Filter {
        match Self::try_compile(value) {
            Ok(filter) => filter,
            Err(reason) => {
                warn!("ignoring malformed filter ({reason}): {value}");
                Filter::True
            }
        }
    }

    fn try_compile(value: &JsonValue) -> Result<Filter, &'static str> {
        let arr = value.as_array().ok_or("not an array")?;
        let op = arr
            .first()
            .and_then(JsonValue::as_str)
            .ok_or("missing operator")?;

        let key = || {
            arr.get(1)
                .and_then(JsonValue::as_str)
                .map(str::to_string)
                .ok_or("missing property key")
        };
        let sub_filters = || {
            arr[1..]
                .iter()
                .map(Self::try_compile)
                .collect::<Result<Vec<_>, _>>()
        };
        let values = || {
            arr[2..]
                .iter()
                .map(FilterValue::try_from)
                .collect::<Result<Vec<_>, _>>()
        };

        let filter = match op {
            "all" => Filter::All(sub_filters()?),
            "any" => Filter::Any(sub_filters()?),
            "none" => Filter::None(sub_filters()?),
            "==" => Filter::Eq(key()?, single(values()?)?),
            "!=" => Filter::Neq(key()?, single(values()?)?),
            "in" => Filter::In(key()?, values()?),
            "!in" => Filter::NotIn(key()?, values()?),
            "has" => Filter::Has(key()?),
            "!has" => Filter::NotHas(key()?),
            "<" | "<=" | ">" | ">=" => {
                let threshold = arr
                    .get(2)
                    .and_then(JsonValue::as_f64)
                    .ok_or("missing comparison value")?;
                Filter::Cmp(Comparison::from_op(op), key()?, threshold)
            }
            // anything this renderer does not understand must not hide
            // features
            _ => Filter::True,
        };

        Ok(filter)
    }

    pub fn eval(&self, props: &Properties) -> bool {
        match self {
            Filter::All(filters) => filters.iter().all(|f| f.eval(props)),
            Filter::Any(filters) => filters.iter().any(|f| f.eval(props)),
            Filter::None(filters) => !filters.iter().any(|f| f.eval(props)),
            Filter::Eq(key, value) => props.get(key).map(|p| value.matches(p)).unwrap_or(false),
            Filter::Neq(key, value) => props.get(key).map(|p| !value.matches(p)).unwrap_or(true),
            Filter::In(key, values) => props
                .get(key)
                .map(|p| values.iter().any(|v| v.matches(p)))
                .unwrap_or(false),
            Filter::NotIn(key, values) => props
                .get(key)
                .map(|p| !values.iter().any(|v| v.matches(p)))
                .unwrap_or(true),
            Filter::Has(key) => props.get(key).map(PropValue::truthy).unwrap_or(false),
            Filter::NotHas(key) => !props.get(key).map(PropValue::truthy).unwrap_or(false),
            Filter::Cmp(cmp, key, threshold) => props
                .get(key)
                .and_then(PropValue::as_num)
                .map(|n| cmp.eval(n, *threshold))
                .unwrap_or(false),
            Filter::True => true,
        }
    }
}

fn single(mut values: Vec<FilterValue>) -> Result<FilterValue, &'static str> {
    if values.len() == 1 {
        Ok(values.remove(0))
    } else {
        Err("expected exactly one comparison value")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Str(String),
    Num(f64),
    Bool(bool),
}

impl FilterValue {
    fn matches(&self, prop: &PropValue) -> bool {
        match (self, prop) {
            (FilterValue::Str(s), PropValue::Str(p)) => p.as_slice() == s.as_bytes(),
            (FilterValue::Num(n), PropValue::Num(p)) => n == p,
            (FilterValue::Bool(b), PropValue::Bool(p)) => b == p,
            _ => false,
        }
    }
}

impl TryFrom<&JsonValue> for FilterValue {
    type Error = &'static str;

    fn try_from(value: &JsonValue) -> Result<Self, Self::Error> {
        match value {
            JsonValue::String(s) => Ok(FilterValue::Str(s.clone())),
            JsonValue::Number(n) => n
                .as_f64()
                .map(FilterValue::Num)
                .ok_or("non-finite filter number"),
            JsonValue::Bool(b) => Ok(FilterValue::Bool(*b)),
            _ => Err("unsupported filter value"),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Lte,
    Gt,
    Gte,
}

impl Comparison {
    fn from_op(op: &str) -> Self {
        match op {
            "<" => Comparison::Lt,
            "<=" => Comparison::Lte,
            ">" => Comparison::Gt,
            _ => Comparison::Gte,
        }
    }

    fn eval(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Lt => value < threshold,
            Comparison::Lte => value <= threshold,
            Comparison::Gt => value > threshold,
            Comparison::Gte => value >= threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(pairs: &[(&str, PropValue)]) -> Properties {
        let mut p = Properties::new();
        for (k, v) in pairs {
            p.insert(*k, v.clone());
        }
        p
    }

    fn s(text: &str) -> PropValue {
        PropValue::Str(text.into())
    }

    #[test]
    fn equality_matches_by_key() {
        let f = Filter::compile(&json!(["==", "class", "motorway"]));
        assert!(f.eval(&props(&[("class", s("motorway"))])));
        assert!(!f.eval(&props(&[("class", s("primary"))])));
        assert!(!f.eval(&props(&[])));
    }

    #[test]
    fn membership_and_exclusion() {
        let f = Filter::compile(&json!(["in", "class", "a", "b"]));
        assert!(f.eval(&props(&[("class", s("b"))])));
        assert!(!f.eval(&props(&[("class", s("c"))])));

        let f = Filter::compile(&json!(["!in", "class", "a", "b"]));
        assert!(!f.eval(&props(&[("class", s("a"))])));
        assert!(f.eval(&props(&[("class", s("c"))])));
        assert!(f.eval(&props(&[])));
    }

    #[test]
    fn all_requires_every_sub_filter() {
        let f = Filter::compile(&json!([
            "all",
            ["==", "class", "motorway"],
            [">=", "rank", 3]
        ]));
        assert!(f.eval(&props(&[
            ("class", s("motorway")),
            ("rank", PropValue::Num(3.0))
        ])));
        assert!(!f.eval(&props(&[
            ("class", s("motorway")),
            ("rank", PropValue::Num(2.0))
        ])));
        assert!(!f.eval(&props(&[("rank", PropValue::Num(9.0))])));
    }

    #[test]
    fn none_is_a_nor() {
        let f = Filter::compile(&json!([
            "none",
            ["==", "class", "a"],
            ["==", "class", "b"]
        ]));
        assert!(f.eval(&props(&[("class", s("c"))])));
        assert!(!f.eval(&props(&[("class", s("a"))])));
    }

    #[test]
    fn has_means_truthy_presence() {
        let f = Filter::compile(&json!(["has", "name"]));
        assert!(f.eval(&props(&[("name", s("Berlin"))])));
        assert!(!f.eval(&props(&[("name", s(""))])));
        assert!(!f.eval(&props(&[("name", PropValue::Num(0.0))])));
        assert!(!f.eval(&props(&[])));

        let f = Filter::compile(&json!(["!has", "name"]));
        assert!(f.eval(&props(&[])));
        assert!(!f.eval(&props(&[("name", s("Berlin"))])));
    }

    #[test]
    fn numeric_comparisons() {
        let f = Filter::compile(&json!(["<", "scalerank", 4]));
        assert!(f.eval(&props(&[("scalerank", PropValue::Num(2.0))])));
        assert!(!f.eval(&props(&[("scalerank", PropValue::Num(4.0))])));
        assert!(!f.eval(&props(&[("scalerank", s("four"))])));
        assert!(!f.eval(&props(&[])));
    }

    #[test]
    fn malformed_or_unknown_filters_accept_everything() {
        for v in [
            json!(42),
            json!(["=="]),
            json!(["curvature", "class", 1]),
            json!([["nested"]]),
        ] {
            let f = Filter::compile(&v);
            assert!(f.eval(&props(&[])), "filter {v} should degrade to true");
        }
    }

    #[test]
    fn evaluation_is_deterministic() {
        let f = Filter::compile(&json!(["all", ["has", "name"], ["!=", "class", "x"]]));
        let p = props(&[("name", s("Oslo")), ("class", s("town"))]);
        let first = f.eval(&p);
        for _ in 0..10 {
            assert_eq!(f.eval(&p), first);
        }
    }
}
