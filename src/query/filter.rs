//! Filter objects from `filter[objects]`.

use crate::error::ApiError;
use serde_json::Value;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operator {
    IsNull,
    IsNotNull,
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    In,
    NotIn,
    Like,
    ILike,
    NotLike,
    /// A to-one relation whose target matches the nested filter.
    Has,
    /// A to-many relation with at least one target matching the nested filter.
    Any,
}

impl Operator {
    pub fn is_unary(&self) -> bool {
        matches!(self, Operator::IsNull | Operator::IsNotNull)
    }

    pub fn is_relational(&self) -> bool {
        matches!(self, Operator::Has | Operator::Any)
    }

    /// SQL comparison operator for binary column comparisons.
    pub fn sql(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "<>",
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Ge => ">=",
            Operator::Le => "<=",
            Operator::Like => "LIKE",
            Operator::ILike => "ILIKE",
            Operator::NotLike => "NOT LIKE",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
            Operator::IsNull => "IS NULL",
            Operator::IsNotNull => "IS NOT NULL",
            Operator::Has | Operator::Any => "EXISTS",
        }
    }
}

impl FromStr for Operator {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "is_null" => Operator::IsNull,
            "is_not_null" => Operator::IsNotNull,
            "==" | "eq" | "equals" | "equal_to" => Operator::Eq,
            "!=" | "ne" | "neq" | "not_equal_to" | "does_not_equal" => Operator::Ne,
            ">" | "gt" => Operator::Gt,
            "<" | "lt" => Operator::Lt,
            ">=" | "ge" | "gte" | "geq" => Operator::Ge,
            "<=" | "le" | "lte" | "leq" => Operator::Le,
            "in" => Operator::In,
            "not_in" => Operator::NotIn,
            "like" => Operator::Like,
            "ilike" => Operator::ILike,
            "not_like" => Operator::NotLike,
            "has" => Operator::Has,
            "any" => Operator::Any,
            other => return Err(ApiError::BadRequest(format!("unknown operator \"{}\"", other))),
        })
    }
}

/// Right-hand side of a comparison.
#[derive(Clone, Debug, PartialEq)]
pub enum Argument {
    None,
    Value(Value),
    /// Another column of the same resource.
    Field(String),
    /// Nested filter applied to a related resource.
    Filter(Box<Filter>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    Compare { name: String, op: Operator, arg: Argument },
    Or(Vec<Filter>),
    And(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn compare(name: &str, op: Operator, val: Value) -> Self {
        Filter::Compare {
            name: name.to_string(),
            op,
            arg: Argument::Value(val),
        }
    }

    /// Parse one filter object.
    pub fn from_value(v: &Value) -> Result<Self, ApiError> {
        let obj = v
            .as_object()
            .ok_or_else(|| ApiError::BadRequest(format!("filter must be an object, got {}", v)))?;
        if let Some(list) = obj.get("or") {
            return Ok(Filter::Or(Self::from_list(list)?));
        }
        if let Some(list) = obj.get("and") {
            return Ok(Filter::And(Self::from_list(list)?));
        }
        if let Some(inner) = obj.get("not") {
            return Ok(Filter::Not(Box::new(Self::from_value(inner)?)));
        }
        let name = obj
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ApiError::BadRequest("filter object requires a \"name\"".into()))?;
        let op: Operator = obj
            .get("op")
            .and_then(Value::as_str)
            .ok_or_else(|| ApiError::BadRequest("filter object requires an \"op\"".into()))?
            .parse()?;
        let arg = if op.is_unary() {
            Argument::None
        } else if let Some(field) = obj.get("field") {
            let field = field
                .as_str()
                .ok_or_else(|| ApiError::BadRequest("filter \"field\" must be a string".into()))?;
            Argument::Field(field.to_string())
        } else if op.is_relational() {
            match obj.get("val") {
                None | Some(Value::Null) => Argument::None,
                Some(nested) => Argument::Filter(Box::new(Self::from_value(nested)?)),
            }
        } else {
            let val = obj
                .get("val")
                .ok_or_else(|| ApiError::BadRequest(format!("filter on \"{}\" requires \"val\" or \"field\"", name)))?;
            if matches!(op, Operator::In | Operator::NotIn) && !val.is_array() {
                return Err(ApiError::BadRequest(format!("\"{}\" filter needs a list value", name)));
            }
            Argument::Value(val.clone())
        };
        Ok(Filter::Compare {
            name: name.to_string(),
            op,
            arg,
        })
    }

    pub fn from_list(v: &Value) -> Result<Vec<Self>, ApiError> {
        v.as_array()
            .ok_or_else(|| ApiError::BadRequest("filters must be a list".into()))?
            .iter()
            .map(Self::from_value)
            .collect()
    }

    /// Parse the raw `filter[objects]` parameter.
    pub fn parse_objects(raw: &str) -> Result<Vec<Self>, ApiError> {
        let v: Value = serde_json::from_str(raw)
            .map_err(|e| ApiError::BadRequest(format!("Unable to decode filter objects as JSON list: {}", e)))?;
        Self::from_list(&v)
    }
}
