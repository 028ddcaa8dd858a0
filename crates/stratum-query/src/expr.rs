//! Constrained filter algebra over mapped properties.
//!
//! Filters reference properties by name, not columns; the fetch plan
//! resolves names to qualified columns when the SQL is assembled. This is
//! deliberately not a general SQL expression language.

use stratum_core::{Result, Value};

/// A filter over mapped single-column properties.
#[derive(Debug, Clone)]
pub enum Filter {
    /// `property = ?`
    Eq(String, Value),
    /// `property <> ?`
    Ne(String, Value),
    /// `property < ?`
    Lt(String, Value),
    /// `property <= ?`
    Le(String, Value),
    /// `property > ?`
    Gt(String, Value),
    /// `property >= ?`
    Ge(String, Value),
    /// `property LIKE ?`
    Like(String, String),
    /// `property IN (?, ...)`
    In(String, Vec<Value>),
    /// `property IS NULL`
    IsNull(String),
    /// `property IS NOT NULL`
    IsNotNull(String),
    /// All conditions hold.
    And(Vec<Filter>),
    /// Any condition holds.
    Or(Vec<Filter>),
    /// Condition does not hold.
    Not(Box<Filter>),
}

impl Filter {
    /// Combine with another filter under AND.
    pub fn and(self, other: Filter) -> Filter {
        match self {
            Filter::And(mut parts) => {
                parts.push(other);
                Filter::And(parts)
            }
            first => Filter::And(vec![first, other]),
        }
    }

    /// Combine with another filter under OR.
    pub fn or(self, other: Filter) -> Filter {
        match self {
            Filter::Or(mut parts) => {
                parts.push(other);
                Filter::Or(parts)
            }
            first => Filter::Or(vec![first, other]),
        }
    }

    /// Render to SQL, appending bind parameters to `params`.
    ///
    /// `column_of` maps a property name to its qualified column
    /// expression and fails for unknown or non-filterable properties.
    pub fn build(
        &self,
        column_of: &dyn Fn(&str) -> Result<String>,
        params: &mut Vec<Value>,
    ) -> Result<String> {
        fn binary(
            column_of: &dyn Fn(&str) -> Result<String>,
            params: &mut Vec<Value>,
            property: &str,
            op: &str,
            value: &Value,
        ) -> Result<String> {
            let column = column_of(property)?;
            params.push(value.clone());
            Ok(format!("{} {} ${}", column, op, params.len()))
        }

        match self {
            Filter::Eq(p, v) => binary(column_of, params, p, "=", v),
            Filter::Ne(p, v) => binary(column_of, params, p, "<>", v),
            Filter::Lt(p, v) => binary(column_of, params, p, "<", v),
            Filter::Le(p, v) => binary(column_of, params, p, "<=", v),
            Filter::Gt(p, v) => binary(column_of, params, p, ">", v),
            Filter::Ge(p, v) => binary(column_of, params, p, ">=", v),
            Filter::Like(p, pattern) => binary(
                column_of,
                params,
                p,
                "LIKE",
                &Value::Text(pattern.clone()),
            ),
            Filter::In(p, values) => {
                let column = column_of(p)?;
                let mut placeholders = Vec::with_capacity(values.len());
                for v in values {
                    params.push(v.clone());
                    placeholders.push(format!("${}", params.len()));
                }
                if placeholders.is_empty() {
                    // IN over the empty set matches nothing
                    Ok("1 = 0".to_string())
                } else {
                    Ok(format!("{} IN ({})", column, placeholders.join(", ")))
                }
            }
            Filter::IsNull(p) => Ok(format!("{} IS NULL", column_of(p)?)),
            Filter::IsNotNull(p) => Ok(format!("{} IS NOT NULL", column_of(p)?)),
            Filter::And(parts) => {
                let rendered = parts
                    .iter()
                    .map(|f| f.build(column_of, params))
                    .collect::<Result<Vec<_>>>()?;
                Ok(format!("({})", rendered.join(" AND ")))
            }
            Filter::Or(parts) => {
                let rendered = parts
                    .iter()
                    .map(|f| f.build(column_of, params))
                    .collect::<Result<Vec<_>>>()?;
                Ok(format!("({})", rendered.join(" OR ")))
            }
            Filter::Not(inner) => Ok(format!("NOT ({})", inner.build(column_of, params)?)),
        }
    }
}
