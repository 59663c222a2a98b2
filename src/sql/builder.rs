//! Composable SELECT fragments with positional parameter accumulation.

use crate::error::{ErrorKind, Result};
use crate::schema::is_valid_identifier;
use serde_json::Value;

const OPERATORS: [&str; 8] = ["=", "!=", "<", "<=", ">", ">=", "LIKE", "IN"];

#[derive(Clone, Debug)]
struct WhereCondition {
    column: String,
    operator: String,
    value: Value,
}

#[derive(Clone, Debug)]
struct OrderBy {
    column: String,
    descending: bool,
}

/// A SELECT under construction. [`QueryParams::build`] is a pure function of
/// the accumulated state: the same inputs always produce the same SQL and the
/// same argument order.
#[derive(Clone, Debug, Default)]
pub struct QueryParams {
    select_columns: Vec<String>,
    wheres: Vec<WhereCondition>,
    order_by: Vec<OrderBy>,
    limit: i64,
    offset: i64,
}

/// Finished SQL plus its positional arguments, in predicate insertion order.
#[derive(Clone, Debug)]
pub struct BuiltQuery {
    pub sql: String,
    pub args: Vec<Value>,
}

impl QueryParams {
    pub fn new() -> Self {
        QueryParams::default()
    }

    /// Set the projection. Empty means `*`.
    pub fn select(mut self, columns: Vec<String>) -> Self {
        self.select_columns = columns;
        self
    }

    /// Add a predicate. The operator must be one of
    /// `=  !=  <  <=  >  >=  LIKE  IN`; anything else is rejected.
    pub fn add_where(
        mut self,
        column: impl Into<String>,
        operator: impl Into<String>,
        value: Value,
    ) -> Result<Self> {
        let operator = operator.into();
        if !OPERATORS.contains(&operator.as_str()) {
            return Err(
                ErrorKind::InvalidInput.with_reason(format!("unsupported operator: {operator}"))
            );
        }
        self.wheres.push(WhereCondition {
            column: column.into(),
            operator,
            value,
        });
        Ok(self)
    }

    pub fn add_order_by(mut self, column: impl Into<String>, descending: bool) -> Self {
        self.order_by.push(OrderBy {
            column: column.into(),
            descending,
        });
        self
    }

    /// Limits at or below zero are omitted from the SQL.
    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    /// Emit `SELECT ... FROM table [WHERE ...] [ORDER BY ...] [LIMIT n
    /// [OFFSET m]]`. Parameters are appended left-to-right in the order the
    /// predicates were added; an `IN` over an array contributes one
    /// placeholder per element.
    pub fn build(&self, table: &str) -> Result<BuiltQuery> {
        if !is_valid_identifier(table) {
            return Err(ErrorKind::InvalidInput.with_reason(format!("invalid table name: {table}")));
        }
        for column in self
            .select_columns
            .iter()
            .chain(self.wheres.iter().map(|w| &w.column))
            .chain(self.order_by.iter().map(|o| &o.column))
        {
            if !is_valid_identifier(column) {
                return Err(
                    ErrorKind::InvalidInput.with_reason(format!("invalid column name: {column}"))
                );
            }
        }

        let projection = if self.select_columns.is_empty() {
            "*".to_string()
        } else {
            self.select_columns.join(", ")
        };

        let mut sql = format!("SELECT {} FROM {}", projection, table);
        let mut args = Vec::new();

        if !self.wheres.is_empty() {
            let mut conditions = Vec::with_capacity(self.wheres.len());
            for w in &self.wheres {
                if w.operator == "IN" {
                    let Value::Array(items) = &w.value else {
                        return Err(ErrorKind::InvalidInput
                            .with_reason(format!("IN predicate on {} requires an array", w.column)));
                    };
                    if items.is_empty() {
                        return Err(ErrorKind::InvalidInput
                            .with_reason(format!("IN predicate on {} requires a non-empty array", w.column)));
                    }
                    let placeholders = vec!["?"; items.len()].join(", ");
                    conditions.push(format!("{} IN ({})", w.column, placeholders));
                    args.extend(items.iter().cloned());
                } else {
                    conditions.push(format!("{} {} ?", w.column, w.operator));
                    args.push(w.value.clone());
                }
            }
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }

        if !self.order_by.is_empty() {
            let parts: Vec<String> = self
                .order_by
                .iter()
                .map(|o| {
                    if o.descending {
                        format!("{} DESC", o.column)
                    } else {
                        o.column.clone()
                    }
                })
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&parts.join(", "));
        }

        if self.limit > 0 {
            sql.push_str(&format!(" LIMIT {}", self.limit));
            if self.offset > 0 {
                sql.push_str(&format!(" OFFSET {}", self.offset));
            }
        }

        Ok(BuiltQuery { sql, args })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_to_star_projection() {
        let q = QueryParams::new().build("users").unwrap();
        assert_eq!(q.sql, "SELECT * FROM users");
        assert!(q.args.is_empty());
    }

    #[test]
    fn full_query_shape_and_arg_order() {
        let q = QueryParams::new()
            .select(vec!["id".into(), "username".into()])
            .add_where("is_active", "=", json!(true))
            .unwrap()
            .add_where("username", "LIKE", json!("a%"))
            .unwrap()
            .add_order_by("created_at", true)
            .limit(10)
            .offset(20)
            .build("users")
            .unwrap();
        assert_eq!(
            q.sql,
            "SELECT id, username FROM users WHERE is_active = ? AND username LIKE ? \
             ORDER BY created_at DESC LIMIT 10 OFFSET 20"
        );
        assert_eq!(q.args, vec![json!(true), json!("a%")]);
    }

    #[test]
    fn in_predicate_expands_placeholders() {
        let q = QueryParams::new()
            .add_where("id", "IN", json!(["a", "b", "c"]))
            .unwrap()
            .build("users")
            .unwrap();
        assert_eq!(q.sql, "SELECT * FROM users WHERE id IN (?, ?, ?)");
        assert_eq!(q.args, vec![json!("a"), json!("b"), json!("c")]);
    }

    #[test]
    fn unknown_operator_rejected() {
        let err = QueryParams::new()
            .add_where("id", "BETWEEN", json!(1))
            .unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::InvalidInput);
    }

    #[test]
    fn offset_needs_limit() {
        let q = QueryParams::new().offset(5).build("users").unwrap();
        assert_eq!(q.sql, "SELECT * FROM users");
        let q = QueryParams::new().limit(0).offset(5).build("users").unwrap();
        assert!(!q.sql.contains("OFFSET"));
    }

    #[test]
    fn build_is_referentially_transparent() {
        let params = QueryParams::new()
            .add_where("email", "=", json!("a@x"))
            .unwrap()
            .limit(1);
        let first = params.build("users").unwrap();
        let second = params.build("users").unwrap();
        assert_eq!(first.sql, second.sql);
        assert_eq!(first.args, second.args);
    }

    #[test]
    fn hostile_identifiers_rejected() {
        assert!(QueryParams::new().build("users; --").is_err());
        let err = QueryParams::new()
            .add_where("email = '' OR 1=1", "=", json!("x"))
            .unwrap()
            .build("users")
            .unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::InvalidInput);
    }
}
