//! Query validation
//!
//! `validate` is a pure function of the raw text and the policy: it parses the
//! text, enforces the policy, rewrites the outermost LIMIT and decides whether
//! the result may be cached. It performs no I/O and keeps no state.

use std::collections::BTreeSet;
use std::ops::ControlFlow;

use sha2::{Digest, Sha256};
use sqlparser::ast::{
    Expr, GroupByExpr, ObjectName, Query, Select, SetExpr, Statement, TableFactor,
    TableWithJoins, Value, Visit, Visitor,
};
use sqlparser::dialect::DuckDbDialect;
use sqlparser::parser::Parser;

use crate::errors::ValidationError;
use crate::policy::{Policy, QueryClass, StatementKind};
use crate::validated::ValidatedQuery;

/// Statement keywords that never start a read query
const NON_READ_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "MERGE", "UPSERT", "REPLACE", "CREATE", "DROP", "ALTER",
    "TRUNCATE", "ATTACH", "DETACH", "INSTALL", "LOAD", "FORCE", "PRAGMA", "COPY", "EXPORT",
    "IMPORT", "SET", "RESET", "CALL", "CHECKPOINT", "VACUUM", "ANALYZE", "GRANT", "REVOKE",
    "USE", "BEGIN", "START", "COMMIT", "ROLLBACK", "ABORT", "PREPARE", "EXECUTE", "DEALLOCATE",
    "COMMENT",
];

const AGGREGATE_FUNCTIONS: &[&str] = &[
    "count", "sum", "avg", "mean", "min", "max", "median", "mode", "stddev", "stddev_samp",
    "stddev_pop", "variance", "var_samp", "var_pop", "quantile", "quantile_cont",
    "quantile_disc", "approx_count_distinct", "approx_quantile", "string_agg", "group_concat",
    "list", "array_agg", "first", "last", "any_value", "arg_min", "arg_max", "argmin", "argmax",
    "bool_and", "bool_or", "corr", "covar_pop", "covar_samp", "product", "histogram", "fsum",
    "sumkahan", "kahan_sum", "entropy", "kurtosis", "skewness", "bit_and", "bit_or", "bit_xor",
    "regr_slope", "regr_intercept", "regr_r2",
];

/// Validate untrusted query text against the policy
pub fn validate(raw_text: &str, policy: &Policy) -> Result<ValidatedQuery, ValidationError> {
    let text = raw_text.trim();
    if text.is_empty() {
        return Err(ValidationError::syntax("query text is empty"));
    }

    let mut statements = match Parser::parse_sql(&DuckDbDialect {}, text) {
        Ok(statements) => statements,
        Err(err) => return Err(classify_parse_failure(text, err.to_string())),
    };

    let mut statement = match statements.len() {
        0 => return Err(ValidationError::syntax("query text contains no statement")),
        1 => statements.remove(0),
        count => return Err(ValidationError::MultiStatementRejected { count }),
    };

    let query = match &mut statement {
        Statement::Query(query) => query,
        other => return Err(ValidationError::statement(leading_keyword_of(other))),
    };
    let kind = StatementKind::Select;
    if !policy.allows_statement(kind) {
        return Err(ValidationError::statement(kind.as_str()));
    }

    let mut walker = PolicyWalker::new(policy);
    walker.walk_query(query)?;

    let row_limit = apply_row_limit(query, policy)?;
    let class = query_class(query);
    let sql = statement.to_string();

    let touches_volatile = walker
        .tables
        .iter()
        .any(|table| policy.is_table_volatile(table));
    let cache_key = if walker.uses_time_relative || touches_volatile || !policy.is_cacheable_class(class) {
        None
    } else {
        Some(cache_key_for(&sql))
    };

    Ok(ValidatedQuery::new(
        sql,
        kind,
        walker.tables,
        row_limit,
        class,
        cache_key,
    ))
}

/// Stable cache key for normalized query text
pub fn cache_key_for(sql: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sql.as_bytes());
    hex::encode(hasher.finalize())
}

fn leading_keyword_of(statement: &Statement) -> String {
    leading_keyword(&statement.to_string()).unwrap_or_else(|| "UNKNOWN".to_string())
}

/// A parse failure is still a `DisallowedStatement` when any segment of the
/// text starts with a non-read keyword the parser does not understand (DuckDB's
/// `ATTACH 'file'`, `INSTALL httpfs`, ...).
fn classify_parse_failure(text: &str, message: String) -> ValidationError {
    let disallowed = text
        .split(';')
        .filter_map(leading_keyword)
        .find(|keyword| NON_READ_KEYWORDS.contains(&keyword.as_str()));

    match disallowed {
        Some(keyword) => ValidationError::statement(keyword),
        None => ValidationError::syntax(message),
    }
}

/// First keyword of a SQL fragment, skipping whitespace, comments and parentheses
fn leading_keyword(fragment: &str) -> Option<String> {
    let mut rest = fragment;
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == '(');
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.split_once('\n').map(|(_, tail)| tail).unwrap_or("");
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.split_once("*/").map(|(_, tail)| tail).unwrap_or("");
        } else {
            break;
        }
    }

    let keyword: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphabetic() || *c == '_')
        .collect();
    if keyword.is_empty() {
        None
    } else {
        Some(keyword.to_ascii_uppercase())
    }
}

/// Clamp or append the LIMIT of the outermost query and return the applied value
fn apply_row_limit(query: &mut Query, policy: &Policy) -> Result<u64, ValidationError> {
    if query.fetch.is_some() {
        return Err(ValidationError::syntax(
            "FETCH clauses are not supported, use LIMIT <n>",
        ));
    }

    let requested = match &query.limit {
        None | Some(Expr::Value(Value::Null)) => None,
        Some(Expr::Value(Value::Number(digits, _))) => Some(digits.parse::<u64>().map_err(|_| {
            ValidationError::syntax("LIMIT must be a non-negative integer literal")
        })?),
        Some(_) => {
            return Err(ValidationError::syntax(
                "LIMIT must be a non-negative integer literal",
            ))
        }
    };

    let applied = match requested {
        Some(limit) if limit <= policy.max_row_cap() => return Ok(limit),
        Some(_) => policy.max_row_cap(),
        None => policy.default_row_cap(),
    };

    query.limit = Some(Expr::Value(Value::Number(applied.to_string(), false)));
    Ok(applied)
}

/// Aggregate when the outermost SELECT groups or aggregates in its projection.
/// Set operations and VALUES bodies are row-level.
fn query_class(query: &Query) -> QueryClass {
    match query.body.as_ref() {
        SetExpr::Select(select) => select_class(select),
        SetExpr::Query(inner) => query_class(inner),
        _ => QueryClass::Detail,
    }
}

fn select_class(select: &Select) -> QueryClass {
    let grouped = match &select.group_by {
        GroupByExpr::All => true,
        GroupByExpr::Expressions(exprs) => !exprs.is_empty(),
    };
    if grouped {
        return QueryClass::Aggregate;
    }

    let mut finder = AggregateFinder::default();
    match select.projection.visit(&mut finder) {
        ControlFlow::Break(()) => QueryClass::Aggregate,
        ControlFlow::Continue(()) => QueryClass::Detail,
    }
}

fn object_name(name: &ObjectName) -> String {
    name.0
        .iter()
        .map(|ident| ident.value.to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join(".")
}

fn function_name(name: &ObjectName) -> String {
    name.0
        .last()
        .map(|ident| ident.value.to_ascii_lowercase())
        .unwrap_or_default()
}

fn node_id(expr: &Expr) -> usize {
    expr as *const Expr as usize
}

fn subquery_of(expr: &Expr) -> Option<&Query> {
    match expr {
        Expr::Subquery(query) | Expr::ArraySubquery(query) => Some(&**query),
        Expr::Exists { subquery, .. } | Expr::InSubquery { subquery, .. } => Some(&**subquery),
        _ => None,
    }
}

/// Finds a plain (non-window) aggregate call outside any subquery
#[derive(Default)]
struct AggregateFinder {
    subquery_depth: usize,
}

impl Visitor for AggregateFinder {
    type Break = ();

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        if subquery_of(expr).is_some() {
            self.subquery_depth += 1;
            return ControlFlow::Continue(());
        }
        if self.subquery_depth > 0 {
            return ControlFlow::Continue(());
        }
        match expr {
            Expr::ArrayAgg(_) => ControlFlow::Break(()),
            Expr::Function(function)
                if function.over.is_none()
                    && AGGREGATE_FUNCTIONS.contains(&function_name(&function.name).as_str()) =>
            {
                ControlFlow::Break(())
            }
            _ => ControlFlow::Continue(()),
        }
    }

    fn post_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        if subquery_of(expr).is_some() {
            self.subquery_depth -= 1;
        }
        ControlFlow::Continue(())
    }
}

/// Walks the parsed query collecting tables and enforcing the policy.
///
/// Query structure (CTEs, set operations, FROM clauses, derived tables) is
/// walked explicitly so CTE names can be scoped: each query pushes a frame, and
/// a CTE's name enters its query's frame only after the CTE body was walked,
/// so a CTE can never shadow a real table from inside its own definition.
/// Expressions go through the sqlparser `Visitor`; a subquery found inside an
/// expression is walked explicitly and the visitor skips its nodes.
struct PolicyWalker<'a> {
    policy: &'a Policy,
    scopes: Vec<Vec<String>>,
    tables: BTreeSet<String>,
    uses_time_relative: bool,
    skipping: Option<usize>,
}

impl<'a> PolicyWalker<'a> {
    fn new(policy: &'a Policy) -> Self {
        Self {
            policy,
            scopes: Vec::new(),
            tables: BTreeSet::new(),
            uses_time_relative: false,
            skipping: None,
        }
    }

    fn walk_query(&mut self, query: &Query) -> Result<(), ValidationError> {
        if !query.locks.is_empty() {
            return Err(ValidationError::statement("SELECT FOR UPDATE"));
        }

        self.scopes.push(Vec::new());
        let outcome = self.walk_query_in_scope(query);
        self.scopes.pop();
        outcome
    }

    fn walk_query_in_scope(&mut self, query: &Query) -> Result<(), ValidationError> {
        if let Some(with) = &query.with {
            if with.recursive {
                return Err(ValidationError::statement("WITH RECURSIVE"));
            }
            for cte in &with.cte_tables {
                self.walk_query(&cte.query)?;
                let name = cte.alias.name.value.to_ascii_lowercase();
                if let Some(scope) = self.scopes.last_mut() {
                    scope.push(name);
                }
            }
        }

        self.walk_set_expr(&query.body)?;
        self.check_exprs(&query.order_by)?;
        self.check_exprs(&query.limit)?;
        self.check_exprs(&query.limit_by)?;
        self.check_exprs(&query.offset)
    }

    /// Read-only body shapes; anything else inside a query (DML bodies,
    /// `TABLE x`) is refused by its leading keyword.
    fn walk_set_expr(&mut self, body: &SetExpr) -> Result<(), ValidationError> {
        match body {
            SetExpr::Select(select) => self.walk_select(select),
            SetExpr::Query(query) => self.walk_query(query),
            SetExpr::SetOperation { left, right, .. } => {
                self.walk_set_expr(left)?;
                self.walk_set_expr(right)
            }
            SetExpr::Values(values) => self.check_exprs(values),
            other => Err(ValidationError::statement(
                leading_keyword(&other.to_string()).unwrap_or_else(|| "UNKNOWN".to_string()),
            )),
        }
    }

    fn walk_select(&mut self, select: &Select) -> Result<(), ValidationError> {
        if select.into.is_some() {
            return Err(ValidationError::statement("SELECT INTO"));
        }
        for table in &select.from {
            self.walk_table_with_joins(table)?;
        }

        // Every other clause only holds expressions
        let mut clauses = select.clone();
        clauses.from.clear();
        self.check_exprs(&clauses)
    }

    fn walk_table_with_joins(&mut self, table: &TableWithJoins) -> Result<(), ValidationError> {
        self.walk_table_factor(&table.relation)?;
        for join in &table.joins {
            self.walk_table_factor(&join.relation)?;
            self.check_exprs(&join.join_operator)?;
        }
        Ok(())
    }

    fn walk_table_factor(&mut self, factor: &TableFactor) -> Result<(), ValidationError> {
        match factor {
            TableFactor::Table {
                name,
                args: Some(_),
                ..
            }
            | TableFactor::Function { name, .. } => Err(ValidationError::DisallowedFunction {
                function: function_name(name),
            }),
            TableFactor::TableFunction { expr, .. } => {
                let function = match expr {
                    Expr::Function(function) => function_name(&function.name),
                    _ => "table".to_string(),
                };
                Err(ValidationError::DisallowedFunction { function })
            }
            TableFactor::Table {
                name, with_hints, ..
            } => {
                self.check_relation(name)?;
                self.check_exprs(with_hints)
            }
            TableFactor::Derived { subquery, .. } => self.walk_query(subquery),
            TableFactor::UNNEST { array_exprs, .. } => self.check_exprs(array_exprs),
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => self.walk_table_with_joins(table_with_joins),
            TableFactor::Pivot {
                table,
                aggregate_function,
                ..
            } => {
                self.walk_table_factor(table)?;
                self.check_exprs(aggregate_function)
            }
            TableFactor::Unpivot { table, .. } => self.walk_table_factor(table),
        }
    }

    fn check_relation(&mut self, relation: &ObjectName) -> Result<(), ValidationError> {
        let table = object_name(relation);
        if relation.0.len() == 1 && self.is_cte_in_scope(&table) {
            return Ok(());
        }
        if !self.policy.is_table_allowed(&table) {
            return Err(self.disallowed_table(table));
        }
        self.tables.insert(table);
        Ok(())
    }

    fn check_exprs<T: Visit>(&mut self, node: &T) -> Result<(), ValidationError> {
        match node.visit(self) {
            ControlFlow::Break(err) => Err(err),
            ControlFlow::Continue(()) => Ok(()),
        }
    }

    fn is_cte_in_scope(&self, name: &str) -> bool {
        self.scopes
            .iter()
            .any(|scope| scope.iter().any(|cte| cte == name))
    }

    fn check_function(&mut self, name: &str) -> ControlFlow<ValidationError> {
        if self.policy.is_function_disallowed(name) {
            return ControlFlow::Break(ValidationError::DisallowedFunction {
                function: name.to_string(),
            });
        }
        self.note_time_relative(name);
        ControlFlow::Continue(())
    }

    fn note_time_relative(&mut self, token: &str) {
        if self.policy.is_time_relative(token) {
            self.uses_time_relative = true;
        }
    }

    fn disallowed_table(&self, table: String) -> ValidationError {
        ValidationError::DisallowedTable {
            table,
            allowed: self.policy.allowed_tables().map(str::to_string).collect(),
        }
    }
}

impl Visitor for PolicyWalker<'_> {
    type Break = ValidationError;

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<Self::Break> {
        if self.skipping.is_some() {
            return ControlFlow::Continue(());
        }
        match self.check_relation(relation) {
            Ok(()) => ControlFlow::Continue(()),
            Err(err) => ControlFlow::Break(err),
        }
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        if self.skipping.is_some() {
            return ControlFlow::Continue(());
        }

        if let Some(subquery) = subquery_of(expr) {
            if let Expr::InSubquery { expr: operand, .. } = expr {
                if let Err(err) = self.check_exprs(operand) {
                    return ControlFlow::Break(err);
                }
            }
            if let Err(err) = self.walk_query(subquery) {
                return ControlFlow::Break(err);
            }
            self.skipping = Some(node_id(expr));
            return ControlFlow::Continue(());
        }

        match expr {
            Expr::Function(function) => self.check_function(&function_name(&function.name)),
            Expr::Identifier(ident) => {
                self.note_time_relative(&ident.value.to_ascii_lowercase());
                ControlFlow::Continue(())
            }
            _ => ControlFlow::Continue(()),
        }
    }

    fn post_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        if self.skipping == Some(node_id(expr)) {
            self.skipping = None;
        }
        ControlFlow::Continue(())
    }
}
