//! Builds parameterized SELECT, INSERT, UPDATE, DELETE and pivot statements
//! from a [`ModelDef`]. Identifiers only ever come from descriptors and are
//! always quoted; values are always bound parameters.

use crate::error::AppError;
use crate::model::{ColumnDef, ModelDef, RelationDef, RelationKind};
use crate::repository::Record;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

const MAIN: &str = "main";
const RELATED: &str = "r";
const PIVOT: &str = "p";
const TRANSLATION: &str = "tr";

/// Quote identifier for PostgreSQL.
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Quotes each dot-separated part: `blog.posts` -> `"blog"."posts"`.
pub fn qualified_name(name: &str) -> String {
    name.split('.').map(quoted).collect::<Vec<_>>().join(".")
}

pub fn qualified_table(model: &ModelDef) -> String {
    format!("{}.{}", quoted(model.schema), quoted(model.table))
}

/// Side tables live in the owning model's schema unless already qualified.
fn side_table(model: &ModelDef, table: &str) -> String {
    if table.contains('.') {
        qualified_name(table)
    } else {
        format!("{}.{}", quoted(model.schema), quoted(table))
    }
}

fn aliased(alias: &str, column: &str) -> String {
    format!("{}.{}", alias, quoted(column))
}

/// Numeric columns come back as text so large values survive JSON.
fn column_expr(alias: &str, col: &ColumnDef) -> String {
    let expr = aliased(alias, col.name);
    if col.sql_type == "numeric" {
        format!("{}::text", expr)
    } else {
        expr
    }
}

/// Visible columns of `model` read through `alias`, each named after the column.
fn column_list(model: &ModelDef, alias: &str) -> String {
    model
        .visible_columns()
        .map(|c| format!("{} AS {}", column_expr(alias, c), quoted(c.name)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// RETURNING list for write statements.
fn returning_list(model: &ModelDef) -> String {
    model
        .visible_columns()
        .map(|c| {
            if c.sql_type == "numeric" {
                format!("{}::text AS {}", quoted(c.name), quoted(c.name))
            } else {
                quoted(c.name)
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf::default()
    }

    fn push_param(&mut self, v: Value) -> usize {
        self.params.push(v);
        self.params.len()
    }

    /// Binds `v` and returns its placeholder, cast when a type is known.
    /// Strings headed for a json column are sent as JSON text.
    fn placeholder(&mut self, v: Value, cast: Option<&str>) -> String {
        let v = match (&v, cast) {
            (Value::String(_), Some("json" | "jsonb")) => Value::String(v.to_string()),
            _ => v,
        };
        let n = self.push_param(v);
        match cast {
            Some(t) => format!("${}::{}", n, t),
            None => format!("${}", n),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    /// Client sort directions are `ascend` / `descend`; anything else is ignored.
    pub fn from_sort(s: &str) -> Option<Self> {
        match s {
            "ascend" => Some(Direction::Asc),
            "descend" => Some(Direction::Desc),
            _ => None,
        }
    }

    fn as_sql(&self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "<>")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "like")]
    Like,
    #[serde(rename = "ilike")]
    ILike,
}

impl Op {
    fn as_sql(&self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "<>",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
            Op::Like => "LIKE",
            Op::ILike => "ILIKE",
        }
    }

    fn is_pattern(&self) -> bool {
        matches!(self, Op::Like | Op::ILike)
    }
}

impl FromStr for Op {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "=" => Op::Eq,
            "!=" | "<>" => Op::Ne,
            "<" => Op::Lt,
            "<=" => Op::Le,
            ">" => Op::Gt,
            ">=" => Op::Ge,
            "like" => Op::Like,
            "ilike" => Op::ILike,
            other => return Err(AppError::Internal(format!("unsupported operator '{}'", other))),
        })
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// `column op value`, the unit of `where` options.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub column: String,
    pub op: Op,
    pub value: Value,
}

impl Condition {
    pub fn new(column: impl Into<String>, op: Op, value: Value) -> Self {
        Condition {
            column: column.into(),
            op,
            value,
        }
    }

    pub fn eq(column: impl Into<String>, value: Value) -> Self {
        Self::new(column, Op::Eq, value)
    }
}

fn render_condition(buf: &mut QueryBuf, model: &ModelDef, alias: &str, cond: &Condition) -> String {
    let column = aliased(alias, &cond.column);
    if cond.op.is_pattern() {
        let ph = buf.placeholder(cond.value.clone(), Some("text"));
        format!("{}::text {} {}", column, cond.op.as_sql(), ph)
    } else if cond.value.is_null() {
        match cond.op {
            Op::Ne => format!("{} IS NOT NULL", column),
            _ => format!("{} IS NULL", column),
        }
    } else {
        let ph = buf.placeholder(cond.value.clone(), model.cast_for(&cond.column));
        format!("{} {} {}", column, cond.op.as_sql(), ph)
    }
}

/// FROM clause and join predicate linking `rel` rows (alias `r`) to `main`.
fn relation_source(owner: &ModelDef, rel: &RelationDef) -> (String, String) {
    let related = rel.related;
    let table = format!("{} {}", qualified_table(related), RELATED);
    let (from, mut link) = match rel.kind {
        RelationKind::BelongsTo { foreign_key, owner_key } => (
            table,
            format!("{} = {}", aliased(RELATED, owner_key), aliased(MAIN, foreign_key)),
        ),
        RelationKind::HasMany { foreign_key, local_key } => (
            table,
            format!("{} = {}", aliased(RELATED, foreign_key), aliased(MAIN, local_key)),
        ),
        RelationKind::BelongsToMany {
            pivot_table,
            foreign_pivot_key,
            related_pivot_key,
            ..
        } => (
            format!(
                "{} JOIN {} {} ON {} = {}",
                table,
                side_table(owner, pivot_table),
                PIVOT,
                aliased(RELATED, related.primary_key),
                aliased(PIVOT, related_pivot_key)
            ),
            format!(
                "{} = {}",
                aliased(PIVOT, foreign_pivot_key),
                aliased(MAIN, owner.primary_key)
            ),
        ),
    };
    if related.soft_deletes {
        link.push_str(&format!(" AND {} IS NULL", aliased(RELATED, "deleted_at")));
    }
    (from, link)
}

fn unknown_relation(model: &ModelDef, name: &str) -> AppError {
    AppError::Internal(format!("relation '{}' is not defined on {}", name, model.table))
}

/// Composable SELECT over one model, aliased `main`.
#[derive(Clone, Debug)]
pub struct Select {
    model: &'static ModelDef,
    projection: Option<Vec<&'static str>>,
    relations: Vec<String>,
    joins: Vec<String>,
    wheres: Vec<String>,
    orders: Vec<String>,
    limit: Option<u64>,
    offset: Option<u64>,
    translated: bool,
    buf: QueryBuf,
}

impl Select {
    pub fn new(model: &'static ModelDef) -> Self {
        Select {
            model,
            projection: None,
            relations: Vec::new(),
            joins: Vec::new(),
            wheres: Vec::new(),
            orders: Vec::new(),
            limit: None,
            offset: None,
            translated: false,
            buf: QueryBuf::new(),
        }
    }

    pub fn model(&self) -> &'static ModelDef {
        self.model
    }

    /// Restricts the projection. `*` keeps every visible column; hidden or
    /// unknown names are rejected.
    pub fn columns(&mut self, names: &[String]) -> Result<&mut Self, AppError> {
        if names.iter().any(|n| n == "*") {
            self.projection = None;
            return Ok(self);
        }
        let mut cols = Vec::with_capacity(names.len());
        for name in names {
            let col = self
                .model
                .visible_columns()
                .find(|c| c.name == name.as_str())
                .ok_or_else(|| AppError::Internal(format!("column '{}' is not selectable", name)))?;
            cols.push(col.name);
        }
        self.projection = Some(cols);
        Ok(self)
    }

    pub fn where_cond(&mut self, cond: &Condition) -> &mut Self {
        let sql = render_condition(&mut self.buf, self.model, MAIN, cond);
        self.wheres.push(sql);
        self
    }

    pub fn where_op(&mut self, column: &str, op: Op, value: Value) -> &mut Self {
        self.where_cond(&Condition::new(column, op, value))
    }

    pub fn where_eq(&mut self, column: &str, value: Value) -> &mut Self {
        self.where_op(column, Op::Eq, value)
    }

    pub fn where_in(&mut self, column: &str, values: &[Value]) -> &mut Self {
        if values.is_empty() {
            self.wheres.push("1 = 0".into());
            return self;
        }
        let cast = self.model.cast_for(column);
        let placeholders: Vec<String> = values
            .iter()
            .map(|v| self.buf.placeholder(v.clone(), cast))
            .collect();
        self.wheres.push(format!(
            "{} IN ({})",
            aliased(MAIN, column),
            placeholders.join(", ")
        ));
        self
    }

    pub fn where_null(&mut self, column: &str) -> &mut Self {
        self.wheres.push(format!("{} IS NULL", aliased(MAIN, column)));
        self
    }

    pub fn where_not_null(&mut self, column: &str) -> &mut Self {
        self.wheres.push(format!("{} IS NOT NULL", aliased(MAIN, column)));
        self
    }

    pub fn where_between(&mut self, column: &str, from: Value, to: Value) -> &mut Self {
        let cast = self.model.cast_for(column);
        let a = self.buf.placeholder(from, cast);
        let b = self.buf.placeholder(to, cast);
        self.wheres
            .push(format!("{} BETWEEN {} AND {}", aliased(MAIN, column), a, b));
        self
    }

    pub fn where_date(&mut self, column: &str, date: Value) -> &mut Self {
        let ph = self.buf.placeholder(date, Some("date"));
        self.wheres
            .push(format!("DATE({}) = {}", aliased(MAIN, column), ph));
        self
    }

    /// OR-group of conditions; an empty group adds nothing.
    pub fn where_any(&mut self, conds: &[Condition]) -> &mut Self {
        if conds.is_empty() {
            return self;
        }
        let parts: Vec<String> = conds
            .iter()
            .map(|c| render_condition(&mut self.buf, self.model, MAIN, c))
            .collect();
        self.wheres.push(format!("({})", parts.join(" OR ")));
        self
    }

    /// Keeps rows having at least one related row matching `conds`.
    pub fn where_has(&mut self, relation: &str, conds: &[Condition]) -> Result<&mut Self, AppError> {
        let rel = self
            .model
            .relation(relation)
            .ok_or_else(|| unknown_relation(self.model, relation))?;
        let (from, mut link) = relation_source(self.model, rel);
        for cond in conds {
            let sql = render_condition(&mut self.buf, rel.related, RELATED, cond);
            link.push_str(" AND ");
            link.push_str(&sql);
        }
        self.wheres
            .push(format!("EXISTS (SELECT 1 FROM {} WHERE {})", from, link));
        Ok(self)
    }

    /// Eager-loads `relation` as a JSON column named after it.
    pub fn with_relation(&mut self, relation: &str) -> Result<&mut Self, AppError> {
        let rel = self
            .model
            .relation(relation)
            .ok_or_else(|| unknown_relation(self.model, relation))?;
        let related = rel.related;
        let (from, link) = relation_source(self.model, rel);
        let mut cols = column_list(related, RELATED);
        let subquery = match rel.kind {
            RelationKind::BelongsTo { .. } => format!(
                "(SELECT row_to_json(sub) FROM (SELECT {} FROM {} WHERE {} LIMIT 1) sub)",
                cols, from, link
            ),
            RelationKind::HasMany { .. } | RelationKind::BelongsToMany { .. } => {
                if let RelationKind::BelongsToMany {
                    foreign_pivot_key,
                    related_pivot_key,
                    pivot_columns,
                    ..
                } = rel.kind
                {
                    let mut pairs = vec![
                        format!("'{}', {}", foreign_pivot_key, aliased(PIVOT, foreign_pivot_key)),
                        format!("'{}', {}", related_pivot_key, aliased(PIVOT, related_pivot_key)),
                    ];
                    pairs.extend(
                        pivot_columns
                            .iter()
                            .map(|c| format!("'{}', {}", c.name, aliased(PIVOT, c.name))),
                    );
                    cols.push_str(&format!(", json_build_object({}) AS \"pivot\"", pairs.join(", ")));
                }
                format!(
                    "(SELECT COALESCE(json_agg(row_to_json(sub)), '[]'::json) FROM (SELECT {} FROM {} WHERE {} ORDER BY {}) sub)",
                    cols,
                    from,
                    link,
                    aliased(RELATED, related.primary_key)
                )
            }
        };
        self.relations
            .push(format!("{} AS {}", subquery, quoted(rel.name)));
        Ok(self)
    }

    /// Reads translated columns for `lang`, falling back to the main table.
    pub fn with_translations(&mut self, lang: &str) -> Result<&mut Self, AppError> {
        let tr = self.model.translations.ok_or_else(|| {
            AppError::Internal(format!("{} has no translations table", self.model.table))
        })?;
        if self.translated {
            return Ok(self);
        }
        let ph = self.buf.placeholder(Value::String(lang.to_string()), Some("text"));
        self.joins.push(format!(
            "LEFT JOIN {} {} ON {} = {} AND {} = {}",
            side_table(self.model, tr.table),
            TRANSLATION,
            aliased(TRANSLATION, tr.foreign_key),
            aliased(MAIN, self.model.primary_key),
            aliased(TRANSLATION, tr.lang_column),
            ph
        ));
        self.translated = true;
        Ok(self)
    }

    pub fn order_by(&mut self, column: &str, direction: Direction) -> &mut Self {
        self.orders
            .push(format!("{} {}", aliased(MAIN, column), direction.as_sql()));
        self
    }

    pub fn limit(&mut self, n: u64) -> &mut Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(&mut self, n: u64) -> &mut Self {
        self.offset = Some(n);
        self
    }

    fn projection_sql(&self) -> String {
        let translations = self.model.translations.filter(|_| self.translated);
        let names: Vec<&ColumnDef> = match &self.projection {
            Some(names) => names.iter().filter_map(|n| self.model.column(n)).collect(),
            None => self.model.visible_columns().collect(),
        };
        let mut parts: Vec<String> = names
            .into_iter()
            .map(|c| {
                let translated = translations.and_then(|tr| {
                    tr.columns.iter().find(|t| t.main_column == Some(c.name))
                });
                match translated {
                    Some(t) => format!(
                        "COALESCE({}, {}) AS {}",
                        aliased(TRANSLATION, t.translated_column),
                        column_expr(MAIN, c),
                        quoted(c.name)
                    ),
                    None => format!("{} AS {}", column_expr(MAIN, c), quoted(c.name)),
                }
            })
            .collect();
        if let Some(tr) = translations {
            for t in tr.columns.iter().filter(|t| t.main_column.is_none()) {
                parts.push(format!(
                    "{} AS {}",
                    aliased(TRANSLATION, t.translated_column),
                    quoted(t.input)
                ));
            }
        }
        parts.extend(self.relations.iter().cloned());
        parts.join(", ")
    }

    fn from_where_sql(&self) -> String {
        let mut sql = format!("{} {}", qualified_table(self.model), MAIN);
        for join in &self.joins {
            sql.push(' ');
            sql.push_str(join);
        }
        if !self.wheres.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.wheres.join(" AND "));
        }
        sql
    }

    pub fn build(&self) -> QueryBuf {
        let mut sql = format!("SELECT {} FROM {}", self.projection_sql(), self.from_where_sql());
        if !self.orders.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.orders.join(", "));
        }
        if let Some(n) = self.limit {
            sql.push_str(&format!(" LIMIT {}", n));
        }
        if let Some(n) = self.offset {
            sql.push_str(&format!(" OFFSET {}", n));
        }
        QueryBuf {
            sql,
            params: self.buf.params.clone(),
        }
    }

    /// Total row count for the same filters, ignoring order and paging.
    pub fn build_count(&self) -> QueryBuf {
        QueryBuf {
            sql: format!("SELECT COUNT(*) FROM {}", self.from_where_sql()),
            params: self.buf.params.clone(),
        }
    }
}

/// INSERT of the known columns present in `data`; timestamps default to NOW().
pub fn insert(model: &ModelDef, data: &Record) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut cols = Vec::new();
    let mut values = Vec::new();
    for c in model.columns {
        if let Some(v) = data.get(c.name) {
            cols.push(quoted(c.name));
            values.push(q.placeholder(v.clone(), Some(c.sql_type)));
        } else if model.timestamps && (c.name == "created_at" || c.name == "updated_at") {
            cols.push(quoted(c.name));
            values.push("NOW()".to_string());
        }
    }
    q.sql = if cols.is_empty() {
        format!(
            "INSERT INTO {} DEFAULT VALUES RETURNING {}",
            qualified_table(model),
            returning_list(model)
        )
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            qualified_table(model),
            cols.join(", "),
            values.join(", "),
            returning_list(model)
        )
    };
    q
}

/// UPDATE by id: SET only known, non-key columns present in `data`.
pub fn update(model: &ModelDef, id: &Value, data: &Record) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut sets = Vec::new();
    for c in model.columns {
        if c.name == model.primary_key {
            continue;
        }
        if let Some(v) = data.get(c.name) {
            let ph = q.placeholder(v.clone(), Some(c.sql_type));
            sets.push(format!("{} = {}", quoted(c.name), ph));
        }
    }
    if sets.is_empty() {
        let ph = q.placeholder(id.clone(), Some(model.key_cast()));
        q.sql = format!(
            "SELECT {} FROM {} WHERE {} = {}",
            returning_list(model),
            qualified_table(model),
            quoted(model.primary_key),
            ph
        );
        return q;
    }
    if model.timestamps && model.has_column("updated_at") && !data.contains_key("updated_at") {
        sets.push(format!("{} = NOW()", quoted("updated_at")));
    }
    let ph = q.placeholder(id.clone(), Some(model.key_cast()));
    q.sql = format!(
        "UPDATE {} SET {} WHERE {} = {} RETURNING {}",
        qualified_table(model),
        sets.join(", "),
        quoted(model.primary_key),
        ph,
        returning_list(model)
    );
    q
}

fn set_deleted_at(model: &ModelDef, id: &Value, value: &str) -> QueryBuf {
    let mut q = QueryBuf::new();
    let ph = q.placeholder(id.clone(), Some(model.key_cast()));
    let mut sets = vec![format!("{} = {}", quoted("deleted_at"), value)];
    if model.timestamps && model.has_column("updated_at") {
        sets.push(format!("{} = NOW()", quoted("updated_at")));
    }
    q.sql = format!(
        "UPDATE {} SET {} WHERE {} = {} RETURNING {}",
        qualified_table(model),
        sets.join(", "),
        quoted(model.primary_key),
        ph,
        returning_list(model)
    );
    q
}

pub fn soft_delete(model: &ModelDef, id: &Value) -> QueryBuf {
    set_deleted_at(model, id, "NOW()")
}

pub fn restore(model: &ModelDef, id: &Value) -> QueryBuf {
    set_deleted_at(model, id, "NULL")
}

pub fn delete(model: &ModelDef, id: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let ph = q.placeholder(id.clone(), Some(model.key_cast()));
    q.sql = format!(
        "DELETE FROM {} WHERE {} = {} RETURNING {}",
        qualified_table(model),
        quoted(model.primary_key),
        ph,
        returning_list(model)
    );
    q
}

/// A link table keyed by (owner key, related key) with optional extra
/// columns: a many-to-many pivot or a translations table.
#[derive(Clone, Debug)]
pub struct PivotSpec {
    table: String,
    owner_key: &'static str,
    owner_cast: &'static str,
    related_key: &'static str,
    related_cast: &'static str,
    columns: Vec<(&'static str, Option<&'static str>)>,
}

impl PivotSpec {
    pub fn for_relation(model: &ModelDef, relation: &str) -> Result<Self, AppError> {
        let rel = model
            .relation(relation)
            .ok_or_else(|| unknown_relation(model, relation))?;
        match rel.kind {
            RelationKind::BelongsToMany {
                pivot_table,
                foreign_pivot_key,
                related_pivot_key,
                pivot_columns,
            } => Ok(PivotSpec {
                table: side_table(model, pivot_table),
                owner_key: foreign_pivot_key,
                owner_cast: model.key_cast(),
                related_key: related_pivot_key,
                related_cast: rel.related.key_cast(),
                columns: pivot_columns.iter().map(|c| (c.name, Some(c.sql_type))).collect(),
            }),
            _ => Err(AppError::Internal(format!(
                "relation '{}' on {} is not many-to-many",
                relation, model.table
            ))),
        }
    }

    pub fn for_translations(model: &ModelDef) -> Result<Self, AppError> {
        let tr = model.translations.ok_or_else(|| {
            AppError::Internal(format!("{} has no translations table", model.table))
        })?;
        Ok(PivotSpec {
            table: side_table(model, tr.table),
            owner_key: tr.foreign_key,
            owner_cast: model.key_cast(),
            related_key: tr.lang_column,
            related_cast: "text",
            columns: tr.columns.iter().map(|c| (c.translated_column, None)).collect(),
        })
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|(c, _)| *c == name)
    }

    /// Related keys currently linked to `owner`, as text.
    pub fn linked_ids(&self, owner: &Value) -> QueryBuf {
        let mut q = QueryBuf::new();
        let ph = q.placeholder(owner.clone(), Some(self.owner_cast));
        q.sql = format!(
            "SELECT {}::text FROM {} WHERE {} = {}",
            quoted(self.related_key),
            self.table,
            quoted(self.owner_key),
            ph
        );
        q
    }

    /// One multi-row INSERT; attributes that are not pivot columns are dropped.
    pub fn attach(&self, owner: &Value, rows: &[(String, Record)]) -> Option<QueryBuf> {
        if rows.is_empty() {
            return None;
        }
        let extra: Vec<(&'static str, Option<&'static str>)> = self
            .columns
            .iter()
            .copied()
            .filter(|(name, _)| rows.iter().any(|(_, attrs)| attrs.contains_key(*name)))
            .collect();
        let mut q = QueryBuf::new();
        let mut tuples = Vec::with_capacity(rows.len());
        for (id, attrs) in rows {
            let mut values = vec![
                q.placeholder(owner.clone(), Some(self.owner_cast)),
                q.placeholder(Value::String(id.clone()), Some(self.related_cast)),
            ];
            for (name, cast) in &extra {
                match attrs.get(*name) {
                    Some(v) => values.push(q.placeholder(v.clone(), *cast)),
                    None => values.push("DEFAULT".into()),
                }
            }
            tuples.push(format!("({})", values.join(", ")));
        }
        let mut cols = vec![quoted(self.owner_key), quoted(self.related_key)];
        cols.extend(extra.iter().map(|(name, _)| quoted(name)));
        q.sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.table,
            cols.join(", "),
            tuples.join(", ")
        );
        Some(q)
    }

    /// DELETE links to `ids`, or every link of `owner` when `ids` is `None`.
    pub fn detach(&self, owner: &Value, ids: Option<&[String]>) -> Option<QueryBuf> {
        let mut q = QueryBuf::new();
        let ph = q.placeholder(owner.clone(), Some(self.owner_cast));
        let mut sql = format!(
            "DELETE FROM {} WHERE {} = {}",
            self.table,
            quoted(self.owner_key),
            ph
        );
        if let Some(ids) = ids {
            if ids.is_empty() {
                return None;
            }
            let placeholders: Vec<String> = ids
                .iter()
                .map(|id| q.placeholder(Value::String(id.clone()), Some(self.related_cast)))
                .collect();
            sql.push_str(&format!(
                " AND {} IN ({})",
                quoted(self.related_key),
                placeholders.join(", ")
            ));
        }
        q.sql = sql;
        Some(q)
    }

    /// UPDATE of pivot attributes for one link; `None` when nothing applies.
    pub fn update(&self, owner: &Value, id: &str, attrs: &Record) -> Option<QueryBuf> {
        let mut q = QueryBuf::new();
        let sets: Vec<String> = self
            .columns
            .iter()
            .filter_map(|(name, cast)| {
                attrs
                    .get(*name)
                    .map(|v| format!("{} = {}", quoted(name), q.placeholder(v.clone(), *cast)))
            })
            .collect();
        if sets.is_empty() {
            return None;
        }
        let owner_ph = q.placeholder(owner.clone(), Some(self.owner_cast));
        let id_ph = q.placeholder(Value::String(id.to_string()), Some(self.related_cast));
        q.sql = format!(
            "UPDATE {} SET {} WHERE {} = {} AND {} = {}",
            self.table,
            sets.join(", "),
            quoted(self.owner_key),
            owner_ph,
            quoted(self.related_key),
            id_ph
        );
        Some(q)
    }
}

/// Related rows of a many-to-many relation restricted to `ids`.
pub fn related_through_pivot(
    model: &'static ModelDef,
    relation: &str,
    owner: &Value,
    ids: &[String],
) -> Result<QueryBuf, AppError> {
    let rel = model
        .relation(relation)
        .ok_or_else(|| unknown_relation(model, relation))?;
    let RelationKind::BelongsToMany {
        pivot_table,
        foreign_pivot_key,
        related_pivot_key,
        ..
    } = rel.kind
    else {
        return Err(AppError::Internal(format!(
            "relation '{}' on {} is not many-to-many",
            relation, model.table
        )));
    };
    let mut q = QueryBuf::new();
    let owner_ph = q.placeholder(owner.clone(), Some(model.key_cast()));
    let mut sql = format!(
        "SELECT {} FROM {} {} JOIN {} {} ON {} = {} WHERE {} = {}",
        column_list(rel.related, RELATED),
        qualified_table(rel.related),
        RELATED,
        side_table(model, pivot_table),
        PIVOT,
        aliased(RELATED, rel.related.primary_key),
        aliased(PIVOT, related_pivot_key),
        aliased(PIVOT, foreign_pivot_key),
        owner_ph
    );
    if ids.is_empty() {
        sql.push_str(" AND 1 = 0");
    } else {
        let cast = rel.related.key_cast();
        let placeholders: Vec<String> = ids
            .iter()
            .map(|id| q.placeholder(Value::String(id.clone()), Some(cast)))
            .collect();
        sql.push_str(&format!(
            " AND {} IN ({})",
            aliased(PIVOT, related_pivot_key),
            placeholders.join(", ")
        ));
    }
    sql.push_str(&format!(" ORDER BY {}", aliased(RELATED, rel.related.primary_key)));
    q.sql = sql;
    Ok(q)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::POSTS;
    use crate::model::USERS;
    use serde_json::json;

    fn record(v: Value) -> Record {
        match v {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn quotes_identifiers() {
        assert_eq!(quoted("a\"b"), "\"a\"\"b\"");
        assert_eq!(qualified_name("blog.posts"), "\"blog\".\"posts\"");
    }

    #[test]
    fn select_skips_hidden_columns_and_casts_numeric() {
        let q = Select::new(&USERS).build();
        assert!(q.sql.starts_with("SELECT main.\"id\" AS \"id\", main.\"name\" AS \"name\""));
        assert!(!q.sql.contains("\"password\""));
        assert!(!q.sql.contains("remember_token"));
        let q = Select::new(&POSTS).build();
        assert!(q.sql.contains("main.\"price\"::text AS \"price\""));
    }

    #[test]
    fn conditions_bind_params_in_order_with_casts() {
        let mut s = Select::new(&USERS);
        s.where_eq("email", json!("a@b.co"))
            .where_op("name", Op::ILike, json!("%al%"))
            .where_in("id", &[json!("x"), json!("y")])
            .where_null("deleted_at")
            .order_by("name", Direction::Asc)
            .limit(15)
            .offset(30);
        let q = s.build();
        assert!(q.sql.contains(
            "WHERE main.\"email\" = $1::text AND main.\"name\"::text ILIKE $2::text \
             AND main.\"id\" IN ($3::uuid, $4::uuid) AND main.\"deleted_at\" IS NULL"
        ));
        assert!(q.sql.ends_with("ORDER BY main.\"name\" ASC LIMIT 15 OFFSET 30"));
        assert_eq!(q.params, vec![json!("a@b.co"), json!("%al%"), json!("x"), json!("y")]);
    }

    #[test]
    fn json_columns_receive_json_text() {
        let q = insert(
            &crate::model::PERSONAL_ACCESS_TOKENS,
            &record(json!({"name": "api", "abilities": "*"})),
        );
        assert!(q.sql.contains("$2::jsonb"));
        assert_eq!(q.params[1], json!("\"*\""));

        let q = insert(
            &crate::model::PERSONAL_ACCESS_TOKENS,
            &record(json!({"abilities": ["read"]})),
        );
        assert_eq!(q.params[0], json!(["read"]));
    }

    #[test]
    fn empty_in_list_matches_nothing() {
        let mut s = Select::new(&USERS);
        s.where_in("id", &[]);
        assert!(s.build().sql.ends_with("WHERE 1 = 0"));
    }

    #[test]
    fn or_group_and_dates() {
        let mut s = Select::new(&USERS);
        s.where_any(&[
            Condition::new("name", Op::Like, json!("%a%")),
            Condition::new("email", Op::Like, json!("%a%")),
        ])
        .where_date("created_at", json!("2024-01-31"))
        .where_between("updated_at", json!("2024-01-01"), json!("2024-02-01"));
        let sql = s.build().sql;
        assert!(sql.contains("(main.\"name\"::text LIKE $1::text OR main.\"email\"::text LIKE $2::text)"));
        assert!(sql.contains("DATE(main.\"created_at\") = $3::date"));
        assert!(sql.contains("main.\"updated_at\" BETWEEN $4::timestamptz AND $5::timestamptz"));
    }

    #[test]
    fn count_reuses_filters_without_paging() {
        let mut s = Select::new(&USERS);
        s.where_eq("name", json!("a")).order_by("name", Direction::Desc).limit(5);
        let q = s.build_count();
        assert_eq!(
            q.sql,
            "SELECT COUNT(*) FROM \"public\".\"users\" main WHERE main.\"name\" = $1::text"
        );
        assert_eq!(q.params.len(), 1);
    }

    #[test]
    fn eager_loads_each_relation_kind() {
        let mut s = Select::new(&POSTS);
        s.with_relation("author").unwrap();
        s.with_relation("comments").unwrap();
        s.with_relation("tags").unwrap();
        let sql = s.build().sql;
        assert!(sql.contains(
            "(SELECT row_to_json(sub) FROM (SELECT r.\"id\" AS \"id\", r.\"name\" AS \"name\""
        ));
        assert!(sql.contains("WHERE r.\"id\" = main.\"author_id\" AND r.\"deleted_at\" IS NULL LIMIT 1) sub) AS \"author\""));
        assert!(sql.contains("WHERE r.\"post_id\" = main.\"id\" ORDER BY r.\"id\") sub) AS \"comments\""));
        assert!(sql.contains(
            "FROM \"blog\".\"tags\" r JOIN \"blog\".\"post_tag\" p ON r.\"id\" = p.\"tag_id\" WHERE p.\"post_id\" = main.\"id\""
        ));
        assert!(sql.contains("json_build_object('post_id', p.\"post_id\", 'tag_id', p.\"tag_id\", 'position', p.\"position\") AS \"pivot\""));
    }

    #[test]
    fn unknown_relation_is_an_error() {
        let mut s = Select::new(&USERS);
        assert!(s.with_relation("nope").is_err());
        assert!(s.where_has("nope", &[]).is_err());
    }

    #[test]
    fn where_has_binds_conditions_on_related_rows() {
        let mut s = Select::new(&POSTS);
        s.where_has("tags", &[Condition::eq("label", json!("rust"))]).unwrap();
        let q = s.build();
        assert!(q.sql.contains(
            "EXISTS (SELECT 1 FROM \"blog\".\"tags\" r JOIN \"blog\".\"post_tag\" p ON r.\"id\" = p.\"tag_id\" \
             WHERE p.\"post_id\" = main.\"id\" AND r.\"label\" = $1::text)"
        ));
    }

    #[test]
    fn translations_overlay_main_columns() {
        let mut s = Select::new(&POSTS);
        s.where_eq("id", json!(3));
        s.with_translations("es").unwrap();
        let q = s.build();
        assert!(q.sql.contains("COALESCE(tr.\"title_translated\", main.\"title\") AS \"title\""));
        assert!(q.sql.contains(
            "LEFT JOIN \"blog\".\"post_translations\" tr ON tr.\"post_id\" = main.\"id\" AND tr.\"lang_id\" = $2::text"
        ));
        assert_eq!(q.params, vec![json!(3), json!("es")]);
        assert!(Select::new(&USERS).with_translations("en").is_err());
    }

    #[test]
    fn projection_rejects_hidden_columns() {
        let mut s = Select::new(&USERS);
        assert!(s.columns(&["password".to_string()]).is_err());
        s.columns(&["id".to_string(), "email".to_string()]).unwrap();
        assert!(s.build().sql.starts_with("SELECT main.\"id\" AS \"id\", main.\"email\" AS \"email\" FROM"));
    }

    #[test]
    fn insert_fills_timestamps() {
        let q = insert(&USERS, &record(json!({"name": "Ann", "email": "a@b.co", "bogus": 1})));
        assert!(q.sql.starts_with(
            "INSERT INTO \"public\".\"users\" (\"name\", \"email\", \"created_at\", \"updated_at\") \
             VALUES ($1::text, $2::text, NOW(), NOW()) RETURNING \"id\""
        ));
        assert_eq!(q.params, vec![json!("Ann"), json!("a@b.co")]);
    }

    #[test]
    fn update_touches_updated_at_and_falls_back_to_select() {
        let id = json!("8f14e45f-ceea-4671-9f5b-2b2c1c0e9f11");
        let q = update(&USERS, &id, &record(json!({"name": "Bo", "id": "other"})));
        assert!(q.sql.starts_with(
            "UPDATE \"public\".\"users\" SET \"name\" = $1::text, \"updated_at\" = NOW() WHERE \"id\" = $2::uuid RETURNING"
        ));
        let q = update(&USERS, &id, &Record::new());
        assert!(q.sql.starts_with("SELECT"));
        assert_eq!(q.params, vec![id]);
    }

    #[test]
    fn soft_delete_and_restore_set_deleted_at() {
        let id = json!(1);
        assert!(soft_delete(&POSTS, &id).sql.contains("SET \"deleted_at\" = NOW(), \"updated_at\" = NOW()"));
        assert!(restore(&POSTS, &id).sql.contains("SET \"deleted_at\" = NULL"));
        assert!(delete(&POSTS, &id).sql.starts_with("DELETE FROM \"blog\".\"posts\" WHERE \"id\" = $1::bigint"));
    }

    #[test]
    fn pivot_statements() {
        let pivot = PivotSpec::for_relation(&POSTS, "tags").unwrap();
        let owner = json!(9);
        let rows = vec![
            ("1".to_string(), record(json!({"position": 2}))),
            ("2".to_string(), Record::new()),
        ];
        let q = pivot.attach(&owner, &rows).unwrap();
        assert_eq!(
            q.sql,
            "INSERT INTO \"blog\".\"post_tag\" (\"post_id\", \"tag_id\", \"position\") VALUES \
             ($1::bigint, $2::bigint, $3::integer), ($4::bigint, $5::bigint, DEFAULT)"
        );
        let q = pivot.detach(&owner, Some(&["1".to_string()])).unwrap();
        assert!(q.sql.ends_with("WHERE \"post_id\" = $1::bigint AND \"tag_id\" IN ($2::bigint)"));
        assert!(pivot.detach(&owner, Some(&[])).is_none());
        assert!(pivot.detach(&owner, None).unwrap().sql.ends_with("WHERE \"post_id\" = $1::bigint"));
        assert!(pivot.update(&owner, "1", &Record::new()).is_none());
        let q = pivot.update(&owner, "1", &record(json!({"position": 4}))).unwrap();
        assert_eq!(
            q.sql,
            "UPDATE \"blog\".\"post_tag\" SET \"position\" = $1::integer WHERE \"post_id\" = $2::bigint AND \"tag_id\" = $3::bigint"
        );
        assert!(PivotSpec::for_relation(&POSTS, "author").is_err());
    }

    #[test]
    fn translations_pivot_uses_language_column() {
        let pivot = PivotSpec::for_translations(&POSTS).unwrap();
        assert!(pivot.has_column("title_translated"));
        let q = pivot.linked_ids(&json!(1));
        assert_eq!(
            q.sql,
            "SELECT \"lang_id\"::text FROM \"blog\".\"post_translations\" WHERE \"post_id\" = $1::bigint"
        );
    }

    #[test]
    fn related_rows_through_pivot() {
        let q = related_through_pivot(&POSTS, "tags", &json!(1), &["3".to_string()]).unwrap();
        assert!(q.sql.contains("WHERE p.\"post_id\" = $1::bigint AND p.\"tag_id\" IN ($2::bigint) ORDER BY r.\"id\""));
    }
}
