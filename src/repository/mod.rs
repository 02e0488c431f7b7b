//! Generic repository over one [`ModelDef`]: query composition from a
//! [`QueryOptions`] bag, transactional writes, soft deletes and hooks.
//!
//! Writes take a `&mut PgConnection` and open a nested transaction on it, so
//! they commit on their own or become a savepoint of the caller's transaction.

mod localized;
mod page;
mod relations;
pub mod users;
pub mod utils;

pub use localized::LocalizedMethods;
pub use page::{Page, PAGE_NAME};
pub use relations::{
    plan_sync, ManyToManyAction, ManyToManyOptions, ManyToManyOutcome, SyncChanges,
};
pub use users::UsersRepository;

use crate::arrays::preserve_keys;
use crate::error::AppError;
use crate::lang::Language;
use crate::model::ModelDef;
use crate::resource::ResourceOptions;
use crate::sql::{self, exec, Condition, Direction, PivotSpec, Select};
use crate::validation::Rules;
use async_trait::async_trait;
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::Value;
use sqlx::{Connection, PgConnection};

/// A row as a JSON object keyed by column name.
pub type Record = serde_json::Map<String, Value>;

/// Page sizes accepted from clients unless debug is on.
pub const PAGINATION_OPTIONS: [u64; 5] = [15, 25, 30, 50, 100];
pub const DEFAULT_PER_PAGE: u64 = 15;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Create,
    Update,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Create => "create",
            Method::Update => "update",
        }
    }
}

/// One `sort` entry: `{column, direction: ascend|descend}`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SortSpec {
    pub column: String,
    pub direction: String,
}

impl SortSpec {
    pub fn new(column: impl Into<String>, direction: impl Into<String>) -> Self {
        SortSpec {
            column: column.into(),
            direction: direction.into(),
        }
    }

    /// Accepts a JSON array of entries, a JSON-encoded array, or
    /// `col:ascend,col2:descend`.
    pub fn from_value(v: &Value) -> Option<Vec<SortSpec>> {
        match v {
            Value::Array(_) => serde_json::from_value(v.clone()).ok(),
            Value::String(s) => {
                let s = s.trim();
                if s.starts_with('[') {
                    return serde_json::from_str(s).ok();
                }
                Some(
                    s.split(',')
                        .filter_map(|part| part.split_once(':'))
                        .map(|(c, d)| SortSpec::new(c.trim(), d.trim()))
                        .collect(),
                )
            }
            _ => None,
        }
    }

    pub fn direction(&self) -> Option<Direction> {
        Direction::from_sort(&self.direction)
    }
}

/// Relation-existence filter: rows must have at least one `relation` row
/// matching `conditions`.
#[derive(Clone, Debug, PartialEq)]
pub struct HasFilter {
    pub relation: String,
    pub conditions: Vec<Condition>,
}

impl HasFilter {
    pub fn new(relation: impl Into<String>) -> Self {
        HasFilter {
            relation: relation.into(),
            conditions: Vec::new(),
        }
    }

    pub fn with(mut self, cond: Condition) -> Self {
        self.conditions.push(cond);
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryOptions {
    pub where_: Vec<Condition>,
    pub where_in: Vec<(String, Vec<Value>)>,
    pub with: Vec<String>,
    pub has: Vec<HasFilter>,
    /// `None` falls back to the repository's default order.
    pub sort: Option<Vec<SortSpec>>,
    pub find: Option<Value>,
    pub column_id: Option<String>,
    pub only_trashed: bool,
    pub columns: Option<Vec<String>>,
    /// Raw request params for `handle_options` and page resolution.
    pub params: Option<Record>,
    pub current: Option<u64>,
    pub page_size: Option<u64>,
    pub by_lang: bool,
    pub resource_options: ResourceOptions,
    /// Request path used to build page links.
    pub path: Option<String>,
}

impl QueryOptions {
    /// Lays `other` over `self`: lists are concatenated, flags are or-ed and
    /// values set in `other` win.
    pub fn merged(mut self, other: QueryOptions) -> Self {
        self.where_.extend(other.where_);
        self.where_in.extend(other.where_in);
        self.with.extend(other.with);
        self.has.extend(other.has);
        self.sort = other.sort.or(self.sort);
        self.find = other.find.or(self.find);
        self.column_id = other.column_id.or(self.column_id);
        self.only_trashed |= other.only_trashed;
        self.columns = other.columns.or(self.columns);
        self.params = match (self.params, other.params) {
            (Some(mut a), Some(b)) => {
                a.extend(b);
                Some(a)
            }
            (a, b) => b.or(a),
        };
        self.current = other.current.or(self.current);
        self.page_size = other.page_size.or(self.page_size);
        self.by_lang |= other.by_lang;
        self.resource_options.select |= other.resource_options.select;
        self.resource_options.editing |= other.resource_options.editing;
        self.resource_options.extra.extend(other.resource_options.extra);
        self.path = other.path.or(self.path);
        self
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params
            .as_ref()
            .and_then(|p| p.get(key))
            .filter(|v| !v.is_null())
    }
}

/// Default ordering applied when a query carries no `sort`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DefaultOrder {
    pub column: &'static str,
    pub direction: Direction,
    /// Order by `{column}_{lang}` for the current language.
    pub localized: bool,
}

impl DefaultOrder {
    pub const fn asc(column: &'static str) -> Self {
        DefaultOrder {
            column,
            direction: Direction::Asc,
            localized: false,
        }
    }

    pub const fn desc(column: &'static str) -> Self {
        DefaultOrder {
            column,
            direction: Direction::Desc,
            localized: false,
        }
    }

    pub const fn localized(mut self) -> Self {
        self.localized = true;
        self
    }
}

/// Per-request settings a repository reads while building queries.
#[derive(Clone, Debug)]
pub struct RepoContext {
    pub language: Language,
    pub debug: bool,
    /// When false every `can_*` hook is skipped.
    pub apply_validations: bool,
    /// From the `timezone` request header.
    pub timezone: Option<Tz>,
}

impl Default for RepoContext {
    fn default() -> Self {
        RepoContext {
            language: Language::default(),
            debug: false,
            apply_validations: true,
            timezone: None,
        }
    }
}

fn as_u64(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Resolves `(page, per_page)`: `params.current` / `params.pageSize` when
/// params are present, otherwise the option fields. Sizes outside `allowed`
/// fall back to the default unless `debug` is on.
pub fn resolve_page(per_page: u64, opts: &QueryOptions, debug: bool, allowed: &[u64]) -> (u64, u64) {
    let (page, size) = match &opts.params {
        Some(params) => (
            params.get(PAGE_NAME).and_then(as_u64),
            params.get("pageSize").and_then(as_u64),
        ),
        None => (opts.current, opts.page_size),
    };
    let mut size = size.unwrap_or(per_page);
    if !debug && !allowed.contains(&size) {
        size = DEFAULT_PER_PAGE;
    }
    (page.unwrap_or(1).max(1), size.max(1))
}

#[async_trait]
pub trait Repository: Send + Sync {
    fn model(&self) -> &'static ModelDef;
    fn context(&self) -> &RepoContext;
    fn context_mut(&mut self) -> &mut RepoContext;

    fn order_by(&self) -> Option<DefaultOrder> {
        None
    }

    /// Keys kept from create/update input. Defaults to the fillable columns.
    fn available_input_keys(&self, _data: &Record, _method: Method) -> Vec<&'static str> {
        self.model().fillable.to_vec()
    }

    fn input_rules(&self, _method: Method, _id: Option<&str>) -> Result<Rules, AppError> {
        Ok(Rules::new())
    }

    fn prepare_data(&self, data: Record, _method: Method) -> Result<Record, AppError> {
        Ok(data)
    }

    /// Last step of query composition, for repository-specific params.
    fn handle_options(&self, _query: &mut Select, _opts: &QueryOptions) -> Result<(), AppError> {
        Ok(())
    }

    async fn can_create(&self, _conn: &mut PgConnection, _data: &Record) -> Result<(), AppError> {
        Ok(())
    }

    async fn can_update(
        &self,
        _conn: &mut PgConnection,
        _item: &Record,
        _data: &Record,
    ) -> Result<(), AppError> {
        Ok(())
    }

    async fn can_delete(&self, _conn: &mut PgConnection, _item: &Record) -> Result<(), AppError> {
        Ok(())
    }

    async fn can_restore(&self, _conn: &mut PgConnection, _item: &Record) -> Result<(), AppError> {
        Ok(())
    }

    /// Runs before a row is removed for good.
    async fn on_delete_permanently(
        &self,
        _conn: &mut PgConnection,
        _item: &Record,
    ) -> Result<(), AppError> {
        Ok(())
    }

    fn pagination_options(&self) -> &[u64] {
        &PAGINATION_OPTIONS
    }

    fn set_apply_validations(&mut self, apply: bool) {
        self.context_mut().apply_validations = apply;
    }

    fn query(&self, opts: &QueryOptions) -> Result<Select, AppError> {
        let model = self.model();
        let mut q = Select::new(model);
        if let Some(columns) = &opts.columns {
            q.columns(columns)?;
        }
        match &opts.sort {
            Some(sort) => {
                let valid = model.sortable_columns();
                for s in sort {
                    if let Some(direction) = s.direction() {
                        if valid.contains(&s.column.as_str()) {
                            q.order_by(&s.column, direction);
                        }
                    }
                }
            }
            None => {
                if let Some(order) = self.order_by() {
                    let column = if order.localized {
                        self.context().language.db_column(order.column)
                    } else {
                        order.column.to_string()
                    };
                    q.order_by(&column, order.direction);
                }
            }
        }
        for cond in &opts.where_ {
            q.where_cond(cond);
        }
        for (column, values) in &opts.where_in {
            q.where_in(column, values);
        }
        for relation in &opts.with {
            q.with_relation(relation)?;
        }
        for has in &opts.has {
            q.where_has(&has.relation, &has.conditions)?;
        }
        if let Some(find) = &opts.find {
            let column = opts.column_id.as_deref().unwrap_or(model.primary_key);
            q.where_eq(column, find.clone());
        }
        if model.soft_deletes {
            if opts.only_trashed {
                q.where_not_null("deleted_at");
            } else {
                q.where_null("deleted_at");
            }
        }
        if opts.by_lang && model.translations.is_some() {
            q.with_translations(self.context().language.current())?;
        }
        self.handle_options(&mut q, opts)?;
        Ok(q)
    }

    async fn all(&self, conn: &mut PgConnection, opts: &QueryOptions) -> Result<Vec<Record>, AppError> {
        let q = self.query(opts)?;
        exec::fetch_all(conn, &q.build()).await
    }

    async fn paginated(
        &self,
        conn: &mut PgConnection,
        per_page: u64,
        opts: &QueryOptions,
    ) -> Result<Page, AppError> {
        let mut q = self.query(opts)?;
        let (page, per_page) = resolve_page(
            per_page,
            opts,
            self.context().debug,
            self.pagination_options(),
        );
        let total = exec::fetch_count(conn, &q.build_count()).await?;
        q.limit(per_page).offset((page - 1) * per_page);
        let items = exec::fetch_all(conn, &q.build()).await?;
        let path = opts.path.clone().unwrap_or_else(|| "/".into());
        Ok(Page::new(items, total.max(0) as u64, per_page, page).with_path(path))
    }

    async fn find(
        &self,
        conn: &mut PgConnection,
        id: &Value,
        opts: &QueryOptions,
    ) -> Result<Option<Record>, AppError> {
        let opts = QueryOptions {
            find: Some(id.clone()),
            ..opts.clone()
        };
        let mut q = self.query(&opts)?;
        q.limit(1);
        exec::fetch_optional(conn, &q.build()).await
    }

    async fn find_by_name(
        &self,
        conn: &mut PgConnection,
        name: &str,
        opts: &QueryOptions,
    ) -> Result<Option<Record>, AppError> {
        let opts = QueryOptions {
            column_id: Some("name".into()),
            ..opts.clone()
        };
        self.find(conn, &Value::String(name.to_string()), &opts).await
    }

    async fn find_or_fail(
        &self,
        conn: &mut PgConnection,
        id: &Value,
        opts: &QueryOptions,
    ) -> Result<Record, AppError> {
        self.find(conn, id, opts).await?.ok_or_else(AppError::not_found)
    }

    async fn create(&self, conn: &mut PgConnection, data: Record) -> Result<Record, AppError> {
        let model = self.model();
        let mut tx = conn.begin().await?;
        let keys = self.available_input_keys(&data, Method::Create);
        let data = preserve_keys(&data, &keys);
        let data = self.prepare_data(data, Method::Create)?;
        if self.context().apply_validations {
            self.can_create(&mut tx, &data).await?;
        }
        let item = exec::fetch_optional(&mut tx, &sql::insert(model, &data))
            .await
            .map_err(AppError::on_write)?
            .ok_or_else(|| AppError::Internal(format!("insert into {} returned no row", model.table)))?;
        tx.commit().await?;
        tracing::info!(table = model.table, id = ?item.get(model.primary_key), "created");
        Ok(item)
    }

    async fn update(
        &self,
        conn: &mut PgConnection,
        id: &Value,
        data: Record,
        opts: &QueryOptions,
    ) -> Result<Record, AppError> {
        let model = self.model();
        let mut tx = conn.begin().await?;
        let keys = self.available_input_keys(&data, Method::Update);
        let data = preserve_keys(&data, &keys);
        let data = self.prepare_data(data, Method::Update)?;
        let item = self.find_or_fail(&mut tx, id, opts).await?;
        if self.context().apply_validations {
            self.can_update(&mut tx, &item, &data).await?;
        }
        let updated = exec::fetch_optional(&mut tx, &sql::update(model, id, &data))
            .await
            .map_err(AppError::on_write)?
            .ok_or_else(AppError::not_found)?;
        tx.commit().await?;
        tracing::info!(table = model.table, id = %id, "updated");
        Ok(updated)
    }

    /// Soft-deletes, or removes the row for good when the model has no soft
    /// deletes or `only_trashed` targets an already trashed row.
    async fn delete(
        &self,
        conn: &mut PgConnection,
        id: &Value,
        opts: &QueryOptions,
    ) -> Result<Record, AppError> {
        let model = self.model();
        let mut tx = conn.begin().await?;
        let item = self.find_or_fail(&mut tx, id, opts).await?;
        if self.context().apply_validations {
            self.can_delete(&mut tx, &item).await?;
        }
        if model.soft_deletes && opts.only_trashed {
            self.on_delete_permanently(&mut tx, &item).await?;
            exec::execute(&mut tx, &sql::delete(model, id))
                .await
                .map_err(AppError::on_delete)?;
        } else if model.soft_deletes {
            exec::execute(&mut tx, &sql::soft_delete(model, id)).await?;
        } else {
            exec::execute(&mut tx, &sql::delete(model, id))
                .await
                .map_err(AppError::on_delete)?;
            self.on_delete_permanently(&mut tx, &item).await?;
        }
        tx.commit()
            .await
            .map_err(|e| AppError::from(e).on_delete())?;
        tracing::info!(table = model.table, id = %id, force = opts.only_trashed, "deleted");
        Ok(item)
    }

    async fn restore(
        &self,
        conn: &mut PgConnection,
        id: &Value,
        opts: &QueryOptions,
    ) -> Result<Record, AppError> {
        let model = self.model();
        if !model.soft_deletes {
            return Err(AppError::not_found());
        }
        let opts = QueryOptions {
            only_trashed: true,
            ..opts.clone()
        };
        let mut tx = conn.begin().await?;
        let item = self.find_or_fail(&mut tx, id, &opts).await?;
        if self.context().apply_validations {
            self.can_restore(&mut tx, &item).await?;
        }
        let restored = exec::fetch_optional(&mut tx, &sql::restore(model, id))
            .await?
            .ok_or_else(AppError::not_found)?;
        tx.commit().await?;
        tracing::info!(table = model.table, id = %id, "restored");
        Ok(restored)
    }

    /// Attach, detach or sync rows of a many-to-many relation of `id`.
    async fn update_many_to_many(
        &self,
        conn: &mut PgConnection,
        id: &Value,
        action: ManyToManyAction,
        data: Option<&Value>,
        opts: &ManyToManyOptions,
    ) -> Result<ManyToManyOutcome, AppError> {
        let model = self.model();
        let pivot = PivotSpec::for_relation(model, &opts.relation)?;
        let mut tx = conn.begin().await?;
        let item = self.find_or_fail(&mut tx, id, &QueryOptions::default()).await?;
        let changes =
            relations::many_to_many_actions(&mut tx, model, &pivot, id, action, data, opts).await?;
        let outcome = if opts.return_attached_items {
            let q = sql::related_through_pivot(model, &opts.relation, id, &changes)?;
            ManyToManyOutcome::Related(exec::fetch_all(&mut tx, &q).await?)
        } else {
            ManyToManyOutcome::Item(item)
        };
        tx.commit().await?;
        tracing::info!(
            table = model.table,
            relation = %opts.relation,
            action = ?action,
            changed = changes.len(),
            "many-to-many updated"
        );
        Ok(outcome)
    }
}
