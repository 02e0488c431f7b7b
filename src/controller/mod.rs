//! Generic CRUD handlers over a [`CrudController`].
//!
//! A controller names its repository and formatter and may override the
//! hooks; [`crud_routes`] mounts index, store, show, edit, update, destroy
//! and restore for it.

pub mod auth;
mod users;

pub use users::UsersController;

use crate::error::AppError;
use crate::repository::{
    LocalizedMethods, Method, QueryOptions, Record, RepoContext, Repository, SortSpec,
    DEFAULT_PER_PAGE,
};
use crate::resource::{Formatter, JsonResource, ResourceOptions};
use crate::response;
use crate::state::AppState;
use crate::validation::{RequestValidator, Rules};
use async_trait::async_trait;
use axum::{
    extract::{rejection::JsonRejection, OriginalUri, Path, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono_tz::Tz;
use serde_json::{Map, Value};
use sqlx::PgConnection;
use std::sync::Arc;

/// Request header carrying the client's IANA timezone.
pub const TIMEZONE_HEADER: &str = "timezone";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Index,
    Store,
    Show,
    Edit,
    Update,
    Destroy,
    Restore,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Index => "index",
            Action::Store => "store",
            Action::Show => "show",
            Action::Edit => "edit",
            Action::Update => "update",
            Action::Destroy => "destroy",
            Action::Restore => "restore",
        }
    }
}

#[async_trait]
pub trait CrudController: Send + Sync + 'static {
    type Repo: Repository;
    type Res: Formatter;

    fn repository(&self, ctx: RepoContext) -> Self::Repo;
    fn formatter(&self) -> Self::Res;

    /// Use the repository's localized reads and writes.
    fn localized(&self) -> bool {
        false
    }

    fn store_rules(&self, repo: &Self::Repo, _body: &Record) -> Result<Rules, AppError> {
        repo.input_rules(Method::Create, None)
    }

    fn update_rules(&self, repo: &Self::Repo, _body: &Record, id: &str) -> Result<Rules, AppError> {
        repo.input_rules(Method::Update, Some(id))
    }

    fn store_data(&self, body: Record) -> Record {
        body
    }

    fn update_data(&self, body: Record, _id: &Value) -> Record {
        body
    }

    /// Relations eager-loaded for `action`.
    fn load_relations(&self, _action: Action) -> Vec<String> {
        Vec::new()
    }

    /// Extra query options for `action`, merged under the handler's own.
    fn options(&self, _action: Action, _params: &Record) -> QueryOptions {
        QueryOptions::default()
    }

    /// Runs inside the write transaction before create/update and may
    /// reshape `data`. `id` and `item` are set on update.
    async fn pre_action(
        &self,
        _conn: &mut PgConnection,
        _action: Action,
        _data: &mut Record,
        _id: Option<&Value>,
        _item: Option<&Record>,
    ) -> Result<(), AppError> {
        Ok(())
    }

    /// Runs inside the write transaction after create/update.
    async fn post_action(
        &self,
        _conn: &mut PgConnection,
        _action: Action,
        _item: &Record,
    ) -> Result<(), AppError> {
        Ok(())
    }
}

pub struct CrudState<C> {
    pub app: AppState,
    pub controller: Arc<C>,
}

impl<C> Clone for CrudState<C> {
    fn clone(&self) -> Self {
        CrudState {
            app: self.app.clone(),
            controller: Arc::clone(&self.controller),
        }
    }
}

/// Query string as a record of string values; repeated keys keep the last.
pub fn params_record(query: Vec<(String, String)>) -> Record {
    query
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect()
}

/// `1`, `true`, `on` and `yes` are true; anything else, or a missing key, is false.
pub fn flag(params: &Record, key: &str) -> bool {
    match params.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64() == Some(1),
        Some(Value::String(s)) => matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "on" | "yes"),
        _ => false,
    }
}

fn only_trashed(params: &Record) -> bool {
    flag(params, "onlyTrashed") || flag(params, "only_trashed")
}

pub fn timezone(headers: &HeaderMap) -> Option<Tz> {
    let raw = headers.get(TIMEZONE_HEADER)?.to_str().ok()?;
    match raw.trim().parse::<Tz>() {
        Ok(tz) => Some(tz),
        Err(_) => {
            tracing::debug!(timezone = raw, "ignoring unknown timezone");
            None
        }
    }
}

/// Per-request repository settings from app config, headers and params.
pub fn request_context(app: &AppState, headers: &HeaderMap, params: &Record) -> RepoContext {
    RepoContext {
        language: app.config.language().for_params(params),
        debug: app.config.debug,
        apply_validations: true,
        timezone: timezone(headers),
    }
}

pub fn json_body(body: Result<Json<Value>, JsonRejection>) -> Result<Record, AppError> {
    match body.map_err(|e| AppError::BadRequest(e.body_text()))? {
        Json(Value::Object(map)) => Ok(map),
        Json(_) => Err(AppError::BadRequest("body must be a JSON object".into())),
    }
}

/// Path id in the model's key type; anything unparseable cannot exist.
fn path_id<R: Repository>(repo: &R, raw: &str) -> Result<Value, AppError> {
    repo.model().key_type.parse(raw).ok_or_else(AppError::not_found)
}

fn validation_errors(body: &Record, rules: &Rules) -> Result<(), AppError> {
    RequestValidator::check(body, rules).into_result()
}

fn action_options<C: CrudController>(
    controller: &C,
    action: Action,
    params: &Record,
    own: QueryOptions,
) -> QueryOptions {
    controller.options(action, params).merged(own)
}

async fn reload<C: CrudController>(
    controller: &C,
    repo: &C::Repo,
    conn: &mut PgConnection,
    id: &Value,
    opts: &QueryOptions,
) -> Result<Record, AppError> {
    if controller.localized() {
        repo.find_or_fail_localized(conn, id, opts).await
    } else {
        repo.find_or_fail(conn, id, opts).await
    }
}

fn item_key(repo: &impl Repository, item: &Record) -> Result<Value, AppError> {
    let model = repo.model();
    item.get(model.primary_key)
        .cloned()
        .ok_or_else(|| AppError::Internal(format!("{} row without key", model.table)))
}

pub async fn index<C: CrudController>(
    State(state): State<CrudState<C>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Query(query): Query<Vec<(String, String)>>,
) -> Result<Response, AppError> {
    let controller: &C = &state.controller;
    let params = params_record(query);
    let repo = controller.repository(request_context(&state.app, &headers, &params));
    let select = flag(&params, "select");
    let mut opts = action_options(
        controller,
        Action::Index,
        &params,
        QueryOptions {
            with: controller.load_relations(Action::Index),
            sort: params.get("sort").and_then(SortSpec::from_value),
            only_trashed: only_trashed(&params),
            params: Some(params.clone()),
            path: Some(uri.path().to_string()),
            ..Default::default()
        },
    );
    opts.resource_options.select |= select;
    let formatter = controller.formatter();
    let mut conn = state.app.pool.acquire().await?;
    if select {
        let rows = if controller.localized() {
            repo.all_localized(&mut conn, &opts).await?
        } else {
            repo.all(&mut conn, &opts).await?
        };
        return Ok(JsonResource::many(&formatter, &rows, &opts.resource_options).into_response());
    }
    let page = if controller.localized() {
        repo.paginated_localized(&mut conn, DEFAULT_PER_PAGE, &opts).await?
    } else {
        repo.paginated(&mut conn, DEFAULT_PER_PAGE, &opts).await?
    };
    Ok(JsonResource::paginated(&formatter, &page, &opts.resource_options).into_response())
}

pub async fn store<C: CrudController>(
    State(state): State<CrudState<C>>,
    headers: HeaderMap,
    Query(query): Query<Vec<(String, String)>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, AppError> {
    let controller: &C = &state.controller;
    let body = json_body(body)?;
    let params = params_record(query);
    let repo = controller.repository(request_context(&state.app, &headers, &params));
    let rules = controller.store_rules(&repo, &body)?;
    validation_errors(&body, &rules)?;

    let opts = action_options(controller, Action::Store, &params, QueryOptions::default());
    let mut tx = state.app.pool.begin().await?;
    RequestValidator::validate(&mut tx, &body, &rules).await?;
    let mut data = controller.store_data(body);
    controller
        .pre_action(&mut tx, Action::Store, &mut data, None, None)
        .await?;
    let item = if controller.localized() {
        repo.create_localized(&mut tx, data).await?
    } else {
        repo.create(&mut tx, data).await?
    };
    controller.post_action(&mut tx, Action::Store, &item).await?;
    let id = item_key(&repo, &item)?;
    let show = QueryOptions {
        with: controller.load_relations(Action::Show),
        ..Default::default()
    };
    let item = reload(controller, &repo, &mut tx, &id, &show).await?;
    tx.commit().await?;

    Ok(stored_response(&controller.formatter(), &item, &opts.resource_options))
}

/// A freshly stored row answers like any single item: 200 with `success`.
fn stored_response<F: Formatter + ?Sized>(
    formatter: &F,
    item: &Record,
    options: &ResourceOptions,
) -> Response {
    JsonResource::one(formatter, item, options).into_response()
}

pub async fn show<C: CrudController>(
    State(state): State<CrudState<C>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<Vec<(String, String)>>,
) -> Result<Response, AppError> {
    let controller: &C = &state.controller;
    let params = params_record(query);
    let repo = controller.repository(request_context(&state.app, &headers, &params));
    let id = path_id(&repo, &id)?;
    let opts = action_options(
        controller,
        Action::Show,
        &params,
        QueryOptions {
            with: controller.load_relations(Action::Show),
            only_trashed: only_trashed(&params),
            ..Default::default()
        },
    );
    let mut conn = state.app.pool.acquire().await?;
    let item = reload(controller, &repo, &mut conn, &id, &opts).await?;
    let formatter = controller.formatter();
    Ok(JsonResource::one(&formatter, &item, &opts.resource_options).into_response())
}

/// Like `show`, for edit forms: never localized, formatted with `editing`.
pub async fn edit<C: CrudController>(
    State(state): State<CrudState<C>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<Vec<(String, String)>>,
) -> Result<Response, AppError> {
    let controller: &C = &state.controller;
    let params = params_record(query);
    let repo = controller.repository(request_context(&state.app, &headers, &params));
    let id = path_id(&repo, &id)?;
    let mut opts = action_options(
        controller,
        Action::Edit,
        &params,
        QueryOptions {
            with: controller.load_relations(Action::Edit),
            only_trashed: only_trashed(&params),
            ..Default::default()
        },
    );
    opts.resource_options.editing = true;
    let mut conn = state.app.pool.acquire().await?;
    let item = repo.find_or_fail(&mut conn, &id, &opts).await?;
    let formatter = controller.formatter();
    Ok(JsonResource::one(&formatter, &item, &opts.resource_options).into_response())
}

pub async fn update<C: CrudController>(
    State(state): State<CrudState<C>>,
    Path(raw_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<Vec<(String, String)>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, AppError> {
    let controller: &C = &state.controller;
    let body = json_body(body)?;
    let params = params_record(query);
    let repo = controller.repository(request_context(&state.app, &headers, &params));
    let id = path_id(&repo, &raw_id)?;
    let rules = controller.update_rules(&repo, &body, &raw_id)?;
    validation_errors(&body, &rules)?;

    let opts = action_options(
        controller,
        Action::Update,
        &params,
        QueryOptions {
            only_trashed: only_trashed(&params),
            ..Default::default()
        },
    );
    let mut tx = state.app.pool.begin().await?;
    RequestValidator::validate(&mut tx, &body, &rules).await?;
    let mut data = controller.update_data(body, &id);
    let item = repo.find_or_fail(&mut tx, &id, &opts).await?;
    controller
        .pre_action(&mut tx, Action::Update, &mut data, Some(&id), Some(&item))
        .await?;
    let item = if controller.localized() {
        repo.update_localized(&mut tx, &id, data, &opts).await?
    } else {
        repo.update(&mut tx, &id, data, &opts).await?
    };
    controller.post_action(&mut tx, Action::Update, &item).await?;
    let show = QueryOptions {
        with: controller.load_relations(Action::Show),
        only_trashed: opts.only_trashed,
        ..Default::default()
    };
    let item = reload(controller, &repo, &mut tx, &id, &show).await?;
    tx.commit().await?;

    let formatter = controller.formatter();
    Ok(JsonResource::one(&formatter, &item, &opts.resource_options).into_response())
}

pub async fn destroy<C: CrudController>(
    State(state): State<CrudState<C>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<Vec<(String, String)>>,
) -> Result<Response, AppError> {
    let controller: &C = &state.controller;
    let params = params_record(query);
    let repo = controller.repository(request_context(&state.app, &headers, &params));
    let id = path_id(&repo, &id)?;
    let opts = action_options(
        controller,
        Action::Destroy,
        &params,
        QueryOptions {
            only_trashed: only_trashed(&params),
            ..Default::default()
        },
    );
    let mut conn = state.app.pool.acquire().await?;
    repo.delete(&mut conn, &id, &opts).await?;
    Ok(response::response200(Map::new(), None))
}

pub async fn restore<C: CrudController>(
    State(state): State<CrudState<C>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<Vec<(String, String)>>,
) -> Result<Response, AppError> {
    let controller: &C = &state.controller;
    let params = params_record(query);
    let repo = controller.repository(request_context(&state.app, &headers, &params));
    let id = path_id(&repo, &id)?;
    let opts = action_options(controller, Action::Restore, &params, QueryOptions::default());
    let mut conn = state.app.pool.acquire().await?;
    repo.restore(&mut conn, &id, &opts).await?;
    Ok(response::response200(Map::new(), None))
}

/// Resource routes for `controller`, ready to be nested under its path.
pub fn crud_routes<C, S>(app: AppState, controller: C) -> Router<S>
where
    C: CrudController,
    S: Clone + Send + Sync + 'static,
{
    let state = CrudState {
        app,
        controller: Arc::new(controller),
    };
    Router::new()
        .route("/", get(index::<C>).post(store::<C>))
        .route(
            "/:id",
            get(show::<C>)
                .put(update::<C>)
                .patch(update::<C>)
                .delete(destroy::<C>),
        )
        .route("/:id/edit", get(edit::<C>))
        .route("/:id/restore", post(restore::<C>))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::PassThrough;
    use axum::http::{HeaderValue, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::json;

    #[tokio::test]
    async fn stored_item_answers_200_with_success() {
        let item = match json!({"id": 3, "name": "Ann"}) {
            Value::Object(m) => m,
            _ => unreachable!(),
        };
        let res = stored_response(&PassThrough, &item, &ResourceOptions::default());
        assert_eq!(res.status(), StatusCode::OK);
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, json!({"success": true, "data": {"id": 3, "name": "Ann"}}));
    }

    #[test]
    fn query_pairs_become_string_params() {
        let params = params_record(vec![
            ("name".into(), "ann".into()),
            ("current".into(), "2".into()),
        ]);
        assert_eq!(Value::Object(params), json!({"name": "ann", "current": "2"}));
    }

    #[test]
    fn boolean_flags_follow_form_conventions() {
        let params = match json!({"a": "1", "b": "true", "c": "off", "d": "0", "e": true, "onlyTrashed": "yes"}) {
            Value::Object(m) => m,
            _ => unreachable!(),
        };
        assert!(flag(&params, "a"));
        assert!(flag(&params, "b"));
        assert!(!flag(&params, "c"));
        assert!(!flag(&params, "d"));
        assert!(flag(&params, "e"));
        assert!(!flag(&params, "missing"));
        assert!(only_trashed(&params));
    }

    #[test]
    fn timezone_header_is_parsed_when_known() {
        let mut headers = HeaderMap::new();
        assert_eq!(timezone(&headers), None);
        headers.insert(TIMEZONE_HEADER, HeaderValue::from_static("Europe/Madrid"));
        assert_eq!(timezone(&headers), Some(chrono_tz::Europe::Madrid));
        headers.insert(TIMEZONE_HEADER, HeaderValue::from_static("Mars/Olympus"));
        assert_eq!(timezone(&headers), None);
    }

    #[test]
    fn only_objects_are_accepted_as_bodies() {
        assert!(json_body(Ok(Json(json!({"a": 1})))).is_ok());
        assert!(matches!(json_body(Ok(Json(json!([1])))), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn action_names() {
        assert_eq!(Action::Index.as_str(), "index");
        assert_eq!(Action::Restore.as_str(), "restore");
    }
}
