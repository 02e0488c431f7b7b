//! Maps rows to their transport shape.
//!
//! A [`Formatter`] picks the fields of one row; [`JsonResource`] applies it
//! to a row, a list or a page and wraps the result under `data`.

mod users;

pub use users::{AuthUserResource, UserResource};

use crate::repository::{Page, Record};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

const DATA_WRAPPER: &str = "data";

/// Flags handed to formatters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResourceOptions {
    /// Rows feed a select/dropdown.
    pub select: bool,
    /// Row feeds an edit form.
    pub editing: bool,
    pub extra: Record,
}

pub trait Formatter: Send + Sync {
    fn format(&self, row: &Record, options: &ResourceOptions) -> Record;
}

/// Returns rows unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassThrough;

impl Formatter for PassThrough {
    fn format(&self, row: &Record, _options: &ResourceOptions) -> Record {
        row.clone()
    }
}

/// Copies `keys` from `row`, filling missing ones with null.
pub fn pick(row: &Record, keys: &[&str]) -> Record {
    keys.iter()
        .map(|k| (k.to_string(), row.get(*k).cloned().unwrap_or(Value::Null)))
        .collect()
}

#[derive(Clone, Debug, PartialEq)]
pub struct JsonResource {
    data: Value,
    extra: Record,
    wrapper: Option<&'static str>,
}

impl JsonResource {
    fn new(data: Value) -> Self {
        JsonResource {
            data,
            extra: Record::new(),
            wrapper: Some(DATA_WRAPPER),
        }
    }

    pub fn one<F: Formatter + ?Sized>(formatter: &F, row: &Record, options: &ResourceOptions) -> Self {
        Self::new(Value::Object(formatter.format(row, options)))
    }

    pub fn many<F: Formatter + ?Sized>(formatter: &F, rows: &[Record], options: &ResourceOptions) -> Self {
        Self::new(Value::Array(
            rows.iter()
                .map(|r| Value::Object(formatter.format(r, options)))
                .collect(),
        ))
    }

    /// Rows of `page` plus `links`, `total` and `meta`.
    pub fn paginated<F: Formatter + ?Sized>(formatter: &F, page: &Page, options: &ResourceOptions) -> Self {
        let mut resource = Self::many(formatter, &page.items, options);
        resource.extra.insert(
            "links".into(),
            json!({
                "next": page.next_page_url(),
                "prev": page.previous_page_url(),
                "last": page.url(page.last_page()),
                "first": page.url(1),
            }),
        );
        resource.extra.insert("total".into(), json!(page.total));
        resource.extra.insert(
            "meta".into(),
            json!({
                "current_page": page.current_page,
                "from": page.first_item(),
                "last_page": page.last_page(),
                "path": page.path,
                "per_page": page.per_page,
                "total": page.total,
                "to": page.last_item(),
            }),
        );
        resource
    }

    pub fn with_extra(mut self, extra: Record) -> Self {
        self.extra.extend(extra);
        self
    }

    /// Puts the formatted data at the top level instead of under `data`.
    pub fn without_wrapper(mut self) -> Self {
        self.wrapper = None;
        self
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    fn wrapped(&self) -> Record {
        match (self.wrapper, &self.data) {
            (Some(key), data) => Record::from_iter([(key.to_string(), data.clone())]),
            (None, Value::Object(map)) => map.clone(),
            (None, other) => Record::from_iter([(DATA_WRAPPER.to_string(), other.clone())]),
        }
    }

    /// Formatted data with the extra keys. Unwrapped lists cannot carry
    /// extra keys and are returned alone.
    pub fn to_value(&self, wrapped: bool) -> Value {
        if wrapped {
            let mut body = self.wrapped();
            body.extend(self.extra.clone());
            return Value::Object(body);
        }
        match &self.data {
            Value::Object(map) => {
                let mut body = map.clone();
                body.extend(self.extra.clone());
                Value::Object(body)
            }
            other => other.clone(),
        }
    }

    /// `success: true` (200 only), then the wrapped data, the resource extras
    /// and `extra`.
    pub fn to_response(&self, status: StatusCode, extra: Record) -> Response {
        let mut body = Record::new();
        if status == StatusCode::OK {
            body.insert("success".into(), Value::Bool(true));
        }
        body.extend(self.wrapped());
        body.extend(self.extra.clone());
        body.extend(extra);
        (status, Json(Value::Object(body))).into_response()
    }
}

impl IntoResponse for JsonResource {
    fn into_response(self) -> Response {
        self.to_response(StatusCode::OK, Record::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    fn record(v: Value) -> Record {
        match v {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    struct IdOnly;

    impl Formatter for IdOnly {
        fn format(&self, row: &Record, options: &ResourceOptions) -> Record {
            let mut out = pick(row, &["id"]);
            if options.editing {
                out.insert("editing".into(), Value::Bool(true));
            }
            out
        }
    }

    #[test]
    fn one_row_is_wrapped_under_data() {
        let row = record(json!({"id": 1, "secret": "x"}));
        let res = JsonResource::one(&IdOnly, &row, &ResourceOptions::default());
        assert_eq!(res.to_value(true), json!({"data": {"id": 1}}));
        assert_eq!(res.to_value(false), json!({"id": 1}));
    }

    #[test]
    fn formatter_options_reach_the_formatter() {
        let row = record(json!({"id": 1}));
        let opts = ResourceOptions {
            editing: true,
            ..Default::default()
        };
        let res = JsonResource::one(&IdOnly, &row, &opts);
        assert_eq!(res.data(), &json!({"id": 1, "editing": true}));
    }

    #[test]
    fn paginated_adds_links_and_meta() {
        let rows = vec![record(json!({"id": 1})), record(json!({"id": 2}))];
        let page = Page::new(rows, 3, 2, 1).with_path("/api/v1/users");
        let value = JsonResource::paginated(&PassThrough, &page, &ResourceOptions::default())
            .to_value(true);
        assert_eq!(value["data"].as_array().map(Vec::len), Some(2));
        assert_eq!(value["total"], 3);
        assert_eq!(value["links"]["next"], "/api/v1/users?current=2");
        assert_eq!(value["links"]["prev"], Value::Null);
        assert_eq!(value["meta"]["last_page"], 2);
        assert_eq!(value["meta"]["to"], 2);
        assert_eq!(value["meta"]["path"], "/api/v1/users");
    }

    #[tokio::test]
    async fn response_marks_success_only_for_200() {
        let row = record(json!({"id": 7}));
        let res = JsonResource::one(&PassThrough, &row, &ResourceOptions::default())
            .with_extra(record(json!({"note": "n"})));

        let ok = res.clone().into_response();
        assert_eq!(ok.status(), StatusCode::OK);
        let bytes = ok.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, json!({"success": true, "data": {"id": 7}, "note": "n"}));

        let created = res.to_response(StatusCode::CREATED, Record::new());
        let bytes = created.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body.get("success").is_none());
    }
}
