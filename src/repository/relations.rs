//! Many-to-many mutation: attach, detach, detach-all and sync.

use super::Record;
use crate::arrays::{format_pivot_data, id_text};
use crate::error::AppError;
use crate::model::{KeyType, ModelDef};
use crate::sql::{exec, PivotSpec};
use serde_json::Value;
use sqlx::PgConnection;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManyToManyAction {
    Attach,
    Detach,
    DetachAll,
    Sync,
}

impl FromStr for ManyToManyAction {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ATTACH" => Ok(ManyToManyAction::Attach),
            "DETACH" => Ok(ManyToManyAction::Detach),
            "DETACH_ALL" => Ok(ManyToManyAction::DetachAll),
            "SYNC" => Ok(ManyToManyAction::Sync),
            other => Err(AppError::Internal(format!("{}: Action not found", other))),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ManyToManyOptions {
    pub relation: String,
    /// `data` is a plain id list; otherwise objects keyed by `pivot_key`.
    pub is_array_of_ids: bool,
    pub pivot_key: String,
    /// Merged into the pivot attributes of every attached row.
    pub extra: Option<Record>,
    /// Return the related rows that changed instead of the parent row.
    pub return_attached_items: bool,
}

impl ManyToManyOptions {
    pub fn new(relation: impl Into<String>) -> Self {
        ManyToManyOptions {
            relation: relation.into(),
            is_array_of_ids: true,
            pivot_key: "id".into(),
            extra: None,
            return_attached_items: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ManyToManyOutcome {
    Item(Record),
    Related(Vec<Record>),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncChanges {
    pub attached: Vec<String>,
    pub detached: Vec<String>,
    pub updated: Vec<String>,
}

impl SyncChanges {
    /// Ids whose link was created or modified.
    pub fn changed(&self) -> Vec<String> {
        self.attached
            .iter()
            .chain(self.updated.iter())
            .cloned()
            .collect()
    }
}

/// Diff between the linked ids and the desired rows. Existing links with
/// attributes to write count as updated.
pub fn plan_sync(current: &[String], desired: &[(String, Record)]) -> SyncChanges {
    let mut changes = SyncChanges {
        detached: current
            .iter()
            .filter(|id| !desired.iter().any(|(d, _)| d == *id))
            .cloned()
            .collect(),
        ..SyncChanges::default()
    };
    for (id, attrs) in desired {
        if !current.contains(id) {
            changes.attached.push(id.clone());
        } else if !attrs.is_empty() {
            changes.updated.push(id.clone());
        }
    }
    changes
}

/// Writes the diff from [`plan_sync`] through `pivot`.
pub(crate) async fn sync_rows(
    conn: &mut PgConnection,
    pivot: &PivotSpec,
    owner: &Value,
    rows: &[(String, Record)],
) -> Result<SyncChanges, AppError> {
    let current = exec::fetch_strings(conn, &pivot.linked_ids(owner)).await?;
    let plan = plan_sync(&current, rows);
    if let Some(q) = pivot.detach(owner, Some(&plan.detached)) {
        exec::execute(conn, &q).await?;
    }
    let attach: Vec<(String, Record)> = rows
        .iter()
        .filter(|(id, _)| plan.attached.contains(id))
        .cloned()
        .collect();
    if let Some(q) = pivot.attach(owner, &attach) {
        exec::execute(conn, &q).await?;
    }
    for (id, attrs) in rows.iter().filter(|(id, _)| plan.updated.contains(id)) {
        if let Some(q) = pivot.update(owner, id, attrs) {
            exec::execute(conn, &q).await?;
        }
    }
    Ok(plan)
}

/// Canonical text of a related id; uuids are lowercased so they compare
/// equal to what Postgres returns.
fn normalize_id(key_type: KeyType, raw: &Value) -> Result<String, AppError> {
    let text = id_text(raw).ok_or_else(|| AppError::BadRequest(format!("invalid id {}", raw)))?;
    key_type
        .parse(&text)
        .and_then(|v| id_text(&v))
        .ok_or_else(|| AppError::BadRequest(format!("invalid id '{}'", text)))
}

fn pivot_rows(
    items: &[Value],
    key_type: KeyType,
    ids_only: bool,
    pivot: &PivotSpec,
    opts: &ManyToManyOptions,
) -> Result<Vec<(String, Record)>, AppError> {
    let raw: Vec<(String, Record)> = if ids_only {
        items
            .iter()
            .map(|v| {
                let id = id_text(v).ok_or_else(|| AppError::BadRequest(format!("invalid id {}", v)))?;
                Ok((id, opts.extra.clone().unwrap_or_default()))
            })
            .collect::<Result<_, AppError>>()?
    } else {
        format_pivot_data(items, &opts.pivot_key, opts.extra.as_ref())?
    };
    raw.into_iter()
        .map(|(id, attrs)| {
            let id = normalize_id(key_type, &Value::String(id))?;
            let attrs = attrs
                .into_iter()
                .filter(|(k, _)| pivot.has_column(k))
                .collect();
            Ok((id, attrs))
        })
        .collect()
}

/// Applies `action` and returns the ids it touched.
pub(crate) async fn many_to_many_actions(
    conn: &mut PgConnection,
    model: &'static ModelDef,
    pivot: &PivotSpec,
    owner: &Value,
    action: ManyToManyAction,
    data: Option<&Value>,
    opts: &ManyToManyOptions,
) -> Result<Vec<String>, AppError> {
    let items = match data {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(_) => return Err(AppError::Internal("$data is not valid".into())),
    };
    if action == ManyToManyAction::Attach && items.is_empty() {
        return Ok(Vec::new());
    }
    let key_type = model
        .relation(&opts.relation)
        .map(|r| r.related.key_type)
        .unwrap_or(KeyType::Text);
    let ids_only = opts.is_array_of_ids
        || matches!(action, ManyToManyAction::Detach | ManyToManyAction::DetachAll);
    let mut rows = pivot_rows(items, key_type, ids_only, pivot, opts)?;

    match action {
        ManyToManyAction::Attach => {
            let current = exec::fetch_strings(conn, &pivot.linked_ids(owner)).await?;
            rows.retain(|(id, _)| !current.contains(id));
            if let Some(q) = pivot.attach(owner, &rows) {
                exec::execute(conn, &q).await?;
            }
            Ok(rows.into_iter().map(|(id, _)| id).collect())
        }
        ManyToManyAction::Detach => {
            let ids: Vec<String> = rows.into_iter().map(|(id, _)| id).collect();
            if let Some(q) = pivot.detach(owner, Some(&ids)) {
                exec::execute(conn, &q).await?;
            }
            Ok(ids)
        }
        ManyToManyAction::DetachAll => {
            if let Some(q) = pivot.detach(owner, None) {
                exec::execute(conn, &q).await?;
            }
            Ok(Vec::new())
        }
        ManyToManyAction::Sync => Ok(sync_rows(conn, pivot, owner, &rows).await?.changed()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::POSTS;
    use serde_json::json;

    fn record(v: Value) -> Record {
        match v {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn actions_parse_from_names() {
        assert_eq!("ATTACH".parse::<ManyToManyAction>().unwrap(), ManyToManyAction::Attach);
        assert_eq!("detach_all".parse::<ManyToManyAction>().unwrap(), ManyToManyAction::DetachAll);
        assert!("MERGE".parse::<ManyToManyAction>().is_err());
    }

    #[test]
    fn sync_plan_attaches_detaches_and_updates() {
        let current = vec!["1".to_string(), "2".to_string(), "3".to_string()];
        let desired = vec![
            ("2".to_string(), record(json!({"position": 5}))),
            ("3".to_string(), Record::new()),
            ("4".to_string(), Record::new()),
        ];
        let plan = plan_sync(&current, &desired);
        assert_eq!(plan.attached, vec!["4"]);
        assert_eq!(plan.detached, vec!["1"]);
        assert_eq!(plan.updated, vec!["2"]);
        assert_eq!(plan.changed(), vec!["4", "2"]);
    }

    #[test]
    fn syncing_to_nothing_detaches_everything() {
        let plan = plan_sync(&["7".to_string()], &[]);
        assert_eq!(plan.detached, vec!["7"]);
        assert!(plan.attached.is_empty());
    }

    #[test]
    fn pivot_rows_keep_only_pivot_columns() {
        let pivot = PivotSpec::for_relation(&POSTS, "tags").unwrap();
        let mut opts = ManyToManyOptions::new("tags");
        opts.is_array_of_ids = false;
        let items = vec![json!({"id": 3, "position": 1, "bogus": true})];
        let rows = pivot_rows(&items, KeyType::BigInt, false, &pivot, &opts).unwrap();
        assert_eq!(rows, vec![("3".to_string(), record(json!({"position": 1})))]);
    }

    #[test]
    fn pivot_rows_reject_ids_of_the_wrong_type() {
        let pivot = PivotSpec::for_relation(&POSTS, "tags").unwrap();
        let opts = ManyToManyOptions::new("tags");
        let err = pivot_rows(&[json!("abc")], KeyType::BigInt, true, &pivot, &opts);
        assert!(matches!(err, Err(AppError::BadRequest(_))));
        let ok = pivot_rows(&[json!(4), json!("5")], KeyType::BigInt, true, &pivot, &opts).unwrap();
        assert_eq!(ok.len(), 2);
        assert_eq!(ok[1].0, "5");
    }
}
