//! Reads and writes for models with a translations table.
//!
//! Inputs arrive as `{input}_{lang}`. The primary-language value is written
//! to the main table column, every language gets a row in the translations
//! table, and returned rows carry the current-language values.

use super::relations::sync_rows;
use super::{Page, QueryOptions, Record, Repository};
use crate::error::AppError;
use crate::model::{ModelDef, TranslationsDef};
use crate::sql::PivotSpec;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Connection, PgConnection};

fn by_lang(opts: &QueryOptions) -> QueryOptions {
    QueryOptions {
        by_lang: true,
        ..opts.clone()
    }
}

fn translations_of(model: &ModelDef) -> Result<&TranslationsDef, AppError> {
    model
        .translations
        .as_ref()
        .ok_or_else(|| AppError::Internal(format!("{} has no translations table", model.table)))
}

/// Input name to translations-table column.
fn translated_keys(tr: &TranslationsDef) -> Vec<(&'static str, &'static str)> {
    tr.columns
        .iter()
        .map(|c| (c.input, c.translated_column))
        .collect()
}

/// Input name to the key it has in a returned row.
fn row_keys(tr: &TranslationsDef) -> Vec<(&'static str, &'static str)> {
    tr.columns
        .iter()
        .map(|c| (c.input, c.main_column.unwrap_or(c.input)))
        .collect()
}

/// Splits localized inputs off `data`, copying primary-language values to
/// their main columns. Returns the main-table data, the per-language rows
/// and the current-language values.
fn split_input(
    repo: &(impl Repository + ?Sized),
    tr: &TranslationsDef,
    data: Record,
) -> (Record, Vec<(String, Record)>, Option<Record>) {
    let extracted =
        repo.context()
            .language
            .extract_translations(data, &translated_keys(tr), &Record::new());
    let mut data = extracted.data;
    if let Some(default) = &extracted.default_translation {
        for c in tr.columns {
            if let (Some(column), Some(v)) = (c.main_column, default.get(c.input)) {
                data.insert(column.to_string(), v.clone());
            }
        }
    }
    let rows = extracted.translations.into_iter().collect();
    (data, rows, extracted.current_translation)
}

fn overlay(item: &mut Record, tr: &TranslationsDef, current: Option<Record>) {
    let Some(current) = current else { return };
    for (input, key) in row_keys(tr) {
        if let Some(v) = current.get(input) {
            item.insert(key.to_string(), v.clone());
        }
    }
}

#[async_trait]
pub trait LocalizedMethods: Repository {
    async fn all_localized(
        &self,
        conn: &mut PgConnection,
        opts: &QueryOptions,
    ) -> Result<Vec<Record>, AppError> {
        self.all(conn, &by_lang(opts)).await
    }

    async fn paginated_localized(
        &self,
        conn: &mut PgConnection,
        per_page: u64,
        opts: &QueryOptions,
    ) -> Result<Page, AppError> {
        self.paginated(conn, per_page, &by_lang(opts)).await
    }

    async fn find_localized(
        &self,
        conn: &mut PgConnection,
        id: &Value,
        opts: &QueryOptions,
    ) -> Result<Option<Record>, AppError> {
        self.find(conn, id, &by_lang(opts)).await
    }

    async fn find_or_fail_localized(
        &self,
        conn: &mut PgConnection,
        id: &Value,
        opts: &QueryOptions,
    ) -> Result<Record, AppError> {
        self.find_or_fail(conn, id, &by_lang(opts)).await
    }

    async fn create_localized(
        &self,
        conn: &mut PgConnection,
        data: Record,
    ) -> Result<Record, AppError> {
        let model = self.model();
        let tr = translations_of(model)?;
        let pivot = PivotSpec::for_translations(model)?;
        let (data, rows, current) = split_input(self, tr, data);
        let mut tx = conn.begin().await?;
        let mut item = self.create(&mut tx, data).await?;
        let owner = item
            .get(model.primary_key)
            .cloned()
            .ok_or_else(|| AppError::Internal(format!("{} row without key", model.table)))?;
        sync_rows(&mut tx, &pivot, &owner, &rows).await?;
        tx.commit().await?;
        overlay(&mut item, tr, current);
        Ok(item)
    }

    async fn update_localized(
        &self,
        conn: &mut PgConnection,
        id: &Value,
        data: Record,
        opts: &QueryOptions,
    ) -> Result<Record, AppError> {
        let model = self.model();
        let tr = translations_of(model)?;
        let pivot = PivotSpec::for_translations(model)?;
        let (data, rows, current) = split_input(self, tr, data);
        let mut tx = conn.begin().await?;
        let mut item = self.update(&mut tx, id, data, &by_lang(opts)).await?;
        sync_rows(&mut tx, &pivot, id, &rows).await?;
        tx.commit().await?;
        overlay(&mut item, tr, current);
        Ok(item)
    }
}

impl<R: Repository + ?Sized> LocalizedMethods for R {}
