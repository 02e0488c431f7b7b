//! Language selection and `{input}_{lang}` input helpers.

use crate::error::AppError;
use crate::repository::Record;
use crate::validation::{Rule, Rules};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Request param naming the language of the current request.
pub const LANG_PARAM: &str = "app_lang";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Language {
    langs: Vec<String>,
    primary: String,
    current: String,
}

impl Default for Language {
    fn default() -> Self {
        Language::new(vec!["en".into()], "en")
    }
}

/// Output of [`Language::extract_translations`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Translations {
    /// Translated columns per language.
    pub translations: BTreeMap<String, Record>,
    /// Inputs in the primary language, keyed by input name.
    pub default_translation: Option<Record>,
    /// Inputs in the current language, keyed by input name.
    pub current_translation: Option<Record>,
    /// Remaining data with every localized input removed.
    pub data: Record,
}

/// Display strings per language, addressed as `group.key`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Dictionary(HashMap<String, HashMap<String, String>>);

impl Dictionary {
    /// Reads `{"en": {"status": {"active": "Active"}}, "es": {..}}`; nested
    /// objects flatten into dotted keys and non-string leaves are skipped.
    pub fn from_value(value: &Value) -> Self {
        let mut langs = HashMap::new();
        if let Value::Object(map) = value {
            for (lang, entries) in map {
                let mut flat = HashMap::new();
                flatten_into(&mut flat, "", entries);
                langs.insert(lang.clone(), flat);
            }
        }
        Dictionary(langs)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AppError::Internal(format!("dictionary {}: {}", path.display(), e)))?;
        let value: Value = serde_json::from_str(&raw)
            .map_err(|e| AppError::Internal(format!("dictionary {}: {}", path.display(), e)))?;
        Ok(Dictionary::from_value(&value))
    }

    pub fn get(&self, lang: &str, key: &str) -> Option<&str> {
        self.0.get(lang)?.get(key).map(String::as_str)
    }
}

fn flatten_into(out: &mut HashMap<String, String>, prefix: &str, value: &Value) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                let key = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{}.{}", prefix, k)
                };
                flatten_into(out, &key, v);
            }
        }
        Value::String(s) if !prefix.is_empty() => {
            out.insert(prefix.to_string(), s.clone());
        }
        _ => {}
    }
}

impl Language {
    /// The primary language is always one of `langs`.
    pub fn new(mut langs: Vec<String>, primary: impl Into<String>) -> Self {
        let primary = primary.into();
        if !langs.contains(&primary) {
            langs.insert(0, primary.clone());
        }
        Language {
            langs,
            current: primary.clone(),
            primary,
        }
    }

    /// Switches the current language; unknown languages fall back to the primary one.
    pub fn with_current(mut self, lang: Option<&str>) -> Self {
        self.current = match lang {
            Some(l) if self.langs.iter().any(|x| x == l) => l.to_string(),
            _ => self.primary.clone(),
        };
        self
    }

    /// Current language taken from the `app_lang` request param.
    pub fn for_params(&self, params: &Record) -> Self {
        self.clone()
            .with_current(params.get(LANG_PARAM).and_then(Value::as_str))
    }

    pub fn all(&self) -> &[String] {
        &self.langs
    }

    pub fn primary(&self) -> &str {
        &self.primary
    }

    pub fn current(&self) -> &str {
        &self.current
    }

    /// Configured languages mapped to their position.
    pub fn all_by_key(&self) -> BTreeMap<String, usize> {
        self.langs
            .iter()
            .enumerate()
            .map(|(i, l)| (l.clone(), i))
            .collect()
    }

    /// Replaces `key` in every row with its entry under `group` in the
    /// current language. Missing entries leave `group.value` in place.
    pub fn localize_key_in_array(
        &self,
        rows: Vec<Record>,
        key: &str,
        group: &str,
        dictionary: &Dictionary,
    ) -> Vec<Record> {
        rows.into_iter()
            .map(|mut row| {
                let original = match row.get(key) {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Null) | None => return row,
                    Some(other) => other.to_string(),
                };
                let entry = format!("{}.{}", group, original);
                let text = dictionary
                    .get(&self.current, &entry)
                    .map(str::to_string)
                    .unwrap_or(entry);
                row.insert(key.to_string(), Value::String(text));
                row
            })
            .collect()
    }

    pub fn db_column(&self, column: &str) -> String {
        format!("{}_{}", column, self.current)
    }

    /// `name` -> `[name_en, name_es, ..]`.
    pub fn input_name_localized(&self, input: &str) -> Vec<String> {
        self.langs
            .iter()
            .map(|lang| format!("{}_{}", input, lang))
            .collect()
    }

    pub fn input_rules_localized(&self, input: &str, rules: &[Rule]) -> Rules {
        self.input_rules_localized_with(input, |_| rules.to_vec())
    }

    /// Like [`Language::input_rules_localized`], building rules per localized input name.
    pub fn input_rules_localized_with<F>(&self, input: &str, rules: F) -> Rules
    where
        F: Fn(&str) -> Vec<Rule>,
    {
        let mut out = Rules::new();
        for name in self.input_name_localized(input) {
            out.set(&name, rules(&name));
        }
        out
    }

    pub fn combine_localized_input_names(&self, localized: &[&str], others: &[&str]) -> Vec<String> {
        let mut names: Vec<String> = localized
            .iter()
            .flat_map(|input| self.input_name_localized(input))
            .collect();
        names.extend(others.iter().map(|s| s.to_string()));
        names
    }

    pub fn combine_localized_input_rules(&self, localized: &Rules, others: Rules) -> Rules {
        let mut out = Rules::new();
        for (input, rules) in localized.iter() {
            out.extend(self.input_rules_localized(input, rules));
        }
        out.extend(others);
        out
    }

    /// Pulls `{input}_{lang}` keys out of `data`. `keys` pairs each input
    /// name with the translations-table column receiving it; `extra` is
    /// merged into every language's row.
    pub fn extract_translations(&self, mut data: Record, keys: &[(&str, &str)], extra: &Record) -> Translations {
        let mut out = Translations::default();
        for (input, column) in keys {
            for lang in &self.langs {
                let Some(value) = data.remove(&format!("{}_{}", input, lang)) else {
                    continue;
                };
                if *lang == self.primary {
                    out.default_translation
                        .get_or_insert_with(Record::new)
                        .insert(input.to_string(), value.clone());
                }
                if *lang == self.current {
                    out.current_translation
                        .get_or_insert_with(Record::new)
                        .insert(input.to_string(), value.clone());
                }
                let row = out.translations.entry(lang.clone()).or_insert_with(|| extra.clone());
                row.insert(column.to_string(), value);
            }
        }
        out.data = data;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(v: Value) -> Record {
        match v {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    fn en_es() -> Language {
        Language::new(vec!["en".into(), "es".into()], "en")
    }

    #[test]
    fn current_language_comes_from_params() {
        let lang = en_es().for_params(&record(json!({"app_lang": "es"})));
        assert_eq!(lang.current(), "es");
        assert_eq!(lang.db_column("name"), "name_es");
        let lang = en_es().for_params(&record(json!({"app_lang": "fr"})));
        assert_eq!(lang.current(), "en");
    }

    #[test]
    fn primary_is_always_configured() {
        let lang = Language::new(vec!["es".into()], "en");
        assert_eq!(lang.all(), ["en".to_string(), "es".to_string()]);
    }

    #[test]
    fn localized_input_names_and_rules() {
        let lang = en_es();
        assert_eq!(lang.input_name_localized("title"), vec!["title_en", "title_es"]);
        assert_eq!(
            lang.combine_localized_input_names(&["title"], &["price"]),
            vec!["title_en", "title_es", "price"]
        );
        let localized = Rules::new().field("title", "required|max:10").unwrap();
        let others = Rules::new().field("price", "required").unwrap();
        let rules = lang.combine_localized_input_rules(&localized, others);
        assert_eq!(rules.get("title_es"), Some(&[Rule::Required, Rule::Max(10.0)][..]));
        assert_eq!(rules.get("price"), Some(&[Rule::Required][..]));
        assert!(rules.get("title").is_none());
    }

    #[test]
    fn extracts_translations_per_language() {
        let lang = en_es().with_current(Some("es"));
        let data = record(json!({"title_en": "Hi", "title_es": "Hola", "price": 3}));
        let extra = record(json!({"source": "form"}));
        let out = lang.extract_translations(data, &[("title", "title_translated")], &extra);
        assert_eq!(out.data, record(json!({"price": 3})));
        assert_eq!(out.default_translation, Some(record(json!({"title": "Hi"}))));
        assert_eq!(out.current_translation, Some(record(json!({"title": "Hola"}))));
        assert_eq!(
            out.translations["es"],
            record(json!({"title_translated": "Hola", "source": "form"}))
        );
        assert_eq!(out.translations.len(), 2);
    }

    #[test]
    fn languages_by_key() {
        let by_key = en_es().all_by_key();
        assert_eq!(by_key.get("en"), Some(&0));
        assert_eq!(by_key.get("es"), Some(&1));
        assert_eq!(by_key.len(), 2);
    }

    #[test]
    fn localizes_a_key_in_every_row() {
        let dictionary = Dictionary::from_value(&json!({
            "en": {"status": {"active": "Active"}},
            "es": {"status": {"active": "Activo", "inactive": "Inactivo"}},
        }));
        let rows = vec![
            record(json!({"id": 1, "status": "active"})),
            record(json!({"id": 2, "status": "inactive"})),
            record(json!({"id": 3, "status": "archived"})),
            record(json!({"id": 4})),
        ];
        let out = en_es()
            .with_current(Some("es"))
            .localize_key_in_array(rows, "status", "status", &dictionary);
        assert_eq!(out[0]["status"], "Activo");
        assert_eq!(out[1]["status"], "Inactivo");
        assert_eq!(out[2]["status"], "status.archived");
        assert!(out[3].get("status").is_none());
        assert_eq!(dictionary.get("en", "status.active"), Some("Active"));
    }

    #[test]
    fn missing_translations_leave_data_alone() {
        let out = en_es().extract_translations(record(json!({"price": 1})), &[("title", "t")], &Record::new());
        assert!(out.translations.is_empty());
        assert_eq!(out.default_translation, None);
    }
}
