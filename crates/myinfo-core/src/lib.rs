use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Flat `label -> value` mapping persisted as the user data document.
///
/// Backed by `serde_json::Map` with `preserve_order`, so iteration follows
/// insertion order and equality ignores order.
pub type Document = Map<String, Value>;

pub const INFO_LIST_START: &str = r#"<div id="info-list">"#;
pub const INFO_LIST_END: &str = "</div>";

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum CatalogError {
    #[error("a field with this name and exact properties already exists: {name}")]
    DuplicateDefinition { name: String },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("unknown {kind}: {value}")]
    UnknownValue { kind: &'static str, value: String },
}

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("invalid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("expected a JSON object at the top level, found {0}")]
    NotAnObject(&'static str),
    #[error("not valid UTF-8: {0}")]
    NotUtf8(#[from] std::str::Utf8Error),
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum PageError {
    #[error("could not find <div id=\"info-list\"> followed by </div> in the page template")]
    MarkerNotFound,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Category {
    Personal,
    Education,
    Work,
    Finance,
    Social,
}

impl Category {
    pub const ALL: [Self; 5] =
        [Self::Personal, Self::Education, Self::Work, Self::Finance, Self::Social];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Personal => "Personal",
            Self::Education => "Education",
            Self::Work => "Work",
            Self::Finance => "Finance",
            Self::Social => "Social",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Personal" => Some(Self::Personal),
            "Education" => Some(Self::Education),
            "Work" => Some(Self::Work),
            "Finance" => Some(Self::Finance),
            "Social" => Some(Self::Social),
            _ => None,
        }
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `SQLite` storage class a field's values are expected to use.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    Null,
    Integer,
    Real,
    Text,
    Blob,
}

impl DataType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
            Self::Blob => "BLOB",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "NULL" => Some(Self::Null),
            "INTEGER" => Some(Self::Integer),
            "REAL" => Some(Self::Real),
            "TEXT" => Some(Self::Text),
            "BLOB" => Some(Self::Blob),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    Low,
    Medium,
    High,
}

impl Sensitivity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// One stored catalog row.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct FieldDefinition {
    pub id: i64,
    pub category: Category,
    pub subcategory: String,
    pub name: String,
    pub datatype: DataType,
    pub rules: String,
    pub formats: String,
    pub sensitivity: Sensitivity,
    pub multiplicity: bool,
}

/// A field definition that has not been assigned an id yet.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct NewFieldDefinition {
    pub category: Category,
    pub subcategory: String,
    pub name: String,
    pub datatype: DataType,
    #[serde(default)]
    pub rules: String,
    #[serde(default)]
    pub formats: String,
    pub sensitivity: Sensitivity,
    #[serde(default)]
    pub multiplicity: bool,
}

/// Spreadsheet headers, in the order the seed sheet lays them out.
pub const SHEET_COLUMNS: [&str; 8] = [
    "Category",
    "Sub-Category",
    "Name",
    "Data-Type",
    "Rules",
    "Format",
    "Sensitivity",
    "Multiplicity",
];

impl NewFieldDefinition {
    /// Validate the free-text parts of a definition before it is written.
    ///
    /// # Errors
    /// Returns [`CatalogError::Validation`] when the name is blank.
    pub fn validate(&self) -> Result<(), CatalogError> {
        if self.name.trim().is_empty() {
            return Err(CatalogError::Validation("field name MUST NOT be empty".to_string()));
        }
        Ok(())
    }

    /// Build a definition from one spreadsheet record keyed by [`SHEET_COLUMNS`].
    ///
    /// Missing `Rules`/`Format` cells read as empty text; a missing or blank
    /// `Multiplicity` reads as single-valued.
    ///
    /// # Errors
    /// Returns [`CatalogError`] when a required column is missing or an
    /// enumerated column holds an unknown value.
    pub fn from_sheet_record(record: &BTreeMap<String, String>) -> Result<Self, CatalogError> {
        let required = |column: &str| {
            record.get(column).map(|value| value.trim().to_string()).ok_or_else(|| {
                CatalogError::Validation(format!("spreadsheet row is missing column {column}"))
            })
        };
        let optional =
            |column: &str| record.get(column).map(|value| value.trim().to_string()).unwrap_or_default();

        let category_raw = required("Category")?;
        let datatype_raw = required("Data-Type")?;
        let sensitivity_raw = required("Sensitivity")?;

        let definition = Self {
            category: Category::parse(&category_raw)
                .ok_or(CatalogError::UnknownValue { kind: "category", value: category_raw })?,
            subcategory: required("Sub-Category")?,
            name: required("Name")?,
            datatype: DataType::parse(&datatype_raw.to_ascii_uppercase())
                .ok_or(CatalogError::UnknownValue { kind: "datatype", value: datatype_raw })?,
            rules: optional("Rules"),
            formats: optional("Format"),
            sensitivity: Sensitivity::parse(&sensitivity_raw.to_ascii_lowercase()).ok_or(
                CatalogError::UnknownValue { kind: "sensitivity", value: sensitivity_raw },
            )?,
            multiplicity: parse_multiplicity(&optional("Multiplicity"))?,
        };
        definition.validate()?;
        Ok(definition)
    }
}

/// Read a 0/1 style flag as spreadsheets tend to write it.
///
/// # Errors
/// Returns [`CatalogError::UnknownValue`] for anything that is not a
/// recognisable boolean.
pub fn parse_multiplicity(raw: &str) -> Result<bool, CatalogError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "0" | "false" | "no" => Ok(false),
        "1" | "true" | "yes" => Ok(true),
        other => Err(CatalogError::UnknownValue { kind: "multiplicity", value: other.to_string() }),
    }
}

/// Updatable catalog columns. `id` is deliberately absent.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum FieldColumn {
    Category,
    Subcategory,
    Name,
    Datatype,
    Rules,
    Formats,
    Sensitivity,
    Multiplicity,
}

impl FieldColumn {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Category => "category",
            Self::Subcategory => "subcategory",
            Self::Name => "name",
            Self::Datatype => "datatype",
            Self::Rules => "rules",
            Self::Formats => "formats",
            Self::Sensitivity => "sensitivity",
            Self::Multiplicity => "multiplicity",
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ColumnValue {
    Text(String),
    Flag(bool),
}

/// Partial update of one field definition.
///
/// Only the columns named by [`FieldColumn`] can be set, so no caller-chosen
/// column name ever reaches SQL.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FieldPatch {
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub datatype: Option<DataType>,
    #[serde(default)]
    pub rules: Option<String>,
    #[serde(default)]
    pub formats: Option<String>,
    #[serde(default)]
    pub sensitivity: Option<Sensitivity>,
    #[serde(default)]
    pub multiplicity: Option<bool>,
}

impl FieldPatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assignments().is_empty()
    }

    /// Column/value pairs in a stable column order.
    #[must_use]
    pub fn assignments(&self) -> Vec<(FieldColumn, ColumnValue)> {
        let mut out = Vec::new();
        if let Some(category) = self.category {
            out.push((FieldColumn::Category, ColumnValue::Text(category.as_str().to_string())));
        }
        if let Some(subcategory) = &self.subcategory {
            out.push((FieldColumn::Subcategory, ColumnValue::Text(subcategory.clone())));
        }
        if let Some(name) = &self.name {
            out.push((FieldColumn::Name, ColumnValue::Text(name.clone())));
        }
        if let Some(datatype) = self.datatype {
            out.push((FieldColumn::Datatype, ColumnValue::Text(datatype.as_str().to_string())));
        }
        if let Some(rules) = &self.rules {
            out.push((FieldColumn::Rules, ColumnValue::Text(rules.clone())));
        }
        if let Some(formats) = &self.formats {
            out.push((FieldColumn::Formats, ColumnValue::Text(formats.clone())));
        }
        if let Some(sensitivity) = self.sensitivity {
            out.push((
                FieldColumn::Sensitivity,
                ColumnValue::Text(sensitivity.as_str().to_string()),
            ));
        }
        if let Some(multiplicity) = self.multiplicity {
            out.push((FieldColumn::Multiplicity, ColumnValue::Flag(multiplicity)));
        }
        out
    }

    /// # Errors
    /// Returns [`CatalogError::Validation`] when the patch would blank the name.
    pub fn validate(&self) -> Result<(), CatalogError> {
        if self.name.as_deref().is_some_and(|name| name.trim().is_empty()) {
            return Err(CatalogError::Validation("field name MUST NOT be empty".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct GroupedField {
    pub name: String,
    pub multiplicity: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct SubcategoryGroup {
    pub subcategory: String,
    pub fields: Vec<GroupedField>,
}

/// Group one category's fields by subcategory, keeping first-seen order.
#[must_use]
pub fn group_by_subcategory(
    fields: &[FieldDefinition],
    category: Category,
) -> Vec<SubcategoryGroup> {
    let mut groups: Vec<SubcategoryGroup> = Vec::new();
    for field in fields.iter().filter(|field| field.category == category) {
        let entry = GroupedField { name: field.name.clone(), multiplicity: field.multiplicity };
        match groups.iter_mut().find(|group| group.subcategory == field.subcategory) {
            Some(group) => group.fields.push(entry),
            None => groups.push(SubcategoryGroup {
                subcategory: field.subcategory.clone(),
                fields: vec![entry],
            }),
        }
    }
    groups
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Parse text that must hold a single JSON object.
///
/// # Errors
/// Returns [`DocumentError`] for invalid JSON or a non-object top level.
pub fn parse_document(text: &str) -> Result<Document, DocumentError> {
    match serde_json::from_str::<Value>(text)? {
        Value::Object(map) => Ok(map),
        other => Err(DocumentError::NotAnObject(json_kind(&other))),
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    Success,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub document: Document,
    pub status: MergeStatus,
}

impl MergeOutcome {
    #[must_use]
    pub fn changed(&self) -> bool {
        self.status == MergeStatus::Success
    }
}

/// Right-biased union of `current` and `partial`.
///
/// Existing keys keep their position; new keys are appended. The status is
/// `Unchanged` exactly when the merged document equals `current`.
#[must_use]
pub fn merge_documents(current: &Document, partial: Document) -> MergeOutcome {
    let mut merged = current.clone();
    for (key, value) in partial {
        merged.insert(key, value);
    }
    let status = if &merged == current { MergeStatus::Unchanged } else { MergeStatus::Success };
    MergeOutcome { document: merged, status }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    Success,
    Unchanged,
    Error,
}

/// Outcome object handed to a UI layer instead of an error.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct StatusReply {
    pub status: ReplyStatus,
    pub message: String,
}

impl StatusReply {
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self { status: ReplyStatus::Success, message: message.into() }
    }

    #[must_use]
    pub fn unchanged(message: impl Into<String>) -> Self {
        Self { status: ReplyStatus::Unchanged, message: message.into() }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self { status: ReplyStatus::Error, message: message.into() }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.status == ReplyStatus::Error
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct DisplayItem {
    pub label: String,
    pub search_terms: String,
    pub value: String,
}

/// Text shown for one document value. Strings are shown verbatim.
#[must_use]
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(_) | Value::Number(_) | Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// One display item per document entry, in document order.
#[must_use]
pub fn render_items(document: &Document) -> Vec<DisplayItem> {
    document
        .iter()
        .map(|(key, value)| DisplayItem {
            label: format!("{key}:"),
            search_terms: key.to_lowercase(),
            value: display_value(value),
        })
        .collect()
}

#[must_use]
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[must_use]
pub fn render_item_html(item: &DisplayItem) -> String {
    let search_terms = escape_html(&item.search_terms);
    let label = escape_html(&item.label);
    let value = escape_html(&item.value);
    format!(
        r#"        <div class="info-item" data-search-terms="{search_terms}">
            <span class="info-label">{label}</span>
            <span class="info-value">{value}</span>
            <div class="copy-actions">
                <button class="copy-btn" data-value="{value}">&#x1F4C4;</button>
                <button class="menu-btn" onclick="toggleMenu(this)">&#x22EE;</button>
                <div class="format-menu">
                    <div class="menu-option" data-format="upper">ALL CAPS</div>
                    <div class="menu-option" data-format="lower">all small</div>
                    <div class="menu-option" data-format="nospace">No spaces</div>
                    <div class="menu-option" data-format="nospecial">No special characters</div>
                </div>
            </div>
        </div>"#
    )
}

#[must_use]
pub fn render_info_list(items: &[DisplayItem]) -> String {
    items.iter().map(render_item_html).collect::<Vec<_>>().join("\n")
}

/// Replace whatever sits between the info-list opening tag and the next
/// closing `</div>` with `fragment`.
///
/// # Errors
/// Returns [`PageError::MarkerNotFound`] when either tag is missing.
pub fn splice_page(template: &str, fragment: &str) -> Result<String, PageError> {
    let start = template.find(INFO_LIST_START).ok_or(PageError::MarkerNotFound)?;
    let content_start = start + INFO_LIST_START.len();
    let end = template[content_start..]
        .find(INFO_LIST_END)
        .map(|offset| content_start + offset)
        .ok_or(PageError::MarkerNotFound)?;

    let mut page = String::with_capacity(template.len() + fragment.len() + 2);
    page.push_str(&template[..content_start]);
    page.push('\n');
    page.push_str(fragment);
    page.push('\n');
    page.push_str(&template[end..]);
    Ok(page)
}

/// Render `document` into `template`.
///
/// # Errors
/// Returns [`PageError::MarkerNotFound`] when the template lacks the
/// info-list region.
pub fn build_page(document: &Document, template: &str) -> Result<String, PageError> {
    splice_page(template, &render_info_list(&render_items(document)))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            other => panic!("fixture is not an object: {other}"),
        }
    }

    fn field(id: i64, category: Category, subcategory: &str, name: &str, multiple: bool) -> FieldDefinition {
        FieldDefinition {
            id,
            category,
            subcategory: subcategory.to_string(),
            name: name.to_string(),
            datatype: DataType::Text,
            rules: String::new(),
            formats: String::new(),
            sensitivity: Sensitivity::Low,
            multiplicity: multiple,
        }
    }

    fn sheet_record(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(key, value)| ((*key).to_string(), (*value).to_string())).collect()
    }

    #[test]
    fn enum_strings_round_trip_through_parse() {
        for category in Category::ALL {
            assert_eq!(Category::parse(category.as_str()), Some(category));
        }
        for datatype in
            [DataType::Null, DataType::Integer, DataType::Real, DataType::Text, DataType::Blob]
        {
            assert_eq!(DataType::parse(datatype.as_str()), Some(datatype));
        }
        for sensitivity in [Sensitivity::Low, Sensitivity::Medium, Sensitivity::High] {
            assert_eq!(Sensitivity::parse(sensitivity.as_str()), Some(sensitivity));
        }
        assert_eq!(Category::parse("personal"), None);
    }

    #[test]
    fn field_definition_serializes_with_column_names() -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(field(7, Category::Personal, "Identity", "Full Name", false))?;
        assert_eq!(
            value,
            json!({
                "id": 7,
                "category": "Personal",
                "subcategory": "Identity",
                "name": "Full Name",
                "datatype": "TEXT",
                "rules": "",
                "formats": "",
                "sensitivity": "low",
                "multiplicity": false
            })
        );
        Ok(())
    }

    #[test]
    fn sheet_record_maps_every_column() -> Result<(), CatalogError> {
        let record = sheet_record(&[
            ("Category", "Work"),
            ("Sub-Category", "Employer"),
            ("Name", "Company"),
            ("Data-Type", "text"),
            ("Rules", r#"{"max":80}"#),
            ("Format", ""),
            ("Sensitivity", "Medium"),
            ("Multiplicity", "1"),
        ]);
        let definition = NewFieldDefinition::from_sheet_record(&record)?;
        assert_eq!(definition.category, Category::Work);
        assert_eq!(definition.subcategory, "Employer");
        assert_eq!(definition.datatype, DataType::Text);
        assert_eq!(definition.rules, r#"{"max":80}"#);
        assert_eq!(definition.sensitivity, Sensitivity::Medium);
        assert!(definition.multiplicity);
        Ok(())
    }

    #[test]
    fn sheet_record_rejects_unknown_category_and_missing_name() {
        let bad_category = sheet_record(&[
            ("Category", "Hobbies"),
            ("Sub-Category", "Games"),
            ("Name", "Console"),
            ("Data-Type", "TEXT"),
            ("Sensitivity", "low"),
        ]);
        assert_eq!(
            NewFieldDefinition::from_sheet_record(&bad_category),
            Err(CatalogError::UnknownValue { kind: "category", value: "Hobbies".to_string() })
        );

        let missing_name = sheet_record(&[
            ("Category", "Personal"),
            ("Sub-Category", "Identity"),
            ("Data-Type", "TEXT"),
            ("Sensitivity", "low"),
        ]);
        assert!(matches!(
            NewFieldDefinition::from_sheet_record(&missing_name),
            Err(CatalogError::Validation(_))
        ));
    }

    #[test]
    fn multiplicity_accepts_spreadsheet_spellings() {
        assert_eq!(parse_multiplicity(""), Ok(false));
        assert_eq!(parse_multiplicity("0"), Ok(false));
        assert_eq!(parse_multiplicity("TRUE"), Ok(true));
        assert_eq!(parse_multiplicity(" 1 "), Ok(true));
        assert!(parse_multiplicity("2").is_err());
    }

    #[test]
    fn empty_patch_has_no_assignments() {
        let patch = FieldPatch::default();
        assert!(patch.is_empty());
        assert!(patch.assignments().is_empty());
    }

    #[test]
    fn patch_assignments_use_fixed_column_names() {
        let patch = FieldPatch {
            name: Some("Given Name".to_string()),
            sensitivity: Some(Sensitivity::High),
            multiplicity: Some(true),
            ..FieldPatch::default()
        };
        let columns =
            patch.assignments().into_iter().map(|(column, _)| column.as_str()).collect::<Vec<_>>();
        assert_eq!(columns, vec!["name", "sensitivity", "multiplicity"]);
    }

    #[test]
    fn patch_deserialization_rejects_unknown_columns() {
        let parsed = serde_json::from_str::<FieldPatch>(r#"{"id": 4}"#);
        assert!(parsed.is_err());
        let parsed = serde_json::from_str::<FieldPatch>(r#"{"name; DROP TABLE fields": "x"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn patch_rejects_blank_name() {
        let patch = FieldPatch { name: Some("  ".to_string()), ..FieldPatch::default() };
        assert!(patch.validate().is_err());
    }

    #[test]
    fn grouping_keeps_first_seen_subcategory_order() {
        let fields = vec![
            field(1, Category::Personal, "Identity", "Full Name", false),
            field(2, Category::Personal, "Family", "Father Name", false),
            field(3, Category::Work, "Employer", "Company", false),
            field(4, Category::Personal, "Identity", "Nickname", true),
        ];
        let groups = group_by_subcategory(&fields, Category::Personal);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].subcategory, "Identity");
        assert_eq!(
            groups[0].fields,
            vec![
                GroupedField { name: "Full Name".to_string(), multiplicity: false },
                GroupedField { name: "Nickname".to_string(), multiplicity: true },
            ]
        );
        assert_eq!(groups[1].subcategory, "Family");
        assert!(group_by_subcategory(&fields, Category::Finance).is_empty());
    }

    #[test]
    fn parse_document_rejects_non_objects() {
        assert!(matches!(parse_document("[1, 2]"), Err(DocumentError::NotAnObject("an array"))));
        assert!(matches!(parse_document("{not json"), Err(DocumentError::Malformed(_))));
        assert!(matches!(parse_document("{}"), Ok(map) if map.is_empty()));
    }

    #[test]
    fn merge_into_empty_document_reports_success() {
        let outcome =
            merge_documents(&Document::new(), doc(json!({"Name": "Alice", "Age": "30"})));
        assert_eq!(outcome.status, MergeStatus::Success);
        assert_eq!(Value::Object(outcome.document), json!({"Name": "Alice", "Age": "30"}));
    }

    #[test]
    fn merge_is_right_biased_and_keeps_key_position() {
        let current = doc(json!({"a": 1, "b": 2}));
        let outcome = merge_documents(&current, doc(json!({"a": 3, "c": 4})));
        assert_eq!(outcome.status, MergeStatus::Success);
        let keys = outcome.document.keys().cloned().collect::<Vec<_>>();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(outcome.document.get("a"), Some(&json!(3)));
    }

    #[test]
    fn merge_detects_value_changes_with_equal_key_count() {
        let current = doc(json!({"a": 1}));
        let outcome = merge_documents(&current, doc(json!({"a": 2})));
        assert!(outcome.changed());
        assert_eq!(Value::Object(outcome.document), json!({"a": 2}));
    }

    #[test]
    fn merge_of_subset_with_same_values_is_unchanged() {
        let current = doc(json!({"a": 1, "b": "x"}));
        let outcome = merge_documents(&current, doc(json!({"b": "x"})));
        assert_eq!(outcome.status, MergeStatus::Unchanged);
        let outcome = merge_documents(&current, Document::new());
        assert_eq!(outcome.status, MergeStatus::Unchanged);
    }

    #[test]
    fn render_items_derive_label_search_terms_and_value() {
        let items = render_items(&doc(json!({
            "Father Name": "Bob",
            "Age": 30,
            "Verified": true,
            "Notes": null
        })));
        assert_eq!(
            items[0],
            DisplayItem {
                label: "Father Name:".to_string(),
                search_terms: "father name".to_string(),
                value: "Bob".to_string(),
            }
        );
        assert_eq!(items[1].value, "30");
        assert_eq!(items[2].value, "true");
        assert_eq!(items[3].value, "");
    }

    #[test]
    fn item_html_escapes_user_text() {
        let html = render_item_html(&DisplayItem {
            label: "Motto:".to_string(),
            search_terms: "motto".to_string(),
            value: r#"<b>"bold" & brave</b>"#.to_string(),
        });
        assert!(html.contains("&lt;b&gt;&quot;bold&quot; &amp; brave&lt;/b&gt;"));
        assert!(!html.contains("<b>"));
        assert!(html.contains(r#"data-search-terms="motto""#));
    }

    #[test]
    fn splice_replaces_existing_info_list_content() -> Result<(), PageError> {
        let template =
            "<html><body><div id=\"info-list\"><p>placeholder</p></div><footer></footer></body></html>";
        let page = splice_page(template, "ITEMS")?;
        assert_eq!(
            page,
            "<html><body><div id=\"info-list\">\nITEMS\n</div><footer></footer></body></html>"
        );
        Ok(())
    }

    #[test]
    fn splice_requires_both_markers() {
        assert_eq!(splice_page("<div id=\"other\"></div>", "x"), Err(PageError::MarkerNotFound));
        assert_eq!(splice_page("<div id=\"info-list\">", "x"), Err(PageError::MarkerNotFound));
    }

    #[test]
    fn build_page_contains_every_entry() -> Result<(), PageError> {
        let template = "<div id=\"info-list\"></div>";
        let page = build_page(&doc(json!({"Name": "Alice", "City": "Paris"})), template)?;
        assert!(page.contains("Name:"));
        assert!(page.contains(r#"data-search-terms="city""#));
        assert!(page.contains("Paris"));
        Ok(())
    }

    fn scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<i64>().prop_map(Value::from),
            any::<bool>().prop_map(Value::from),
            "[a-zA-Z0-9 ]{0,12}".prop_map(Value::from),
        ]
    }

    fn document_strategy() -> impl Strategy<Value = Document> {
        proptest::collection::vec(("[a-z]{1,6}", scalar()), 0..8)
            .prop_map(|pairs| pairs.into_iter().collect::<Document>())
    }

    proptest! {
        #[test]
        fn property_merge_is_idempotent(current in document_strategy(), partial in document_strategy()) {
            let first = merge_documents(&current, partial.clone());
            let second = merge_documents(&first.document, partial);
            prop_assert_eq!(second.status, MergeStatus::Unchanged);
            prop_assert_eq!(second.document, first.document);
        }
    }

    proptest! {
        #[test]
        fn property_merge_contains_every_partial_entry(current in document_strategy(), partial in document_strategy()) {
            let outcome = merge_documents(&current, partial.clone());
            for (key, value) in &partial {
                prop_assert_eq!(outcome.document.get(key), Some(value));
            }
            for key in current.keys() {
                prop_assert!(outcome.document.contains_key(key));
            }
        }
    }
}
