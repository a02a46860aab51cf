//! Serde types matching the Airtable REST API.
//!
//! These are kept apart from the domain types so the wire shape (display-name
//! field keys, computed fields, the record envelope) never leaks upward.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{LinkRecord, ListRecord, NewLink, NewList, Vocabularies};

// ============================================================================
// Record envelopes
// ============================================================================

/// A record as returned by list, create and update calls
#[derive(Debug, Deserialize)]
pub struct ApiRecord<F> {
  pub id: String,
  #[serde(rename = "createdTime")]
  pub created_time: DateTime<Utc>,
  pub fields: F,
}

/// A record as sent on create (no id) and update (with id).
/// `createdTime` has no slot here so it can never be sent back.
#[derive(Debug, Serialize)]
pub struct ApiWriteRecord<F> {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  pub fields: F,
}

#[derive(Debug, Serialize)]
pub struct ApiWriteRequest<F> {
  pub records: Vec<ApiWriteRecord<F>>,
  /// Lets the service coerce new select options instead of rejecting them
  pub typecast: bool,
}

#[derive(Debug, Deserialize)]
pub struct ApiRecordPage<F> {
  #[serde(default = "Vec::new")]
  pub records: Vec<ApiRecord<F>>,
  pub offset: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiWriteResponse<F> {
  #[serde(default = "Vec::new")]
  pub records: Vec<ApiRecord<F>>,
}

#[derive(Debug, Deserialize)]
pub struct ApiDeletedRecord {
  pub id: String,
  #[serde(default)]
  pub deleted: bool,
}

#[derive(Debug, Deserialize)]
pub struct ApiDeleteResponse {
  #[serde(default)]
  pub records: Vec<ApiDeletedRecord>,
}

// ============================================================================
// Table fields
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiLinkFields {
  #[serde(rename = "Name", default)]
  pub name: String,
  #[serde(rename = "Note", default)]
  pub note: Option<String>,
  #[serde(rename = "URL", default)]
  pub url: String,
  #[serde(rename = "Category", default)]
  pub category: Option<String>,
  #[serde(rename = "Tags", default)]
  pub tags: Vec<String>,
  // The service omits unchecked checkboxes
  #[serde(rename = "Done", default)]
  pub done: bool,
  #[serde(rename = "Lists", default)]
  pub lists: Vec<String>,
  #[serde(rename = "Last Modified", default, skip_serializing)]
  pub last_modified: Option<DateTime<Utc>>,
  #[serde(rename = "Record URL", default, skip_serializing)]
  pub record_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiListFields {
  #[serde(rename = "Name", default)]
  pub name: String,
  #[serde(rename = "Note", default)]
  pub note: Option<String>,
  #[serde(rename = "Last Modified", default, skip_serializing)]
  pub last_modified: Option<DateTime<Utc>>,
  #[serde(rename = "Record URL", default, skip_serializing)]
  pub record_url: Option<String>,
}

impl From<ApiRecord<ApiLinkFields>> for LinkRecord {
  fn from(record: ApiRecord<ApiLinkFields>) -> Self {
    let fields = record.fields;
    LinkRecord {
      id: record.id,
      title: fields.name,
      note: fields.note.filter(|n| !n.is_empty()),
      url: fields.url,
      category: fields.category.filter(|c| !c.is_empty()),
      tags: fields.tags,
      done: fields.done,
      created: record.created_time,
      modified: fields.last_modified.unwrap_or(record.created_time),
      record_url: fields.record_url.unwrap_or_default(),
      list_ids: fields.lists,
      list_names: Vec::new(),
    }
  }
}

impl From<ApiRecord<ApiListFields>> for ListRecord {
  fn from(record: ApiRecord<ApiListFields>) -> Self {
    let fields = record.fields;
    ListRecord {
      id: record.id,
      title: fields.name,
      note: fields.note.filter(|n| !n.is_empty()),
      created: record.created_time,
      modified: fields.last_modified.unwrap_or(record.created_time),
      record_url: fields.record_url.unwrap_or_default(),
      link_ids: Vec::new(),
      link_names: Vec::new(),
      link_count: 0,
      done_count: 0,
      status: Default::default(),
    }
  }
}

impl From<&LinkRecord> for ApiLinkFields {
  fn from(link: &LinkRecord) -> Self {
    ApiLinkFields {
      name: link.title.clone(),
      note: link.note.clone(),
      url: link.url.clone(),
      category: link.category.clone(),
      tags: link.tags.clone(),
      done: link.done,
      lists: link.list_ids.clone(),
      last_modified: None,
      record_url: None,
    }
  }
}

impl From<&NewLink> for ApiLinkFields {
  fn from(link: &NewLink) -> Self {
    ApiLinkFields {
      name: link.title.clone(),
      note: link.note.clone(),
      url: link.url.clone(),
      category: link.category.clone(),
      tags: link.tags.clone(),
      done: link.done,
      lists: link.list_ids.clone(),
      last_modified: None,
      record_url: None,
    }
  }
}

impl From<&ListRecord> for ApiListFields {
  fn from(list: &ListRecord) -> Self {
    ApiListFields {
      name: list.title.clone(),
      note: list.note.clone(),
      last_modified: None,
      record_url: None,
    }
  }
}

impl From<&NewList> for ApiListFields {
  fn from(list: &NewList) -> Self {
    ApiListFields {
      name: list.title.clone(),
      note: list.note.clone(),
      last_modified: None,
      record_url: None,
    }
  }
}

// ============================================================================
// Base schema (meta API)
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiSchemaResponse {
  #[serde(default)]
  pub tables: Vec<ApiTable>,
}

#[derive(Debug, Deserialize)]
pub struct ApiTable {
  pub name: String,
  #[serde(default)]
  pub fields: Vec<ApiField>,
}

#[derive(Debug, Deserialize)]
pub struct ApiField {
  pub name: String,
  pub options: Option<ApiFieldOptions>,
}

#[derive(Debug, Deserialize)]
pub struct ApiFieldOptions {
  #[serde(default)]
  pub choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ApiChoice {
  pub name: String,
}

impl ApiSchemaResponse {
  /// Extract the Tags and Category choices of the links table
  pub fn into_vocabularies(self, links_table: &str) -> Vocabularies {
    let Some(table) = self.tables.into_iter().find(|t| t.name == links_table) else {
      return Vocabularies::default();
    };

    let mut vocab = Vocabularies::default();
    for field in table.fields {
      let choices = field
        .options
        .map(|o| o.choices.into_iter().map(|c| c.name).collect())
        .unwrap_or_default();

      match field.name.as_str() {
        "Tags" => vocab.tags = choices,
        "Category" => vocab.categories = choices,
        _ => {}
      }
    }
    vocab
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_link_record_from_api() {
    let record: ApiRecord<ApiLinkFields> = serde_json::from_value(json!({
      "id": "rec1",
      "createdTime": "2024-01-02T03:04:05.000Z",
      "fields": {
        "Name": "Rust book",
        "URL": "https://doc.rust-lang.org/book/",
        "Tags": ["rust", "docs"],
        "Lists": ["recL1"],
        "Last Modified": "2024-02-01T00:00:00.000Z",
        "Record URL": "https://airtable.com/app/tbl/rec1"
      }
    }))
    .unwrap();

    let link = LinkRecord::from(record);
    assert_eq!(link.title, "Rust book");
    assert!(!link.done);
    assert_eq!(link.note, None);
    assert_eq!(link.list_ids, vec!["recL1"]);
    assert_eq!(link.modified.to_rfc3339(), "2024-02-01T00:00:00+00:00");
    assert_eq!(link.record_url, "https://airtable.com/app/tbl/rec1");
  }

  #[test]
  fn test_missing_last_modified_falls_back_to_created() {
    let record: ApiRecord<ApiListFields> = serde_json::from_value(json!({
      "id": "recL1",
      "createdTime": "2024-01-02T03:04:05.000Z",
      "fields": { "Name": "Reading", "Links": ["rec1", "rec2"] }
    }))
    .unwrap();

    let list = ListRecord::from(record);
    assert_eq!(list.modified, list.created);
    assert_eq!(list.link_count, 0);
  }

  #[test]
  fn test_write_record_omits_computed_fields() {
    let fields = ApiLinkFields {
      name: "x".into(),
      url: "https://example.com".into(),
      last_modified: Some(Utc::now()),
      record_url: Some("https://airtable.com/x".into()),
      ..Default::default()
    };
    let body = serde_json::to_value(ApiWriteRecord {
      id: Some("rec1".to_string()),
      fields,
    })
    .unwrap();

    let fields = body["fields"].as_object().unwrap();
    assert!(!fields.contains_key("Last Modified"));
    assert!(!fields.contains_key("Record URL"));
    assert!(fields["Note"].is_null());
    assert!(fields["Category"].is_null());
    assert!(body.get("createdTime").is_none());
  }

  #[test]
  fn test_create_record_has_no_id() {
    let body = serde_json::to_value(ApiWriteRecord::<ApiListFields> {
      id: None,
      fields: Default::default(),
    })
    .unwrap();
    assert!(body.get("id").is_none());
  }

  #[test]
  fn test_vocabularies_from_schema() {
    let schema: ApiSchemaResponse = serde_json::from_value(json!({
      "tables": [
        { "name": "Lists", "fields": [{ "name": "Name" }] },
        { "name": "Links", "fields": [
          { "name": "Name" },
          { "name": "Tags", "options": { "choices": [{ "name": "rust" }, { "name": "go" }] } },
          { "name": "Category", "options": { "choices": [{ "name": "Article" }] } }
        ]}
      ]
    }))
    .unwrap();

    let vocab = schema.into_vocabularies("Links");
    assert_eq!(vocab.tags, vec!["rust", "go"]);
    assert_eq!(vocab.categories, vec!["Article"]);
  }

  #[test]
  fn test_vocabularies_missing_table_is_empty() {
    let schema: ApiSchemaResponse = serde_json::from_value(json!({ "tables": [] })).unwrap();
    assert_eq!(schema.into_vocabularies("Links"), Vocabularies::default());
  }
}
