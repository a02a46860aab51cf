//! Record operations driven by a launcher front end.
//!
//! Reads come straight from the cache. Writes go to the remote base first and
//! the cache is then overwritten with what the service returned.

use serde::Serialize;
use url::Url;

use crate::airtable::types::{Collection, LinkRecord, ListRecord, NewLink, NewList};
use crate::airtable::RemoteRecords;
use crate::cache::{CacheStore, ListFilter};
use crate::error::{Error, Result};

/// Change to a single field of a record being edited
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldEdit<T> {
  Keep,
  Clear,
  Set(T),
}

impl<T> Default for FieldEdit<T> {
  fn default() -> Self {
    FieldEdit::Keep
  }
}

impl<T: Clone> FieldEdit<T> {
  fn apply(&self, current: Option<T>) -> Option<T> {
    match self {
      FieldEdit::Keep => current,
      FieldEdit::Clear => None,
      FieldEdit::Set(value) => Some(value.clone()),
    }
  }
}

/// Edits to apply to an existing Link, or the fields of a new one
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkEdit {
  pub title: FieldEdit<String>,
  pub url: FieldEdit<String>,
  pub note: FieldEdit<String>,
  pub category: FieldEdit<String>,
  pub tags: FieldEdit<Vec<String>>,
  /// List identities
  pub lists: FieldEdit<Vec<String>>,
  pub done: Option<bool>,
}

/// What a Link would look like after an edit, before it is saved
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkDraft {
  pub id: Option<String>,
  pub title: String,
  pub url: String,
  pub note: Option<String>,
  pub category: Option<String>,
  pub tags: Vec<String>,
  pub done: bool,
  pub list_ids: Vec<String>,
  pub list_names: Vec<String>,
  /// Reasons the draft would be rejected by `save_link`
  pub problems: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeleteReport {
  pub links_deleted: usize,
  pub lists_deleted: usize,
}

/// Cached Links, optionally restricted to one List. Never touches the remote.
pub fn list_links(cache: &CacheStore, filter: Option<&ListFilter>) -> Result<Vec<LinkRecord>> {
  cache.get_links(filter, None)
}

/// Cached Lists with their derived status
pub fn list_lists(cache: &CacheStore) -> Result<Vec<ListRecord>> {
  cache.get_lists(None)
}

/// Preview `edit` applied to Link `id`, or to an empty Link when `id` is
/// `None`. Nothing is written.
pub fn edit_link(cache: &CacheStore, id: Option<&str>, edit: &LinkEdit) -> Result<LinkDraft> {
  let current = id.map(|id| cache.get_link(id)).transpose()?;

  let url = edit
    .url
    .apply(current.as_ref().map(|l| l.url.clone()))
    .unwrap_or_default()
    .trim()
    .to_string();
  let title = edit
    .title
    .apply(current.as_ref().map(|l| l.title.clone()))
    .map(|t| t.trim().to_string())
    .filter(|t| !t.is_empty())
    .unwrap_or_else(|| url.clone());
  let tags = dedup(
    edit
      .tags
      .apply(current.as_ref().map(|l| l.tags.clone()))
      .unwrap_or_default(),
  );
  let list_ids = dedup(
    edit
      .lists
      .apply(current.as_ref().map(|l| l.list_ids.clone()))
      .unwrap_or_default(),
  );

  let mut draft = LinkDraft {
    id: current.as_ref().map(|l| l.id.clone()),
    title,
    url,
    note: non_empty(edit.note.apply(current.as_ref().and_then(|l| l.note.clone()))),
    category: non_empty(
      edit
        .category
        .apply(current.as_ref().and_then(|l| l.category.clone())),
    ),
    tags,
    done: edit
      .done
      .unwrap_or_else(|| current.as_ref().is_some_and(|l| l.done)),
    list_names: list_names(cache, &list_ids)?,
    list_ids,
    problems: Vec::new(),
  };
  draft.problems = problems(cache, &draft)?;
  Ok(draft)
}

pub struct Actions<'a, R> {
  remote: &'a R,
  cache: &'a CacheStore,
}

impl<'a, R: RemoteRecords> Actions<'a, R> {
  pub fn new(remote: &'a R, cache: &'a CacheStore) -> Self {
    Self { remote, cache }
  }

  /// Apply `edit` and write the Link remotely, creating it when `id` is
  /// `None`. Returns the Link as the service stored it.
  pub async fn save_link(&self, id: Option<&str>, edit: &LinkEdit) -> Result<LinkRecord> {
    let draft = edit_link(self.cache, id, edit)?;
    if let Some(problem) = draft.problems.first() {
      return Err(Error::Validation(problem.clone()));
    }

    let saved = match &draft.id {
      Some(id) => {
        let current = self.cache.get_link(id)?;
        let updated = LinkRecord {
          title: draft.title,
          url: draft.url,
          note: draft.note,
          category: draft.category,
          tags: draft.tags,
          done: draft.done,
          list_ids: draft.list_ids,
          ..current
        };
        single(self.remote.update_links(&[updated]).await?, "update")?
      }
      None => {
        let new = NewLink {
          title: draft.title,
          note: draft.note,
          url: draft.url,
          category: draft.category,
          tags: draft.tags,
          done: draft.done,
          list_ids: draft.list_ids,
        };
        single(self.remote.create_links(&[new]).await?, "create")?
      }
    };

    self.cache.save_links(std::slice::from_ref(&saved))?;
    tracing::info!(id = %saved.id, "Saved link");
    self.cache.get_link(&saved.id)
  }

  /// Mark Link `id` as done
  pub async fn complete_link(&self, id: &str) -> Result<LinkRecord> {
    let mut link = self.cache.get_link(id)?;
    link.done = true;

    let saved = single(self.remote.update_links(&[link]).await?, "update")?;
    self.cache.save_links(std::slice::from_ref(&saved))?;
    tracing::info!(id, "Completed link");
    self.cache.get_link(id)
  }

  pub async fn delete_link(&self, id: &str) -> Result<DeleteReport> {
    let deleted = self.remote.delete(Collection::Links, &[id.to_string()]).await?;
    let links_deleted = self.cache.delete_records(Collection::Links, &deleted)?;

    tracing::info!(id, "Deleted link");
    Ok(DeleteReport {
      links_deleted,
      lists_deleted: 0,
    })
  }

  /// Delete List `id`. With `cascade`, the Links in it are deleted first.
  pub async fn delete_list(&self, id: &str, cascade: bool) -> Result<DeleteReport> {
    let mut report = DeleteReport::default();

    if cascade {
      let linked: Vec<String> = self
        .cache
        .get_links(Some(&ListFilter::ById(id.to_string())), None)?
        .into_iter()
        .map(|l| l.id)
        .collect();
      if !linked.is_empty() {
        let deleted = self.remote.delete(Collection::Links, &linked).await?;
        report.links_deleted = self.cache.delete_records(Collection::Links, &deleted)?;
      }
    }

    let deleted = self.remote.delete(Collection::Lists, &[id.to_string()]).await?;
    report.lists_deleted = self.cache.delete_records(Collection::Lists, &deleted)?;

    tracing::info!(
      id,
      cascade,
      links_deleted = report.links_deleted,
      "Deleted list"
    );
    Ok(report)
  }

  /// Return the cached List titled `title`, creating it remotely if there is
  /// none.
  pub async fn create_list(&self, title: &str, note: Option<&str>) -> Result<ListRecord> {
    let title = title.trim();
    if title.is_empty() {
      return Err(Error::Validation("list title must not be empty".into()));
    }

    let existing = self
      .cache
      .get_lists(Some(&ListFilter::ByTitle(title.to_string())))?;
    if let Some(list) = existing.into_iter().next() {
      tracing::debug!(id = %list.id, "Reusing existing list");
      return Ok(list);
    }

    let new = NewList {
      title: title.to_string(),
      note: note.map(str::trim).filter(|n| !n.is_empty()).map(String::from),
    };
    let created = single(self.remote.create_lists(&[new]).await?, "create")?;
    self.cache.save_lists(std::slice::from_ref(&created))?;

    tracing::info!(id = %created.id, "Created list");
    self.cache.get_list(&created.id)
  }

  /// Write a List's title and note remotely
  pub async fn update_list(&self, list: &ListRecord) -> Result<ListRecord> {
    if list.title.trim().is_empty() {
      return Err(Error::Validation("list title must not be empty".into()));
    }

    let saved = single(
      self.remote.update_lists(std::slice::from_ref(list)).await?,
      "update",
    )?;
    self.cache.save_lists(std::slice::from_ref(&saved))?;
    self.cache.get_list(&saved.id)
  }
}

fn list_names(cache: &CacheStore, list_ids: &[String]) -> Result<Vec<String>> {
  let mut names = Vec::new();
  for id in list_ids {
    match cache.get_list(id) {
      Ok(list) => names.push(list.title),
      Err(Error::NotFound(_)) => {}
      Err(e) => return Err(e),
    }
  }
  Ok(names)
}

fn problems(cache: &CacheStore, draft: &LinkDraft) -> Result<Vec<String>> {
  let mut problems = Vec::new();

  match Url::parse(&draft.url) {
    Ok(url) if url.host_str().is_some_and(|h| !h.is_empty()) => {}
    Ok(_) => problems.push(format!("URL has no host: {}", draft.url)),
    Err(_) if draft.url.is_empty() => problems.push("URL is required".to_string()),
    Err(e) => problems.push(format!("invalid URL {}: {}", draft.url, e)),
  }

  if let Some(category) = &draft.category {
    let categories = cache.vocabularies()?.categories;
    if categories.is_empty() {
      tracing::debug!("No cached categories, accepting {}", category);
    } else if !categories.contains(category) {
      problems.push(format!(
        "unknown category {} (expected one of: {})",
        category,
        categories.join(", ")
      ));
    }
  }

  Ok(problems)
}

fn single<T>(records: Vec<T>, operation: &str) -> Result<T> {
  records.into_iter().next().ok_or_else(|| {
    Error::NotFound(format!("{} returned no record", operation))
  })
}

fn non_empty(value: Option<String>) -> Option<String> {
  value
    .map(|v| v.trim().to_string())
    .filter(|v| !v.is_empty())
}

/// Trim, drop empties and keep the first of each value
fn dedup(values: Vec<String>) -> Vec<String> {
  let mut seen = std::collections::HashSet::new();
  values
    .into_iter()
    .map(|v| v.trim().to_string())
    .filter(|v| !v.is_empty() && seen.insert(v.clone()))
    .collect()
}
