//! In-memory stand-in for the Airtable base used by sync and action tests.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashSet;
use std::sync::Mutex;

use crate::airtable::types::{Collection, LinkRecord, ListRecord, NewLink, NewList, Vocabularies};
use crate::airtable::RemoteRecords;
use crate::error::{Error, Result};

pub fn at(minutes: i64) -> DateTime<Utc> {
  Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes)
}

pub fn link(id: &str, lists: &[&str], done: bool) -> LinkRecord {
  LinkRecord {
    id: id.to_string(),
    title: format!("Link {}", id),
    note: None,
    url: format!("https://example.com/{}", id),
    category: None,
    tags: Vec::new(),
    done,
    created: at(0),
    modified: at(1),
    record_url: format!("https://airtable.com/{}", id),
    list_ids: lists.iter().map(|s| s.to_string()).collect(),
    list_names: Vec::new(),
  }
}

pub fn list(id: &str, title: &str) -> ListRecord {
  ListRecord {
    id: id.to_string(),
    title: title.to_string(),
    note: None,
    created: at(0),
    modified: at(1),
    record_url: format!("https://airtable.com/{}", id),
    link_ids: Vec::new(),
    link_names: Vec::new(),
    link_count: 0,
    done_count: 0,
    status: Default::default(),
  }
}

#[derive(Default)]
pub struct FakeRemote {
  pub links: Mutex<Vec<LinkRecord>>,
  pub lists: Mutex<Vec<ListRecord>>,
  pub vocab: Mutex<Vocabularies>,
  /// Operations that answer with HTTP 500
  pub failing: Mutex<HashSet<&'static str>>,
  /// Operations that never complete
  pub stalled: Mutex<HashSet<&'static str>>,
  /// Operation log, in call order
  pub calls: Mutex<Vec<String>>,
  next_id: Mutex<usize>,
}

impl FakeRemote {
  pub fn with(links: Vec<LinkRecord>, lists: Vec<ListRecord>) -> Self {
    let remote = Self::default();
    *remote.links.lock().unwrap() = links;
    *remote.lists.lock().unwrap() = lists;
    remote
  }

  pub fn fail(&self, operation: &'static str) {
    self.failing.lock().unwrap().insert(operation);
  }

  pub fn stall(&self, operation: &'static str) {
    self.stalled.lock().unwrap().insert(operation);
  }

  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }

  pub fn calls_to(&self, operation: &str) -> usize {
    self.calls().iter().filter(|c| c.as_str() == operation).count()
  }

  /// Record the call, then stall or fail if configured to
  async fn enter(&self, operation: &'static str) -> Result<()> {
    self.calls.lock().unwrap().push(operation.to_string());
    let stalled = self.stalled.lock().unwrap().contains(operation);
    if stalled {
      std::future::pending::<()>().await;
    }
    if self.failing.lock().unwrap().contains(operation) {
      return Err(Error::Status {
        operation,
        status: 500,
        body: "fake failure".into(),
      });
    }
    Ok(())
  }

  fn assign_id(&self, prefix: &str) -> String {
    let mut next = self.next_id.lock().unwrap();
    *next += 1;
    format!("{}{}", prefix, next)
  }

  /// Server-side modification time: always later than anything seen so far
  fn touch(&self) -> DateTime<Utc> {
    let latest = self
      .links
      .lock()
      .unwrap()
      .iter()
      .map(|l| l.modified)
      .chain(self.lists.lock().unwrap().iter().map(|l| l.modified))
      .max()
      .unwrap_or_else(|| at(0));
    latest + Duration::minutes(1)
  }
}

impl RemoteRecords for FakeRemote {
  async fn fetch_links_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<LinkRecord>> {
    self.enter("links").await?;
    Ok(
      self
        .links
        .lock()
        .unwrap()
        .iter()
        .filter(|l| since.map_or(true, |s| l.modified > s))
        .cloned()
        .collect(),
    )
  }

  async fn fetch_lists_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<ListRecord>> {
    self.enter("lists").await?;
    Ok(
      self
        .lists
        .lock()
        .unwrap()
        .iter()
        .filter(|l| since.map_or(true, |s| l.modified > s))
        .cloned()
        .collect(),
    )
  }

  async fn fetch_all_ids(&self, collection: Collection) -> Result<Vec<String>> {
    match collection {
      Collection::Links => {
        self.enter("link_ids").await?;
        Ok(self.links.lock().unwrap().iter().map(|l| l.id.clone()).collect())
      }
      Collection::Lists => {
        self.enter("list_ids").await?;
        Ok(self.lists.lock().unwrap().iter().map(|l| l.id.clone()).collect())
      }
    }
  }

  async fn fetch_schema(&self) -> Result<Vocabularies> {
    self.enter("schema").await?;
    Ok(self.vocab.lock().unwrap().clone())
  }

  async fn create_links(&self, links: &[NewLink]) -> Result<Vec<LinkRecord>> {
    self.enter("create_links").await?;
    let mut created = Vec::new();
    for new in links {
      let now = self.touch();
      let id = self.assign_id("recLink");
      let record = LinkRecord {
        id: id.clone(),
        title: new.title.clone(),
        note: new.note.clone(),
        url: new.url.clone(),
        category: new.category.clone(),
        tags: new.tags.clone(),
        done: new.done,
        created: now,
        modified: now,
        record_url: format!("https://airtable.com/{}", id),
        list_ids: new.list_ids.clone(),
        list_names: Vec::new(),
      };
      self.links.lock().unwrap().push(record.clone());
      created.push(record);
    }
    Ok(created)
  }

  async fn update_links(&self, links: &[LinkRecord]) -> Result<Vec<LinkRecord>> {
    self.enter("update_links").await?;
    let mut updated = Vec::new();
    for link in links {
      let now = self.touch();
      let mut stored = self.links.lock().unwrap();
      let existing = stored
        .iter_mut()
        .find(|l| l.id == link.id)
        .ok_or_else(|| Error::Status {
          operation: "update records",
          status: 404,
          body: format!("no record {}", link.id),
        })?;
      *existing = LinkRecord {
        created: existing.created,
        modified: now,
        record_url: existing.record_url.clone(),
        list_names: Vec::new(),
        ..link.clone()
      };
      updated.push(existing.clone());
    }
    Ok(updated)
  }

  async fn create_lists(&self, lists: &[NewList]) -> Result<Vec<ListRecord>> {
    self.enter("create_lists").await?;
    let mut created = Vec::new();
    for new in lists {
      let now = self.touch();
      let id = self.assign_id("recList");
      let mut record = list(&id, &new.title);
      record.note = new.note.clone();
      record.created = now;
      record.modified = now;
      self.lists.lock().unwrap().push(record.clone());
      created.push(record);
    }
    Ok(created)
  }

  async fn update_lists(&self, lists: &[ListRecord]) -> Result<Vec<ListRecord>> {
    self.enter("update_lists").await?;
    let mut updated = Vec::new();
    for list in lists {
      let now = self.touch();
      let mut stored = self.lists.lock().unwrap();
      let existing = stored
        .iter_mut()
        .find(|l| l.id == list.id)
        .ok_or_else(|| Error::Status {
          operation: "update records",
          status: 404,
          body: format!("no record {}", list.id),
        })?;
      existing.title = list.title.clone();
      existing.note = list.note.clone();
      existing.modified = now;
      updated.push(existing.clone());
    }
    Ok(updated)
  }

  async fn delete(&self, collection: Collection, ids: &[String]) -> Result<Vec<String>> {
    self.enter("delete").await?;
    let doomed: HashSet<&str> = ids.iter().map(String::as_str).collect();
    let mut deleted = Vec::new();
    match collection {
      Collection::Links => self.links.lock().unwrap().retain(|l| {
        let gone = doomed.contains(l.id.as_str());
        if gone {
          deleted.push(l.id.clone());
        }
        !gone
      }),
      Collection::Lists => self.lists.lock().unwrap().retain(|l| {
        let gone = doomed.contains(l.id.as_str());
        if gone {
          deleted.push(l.id.clone());
        }
        !gone
      }),
    }
    Ok(deleted)
  }
}
