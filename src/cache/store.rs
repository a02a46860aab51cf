use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::{keys, ListFilter};
use crate::airtable::types::{Collection, LinkRecord, ListRecord, ListStatus, Vocabularies};
use crate::db;
use crate::error::{Error, Result};

const LINK_COLUMNS: &str =
  "id, title, note, url, category, tags, done, created_at, modified_at, record_url";

const LIST_COLUMNS: &str = "id, title, note, created_at, modified_at, record_url";

/// SQLite-backed mirror of Links, Lists and Metadata.
///
/// The connection sits behind a mutex so the store can be shared by reference
/// between tasks; SQLite work never crosses an await point.
pub struct CacheStore {
  conn: Mutex<Connection>,
}

impl CacheStore {
  /// Open or create the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    let conn = db::open(path)?;
    tracing::debug!(path = %path.display(), "Opened cache");
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// A private in-memory cache, mostly for tests.
  pub fn open_in_memory() -> Result<Self> {
    Ok(Self {
      conn: Mutex::new(db::open_in_memory()?),
    })
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| Error::Lock(e.to_string()))
  }

  // ==========================================================================
  // Links
  // ==========================================================================

  /// Links, optionally restricted to one List and/or one identity.
  ///
  /// Each Link carries the titles of the cached Lists it references. Ordered
  /// with completed Links last, then most recently modified first.
  pub fn get_links(&self, filter: Option<&ListFilter>, id: Option<&str>) -> Result<Vec<LinkRecord>> {
    let conn = self.conn()?;

    let mut clauses = Vec::new();
    let mut args: Vec<&str> = Vec::new();
    if let Some(id) = id {
      clauses.push("id = ?");
      args.push(id);
    }
    match filter {
      Some(ListFilter::ById(list_id)) => {
        clauses.push("id IN (SELECT link_id FROM LinkLists WHERE list_id = ?)");
        args.push(list_id);
      }
      Some(ListFilter::ByTitle(title)) => {
        clauses.push(
          "id IN (SELECT ll.link_id FROM LinkLists ll JOIN Lists ON Lists.id = ll.list_id WHERE Lists.title = ?)",
        );
        args.push(title);
      }
      None => {}
    }

    let mut sql = format!("SELECT {} FROM Links", LINK_COLUMNS);
    if !clauses.is_empty() {
      sql.push_str(" WHERE ");
      sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY done ASC, modified_at DESC, id ASC");

    let mut stmt = conn.prepare(&sql)?;
    let mut links = stmt
      .query_map(params_from_iter(args), link_from_row)?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut memberships = link_memberships(&conn)?;
    for link in &mut links {
      if let Some(lists) = memberships.remove(&link.id) {
        for (list_id, list_title) in lists {
          link.list_ids.push(list_id);
          if let Some(title) = list_title {
            link.list_names.push(title);
          }
        }
      }
    }

    Ok(links)
  }

  /// A single Link by identity
  pub fn get_link(&self, id: &str) -> Result<LinkRecord> {
    self
      .get_links(None, Some(id))?
      .into_iter()
      .next()
      .ok_or_else(|| Error::NotFound(format!("link {}", id)))
  }

  /// Insert or fully overwrite Links by identity, replacing their List
  /// memberships.
  pub fn save_links(&self, links: &[LinkRecord]) -> Result<()> {
    if links.is_empty() {
      return Ok(());
    }
    require_ids(links.iter().map(|l| l.id.as_str()))?;

    let mut conn = self.conn()?;
    let tx = conn.transaction()?;
    {
      let mut upsert = tx.prepare(&format!(
        "INSERT INTO Links ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(id) DO UPDATE SET
           title = excluded.title,
           note = excluded.note,
           url = excluded.url,
           category = excluded.category,
           tags = excluded.tags,
           done = excluded.done,
           created_at = excluded.created_at,
           modified_at = excluded.modified_at,
           record_url = excluded.record_url",
        LINK_COLUMNS
      ))?;
      let mut clear_members = tx.prepare("DELETE FROM LinkLists WHERE link_id = ?1")?;
      let mut add_member = tx.prepare(
        "INSERT OR REPLACE INTO LinkLists (link_id, list_id, position) VALUES (?1, ?2, ?3)",
      )?;

      for link in links {
        let tags = serde_json::to_string(&link.tags)?;
        upsert.execute(params![
          link.id,
          link.title,
          link.note,
          link.url,
          link.category,
          tags,
          link.done,
          link.created,
          link.modified,
          link.record_url,
        ])?;

        clear_members.execute(params![link.id])?;
        for (position, list_id) in link.list_ids.iter().enumerate() {
          add_member.execute(params![link.id, list_id, position as i64])?;
        }
      }
    }
    tx.commit()?;

    tracing::debug!(count = links.len(), "Saved links");
    Ok(())
  }

  // ==========================================================================
  // Lists
  // ==========================================================================

  /// Lists with their linked Link counts and derived status, most recently
  /// modified first.
  pub fn get_lists(&self, filter: Option<&ListFilter>) -> Result<Vec<ListRecord>> {
    let conn = self.conn()?;

    let (clause, arg) = match filter {
      Some(ListFilter::ById(id)) => (" WHERE id = ?1", Some(id.as_str())),
      Some(ListFilter::ByTitle(title)) => (" WHERE title = ?1", Some(title.as_str())),
      None => ("", None),
    };
    let sql = format!(
      "SELECT {} FROM Lists{} ORDER BY modified_at DESC, id ASC",
      LIST_COLUMNS, clause
    );

    let mut stmt = conn.prepare(&sql)?;
    let mut lists = stmt
      .query_map(params_from_iter(arg), list_from_row)?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut members = list_members(&conn)?;
    for list in &mut lists {
      let linked = members.remove(&list.id).unwrap_or_default();
      list.link_count = linked.len();
      list.done_count = linked.iter().filter(|m| m.done).count();
      list.status = ListStatus::from_counts(list.link_count, list.done_count);
      for member in linked {
        list.link_ids.push(member.link_id);
        list.link_names.push(member.title);
      }
    }

    Ok(lists)
  }

  /// A single List by identity
  pub fn get_list(&self, id: &str) -> Result<ListRecord> {
    self
      .get_lists(Some(&ListFilter::ById(id.to_string())))?
      .into_iter()
      .next()
      .ok_or_else(|| Error::NotFound(format!("list {}", id)))
  }

  /// Insert or fully overwrite Lists by identity.
  pub fn save_lists(&self, lists: &[ListRecord]) -> Result<()> {
    if lists.is_empty() {
      return Ok(());
    }
    require_ids(lists.iter().map(|l| l.id.as_str()))?;

    let mut conn = self.conn()?;
    let tx = conn.transaction()?;
    {
      let mut upsert = tx.prepare(&format!(
        "INSERT INTO Lists ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
           title = excluded.title,
           note = excluded.note,
           created_at = excluded.created_at,
           modified_at = excluded.modified_at,
           record_url = excluded.record_url",
        LIST_COLUMNS
      ))?;

      for list in lists {
        upsert.execute(params![
          list.id,
          list.title,
          list.note,
          list.created,
          list.modified,
          list.record_url,
        ])?;
      }
    }
    tx.commit()?;

    tracing::debug!(count = lists.len(), "Saved lists");
    Ok(())
  }

  // ==========================================================================
  // Deletion
  // ==========================================================================

  /// Delete every cached record of `collection` whose identity is not in
  /// `live_ids`. An empty `live_ids` means the live set is unknown and
  /// deletes nothing.
  pub fn clear_deleted_records(&self, collection: Collection, live_ids: &[String]) -> Result<usize> {
    if live_ids.is_empty() {
      tracing::debug!(%collection, "No live ids, skipping reconciliation");
      return Ok(0);
    }
    let live: HashSet<&str> = live_ids.iter().map(String::as_str).collect();

    let mut conn = self.conn()?;
    let tx = conn.transaction()?;
    let stale: Vec<String> = {
      let mut stmt = tx.prepare(&format!("SELECT id FROM {}", table_name(collection)))?;
      let ids = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
      ids
        .into_iter()
        .filter(|id| !live.contains(id.as_str()))
        .collect()
    };
    let removed = delete_rows(&tx, collection, &stale)?;
    tx.commit()?;

    tracing::info!(%collection, removed, "Reconciled deleted records");
    Ok(removed)
  }

  /// Remove specific records, e.g. after they were deleted remotely.
  pub fn delete_records(&self, collection: Collection, ids: &[String]) -> Result<usize> {
    let mut conn = self.conn()?;
    let tx = conn.transaction()?;
    let removed = delete_rows(&tx, collection, ids)?;
    tx.commit()?;
    Ok(removed)
  }

  /// Empty the mirror and forget the watermark so the next sync fetches
  /// everything. Credentials and vocabularies are kept.
  pub fn clear(&self) -> Result<()> {
    let conn = self.conn()?;
    conn.execute_batch(&format!(
      "BEGIN;
       DELETE FROM LinkLists;
       DELETE FROM Links;
       DELETE FROM Lists;
       DELETE FROM Metadata WHERE key = '{}';
       COMMIT;",
      keys::LAST_SYNCED_AT
    ))?;
    tracing::info!("Cleared cache");
    Ok(())
  }

  // ==========================================================================
  // Metadata
  // ==========================================================================

  /// Metadata value for `key`; a missing key is `Error::NotFound`.
  pub fn get_data(&self, key: &str) -> Result<String> {
    let conn = self.conn()?;
    conn
      .query_row(
        "SELECT value FROM Metadata WHERE key = ?1",
        params![key],
        |row| row.get(0),
      )
      .optional()?
      .ok_or_else(|| Error::NotFound(format!("metadata key {}", key)))
  }

  pub fn set_data(&self, key: &str, value: &str) -> Result<()> {
    let conn = self.conn()?;
    conn.execute(
      "INSERT INTO Metadata (key, value) VALUES (?1, ?2)
       ON CONFLICT(key) DO UPDATE SET value = excluded.value",
      params![key, value],
    )?;
    Ok(())
  }

  /// Like `get_data`, but a missing key is `None`
  pub fn find_data(&self, key: &str) -> Result<Option<String>> {
    match self.get_data(key) {
      Ok(value) => Ok(Some(value)),
      Err(Error::NotFound(_)) => Ok(None),
      Err(e) => Err(e),
    }
  }

  /// The sync watermark, if a sync ever completed.
  pub fn last_synced_at(&self) -> Result<Option<DateTime<Utc>>> {
    let Some(raw) = self.find_data(keys::LAST_SYNCED_AT)? else {
      return Ok(None);
    };

    match DateTime::parse_from_rfc3339(&raw) {
      Ok(at) => Ok(Some(at.with_timezone(&Utc))),
      Err(e) => {
        tracing::warn!(value = %raw, error = %e, "Ignoring unparseable watermark");
        Ok(None)
      }
    }
  }

  /// Move the watermark to `at` unless it is already later. Returns the
  /// stored value.
  pub fn advance_watermark(&self, at: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let next = match self.last_synced_at()? {
      Some(previous) => previous.max(at),
      None => at,
    };
    self.set_data(
      keys::LAST_SYNCED_AT,
      &next.to_rfc3339_opts(SecondsFormat::AutoSi, true),
    )?;
    Ok(next)
  }

  /// Cached tag and category vocabularies; empty before the first sync.
  pub fn vocabularies(&self) -> Result<Vocabularies> {
    Ok(Vocabularies {
      tags: self.string_list(keys::TAGS)?,
      categories: self.string_list(keys::CATEGORIES)?,
    })
  }

  pub fn save_vocabularies(&self, vocab: &Vocabularies) -> Result<()> {
    self.set_data(keys::TAGS, &serde_json::to_string(&vocab.tags)?)?;
    self.set_data(keys::CATEGORIES, &serde_json::to_string(&vocab.categories)?)?;
    Ok(())
  }

  fn string_list(&self, key: &str) -> Result<Vec<String>> {
    match self.find_data(key)? {
      Some(raw) => Ok(serde_json::from_str(&raw)?),
      None => Ok(Vec::new()),
    }
  }
}

fn table_name(collection: Collection) -> &'static str {
  match collection {
    Collection::Links => "Links",
    Collection::Lists => "Lists",
  }
}

fn require_ids<'a>(mut ids: impl Iterator<Item = &'a str>) -> Result<()> {
  if ids.any(|id| id.trim().is_empty()) {
    return Err(Error::Validation("cannot cache a record without an id".into()));
  }
  Ok(())
}

fn delete_rows(conn: &Connection, collection: Collection, ids: &[String]) -> Result<usize> {
  let mut delete =
    conn.prepare(&format!("DELETE FROM {} WHERE id = ?1", table_name(collection)))?;
  let mut removed = 0;
  for id in ids {
    removed += delete.execute(params![id])?;
    match collection {
      Collection::Links => conn.execute("DELETE FROM LinkLists WHERE link_id = ?1", params![id])?,
      Collection::Lists => conn.execute("DELETE FROM LinkLists WHERE list_id = ?1", params![id])?,
    };
  }
  Ok(removed)
}

fn link_from_row(row: &Row<'_>) -> rusqlite::Result<LinkRecord> {
  let tags: String = row.get(5)?;
  let tags = serde_json::from_str(&tags)
    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;

  Ok(LinkRecord {
    id: row.get(0)?,
    title: row.get(1)?,
    note: row.get(2)?,
    url: row.get(3)?,
    category: row.get(4)?,
    tags,
    done: row.get(6)?,
    created: row.get(7)?,
    modified: row.get(8)?,
    record_url: row.get(9)?,
    list_ids: Vec::new(),
    list_names: Vec::new(),
  })
}

fn list_from_row(row: &Row<'_>) -> rusqlite::Result<ListRecord> {
  Ok(ListRecord {
    id: row.get(0)?,
    title: row.get(1)?,
    note: row.get(2)?,
    created: row.get(3)?,
    modified: row.get(4)?,
    record_url: row.get(5)?,
    link_ids: Vec::new(),
    link_names: Vec::new(),
    link_count: 0,
    done_count: 0,
    status: ListStatus::ToDo,
  })
}

/// link id -> [(list id, list title if cached)] in membership order
fn link_memberships(conn: &Connection) -> Result<HashMap<String, Vec<(String, Option<String>)>>> {
  let mut stmt = conn.prepare(
    "SELECT ll.link_id, ll.list_id, Lists.title
     FROM LinkLists ll
     LEFT JOIN Lists ON Lists.id = ll.list_id
     ORDER BY ll.link_id, ll.position",
  )?;
  let rows = stmt.query_map([], |row| {
    Ok((
      row.get::<_, String>(0)?,
      row.get::<_, String>(1)?,
      row.get::<_, Option<String>>(2)?,
    ))
  })?;

  let mut memberships: HashMap<String, Vec<(String, Option<String>)>> = HashMap::new();
  for row in rows {
    let (link_id, list_id, title) = row?;
    memberships.entry(link_id).or_default().push((list_id, title));
  }
  Ok(memberships)
}

struct ListMember {
  link_id: String,
  title: String,
  done: bool,
}

/// list id -> Links referencing it, in Link display order
fn list_members(conn: &Connection) -> Result<HashMap<String, Vec<ListMember>>> {
  let mut stmt = conn.prepare(
    "SELECT ll.list_id, l.id, l.title, l.done
     FROM LinkLists ll
     JOIN Links l ON l.id = ll.link_id
     ORDER BY l.done ASC, l.modified_at DESC, l.id ASC",
  )?;
  let rows = stmt.query_map([], |row| {
    Ok((
      row.get::<_, String>(0)?,
      ListMember {
        link_id: row.get(1)?,
        title: row.get(2)?,
        done: row.get(3)?,
      },
    ))
  })?;

  let mut members: HashMap<String, Vec<ListMember>> = HashMap::new();
  for row in rows {
    let (list_id, member) = row?;
    members.entry(list_id).or_default().push(member);
  }
  Ok(members)
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::{Duration, TimeZone};

  fn at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes)
  }

  fn link(id: &str, lists: &[&str], done: bool, modified: i64) -> LinkRecord {
    LinkRecord {
      id: id.to_string(),
      title: format!("Link {}", id),
      note: Some("a note".into()),
      url: format!("https://example.com/{}", id),
      category: Some("Article".into()),
      tags: vec!["rust".into(), "async".into()],
      done,
      created: at(0),
      modified: at(modified),
      record_url: format!("https://airtable.com/{}", id),
      list_ids: lists.iter().map(|s| s.to_string()).collect(),
      list_names: Vec::new(),
    }
  }

  fn list(id: &str, title: &str, modified: i64) -> ListRecord {
    ListRecord {
      id: id.to_string(),
      title: title.to_string(),
      note: None,
      created: at(0),
      modified: at(modified),
      record_url: format!("https://airtable.com/{}", id),
      link_ids: Vec::new(),
      link_names: Vec::new(),
      link_count: 0,
      done_count: 0,
      status: ListStatus::ToDo,
    }
  }

  fn ids(links: &[LinkRecord]) -> Vec<&str> {
    links.iter().map(|l| l.id.as_str()).collect()
  }

  fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn test_save_links_is_idempotent() {
    let cache = CacheStore::open_in_memory().unwrap();
    let links = vec![link("A", &["L1"], false, 1), link("B", &[], true, 2)];

    cache.save_links(&links).unwrap();
    let first = cache.get_links(None, None).unwrap();
    cache.save_links(&links).unwrap();
    let second = cache.get_links(None, None).unwrap();

    assert_eq!(first, second);
    assert_eq!(second.len(), 2);
  }

  #[test]
  fn test_round_trip_resolves_cached_list_names() {
    let cache = CacheStore::open_in_memory().unwrap();
    cache.save_lists(&[list("L1", "Reading", 1)]).unwrap();

    // L9 is not cached yet; the reference is kept but has no name
    let saved = link("A", &["L1", "L9"], false, 5);
    cache.save_links(&[saved.clone()]).unwrap();

    let loaded = cache.get_link("A").unwrap();
    assert_eq!(loaded.list_names, vec!["Reading"]);
    assert_eq!(
      LinkRecord {
        list_names: Vec::new(),
        ..loaded
      },
      saved
    );
  }

  #[test]
  fn test_save_overwrites_instead_of_merging() {
    let cache = CacheStore::open_in_memory().unwrap();
    cache.save_links(&[link("A", &["L1", "L2"], false, 1)]).unwrap();

    let mut updated = link("A", &["L2"], true, 2);
    updated.note = None;
    updated.category = None;
    updated.tags = Vec::new();
    cache.save_links(&[updated.clone()]).unwrap();

    let loaded = cache.get_link("A").unwrap();
    assert_eq!(loaded, updated);
    assert_eq!(cache.get_links(None, None).unwrap().len(), 1);
  }

  #[test]
  fn test_save_rejects_missing_identity() {
    let cache = CacheStore::open_in_memory().unwrap();
    let err = cache.save_links(&[link("", &[], false, 1)]).unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
  }

  #[test]
  fn test_links_order_completed_last_then_newest_first() {
    let cache = CacheStore::open_in_memory().unwrap();
    cache
      .save_links(&[
        link("old", &[], false, 1),
        link("done-new", &[], true, 9),
        link("new", &[], false, 5),
        link("done-old", &[], true, 2),
      ])
      .unwrap();

    let links = cache.get_links(None, None).unwrap();
    assert_eq!(ids(&links), vec!["new", "old", "done-new", "done-old"]);
  }

  #[test]
  fn test_links_filtered_by_list_id_and_title() {
    let cache = CacheStore::open_in_memory().unwrap();
    cache
      .save_lists(&[list("L1", "Reading", 1), list("L2", "Watching", 1)])
      .unwrap();
    cache
      .save_links(&[
        link("A", &["L1"], false, 1),
        link("B", &["L2"], false, 2),
        link("C", &["L1", "L2"], false, 3),
      ])
      .unwrap();

    let by_id = cache
      .get_links(Some(&ListFilter::ById("L1".into())), None)
      .unwrap();
    assert_eq!(ids(&by_id), vec!["C", "A"]);

    let by_title = cache
      .get_links(Some(&ListFilter::ByTitle("Watching".into())), None)
      .unwrap();
    assert_eq!(ids(&by_title), vec!["C", "B"]);

    let one = cache
      .get_links(Some(&ListFilter::ById("L2".into())), Some("A"))
      .unwrap();
    assert!(one.is_empty());
  }

  #[test]
  fn test_missing_link_is_not_found() {
    let cache = CacheStore::open_in_memory().unwrap();
    assert!(matches!(cache.get_link("nope"), Err(Error::NotFound(_))));
  }

  #[test]
  fn test_clear_deleted_records_removes_only_absent_ids() {
    let cache = CacheStore::open_in_memory().unwrap();
    cache
      .save_links(&[
        link("A", &[], false, 1),
        link("B", &[], false, 1),
        link("C", &[], false, 1),
      ])
      .unwrap();

    let removed = cache
      .clear_deleted_records(Collection::Links, &strings(&["A", "C"]))
      .unwrap();

    assert_eq!(removed, 1);
    let mut remaining = ids(&cache.get_links(None, None).unwrap())
      .into_iter()
      .map(String::from)
      .collect::<Vec<_>>();
    remaining.sort();
    assert_eq!(remaining, strings(&["A", "C"]));
  }

  #[test]
  fn test_clear_deleted_records_with_empty_live_set_is_noop() {
    let cache = CacheStore::open_in_memory().unwrap();
    cache.save_lists(&[list("L1", "Reading", 1)]).unwrap();

    let removed = cache.clear_deleted_records(Collection::Lists, &[]).unwrap();

    assert_eq!(removed, 0);
    assert_eq!(cache.get_lists(None).unwrap().len(), 1);
  }

  #[test]
  fn test_list_counts_and_status_follow_links() {
    let cache = CacheStore::open_in_memory().unwrap();
    cache.save_lists(&[list("L1", "Reading", 1)]).unwrap();

    let l1 = cache.get_list("L1").unwrap();
    assert_eq!(l1.link_count, 0);
    assert_eq!(l1.status, ListStatus::ToDo);

    let mut a = link("A", &["L1"], false, 1);
    let b = link("B", &["L1"], false, 2);
    cache.save_links(&[a.clone(), b]).unwrap();

    let l1 = cache.get_list("L1").unwrap();
    assert_eq!(l1.link_count, 2);
    assert_eq!(l1.done_count, 0);
    assert_eq!(l1.status, ListStatus::ToDo);
    assert_eq!(l1.link_ids, strings(&["B", "A"]));
    assert_eq!(l1.link_names, strings(&["Link B", "Link A"]));

    a.done = true;
    a.modified = at(3);
    cache.save_links(&[a]).unwrap();

    let l1 = cache.get_list("L1").unwrap();
    assert_eq!(l1.done_count, 1);
    assert_eq!(l1.status, ListStatus::InProgress);
  }

  #[test]
  fn test_deleted_link_no_longer_counts_toward_list() {
    let cache = CacheStore::open_in_memory().unwrap();
    cache.save_lists(&[list("L1", "Reading", 1)]).unwrap();
    cache
      .save_links(&[link("A", &["L1"], true, 1), link("B", &["L1"], false, 1)])
      .unwrap();

    cache
      .clear_deleted_records(Collection::Links, &strings(&["A"]))
      .unwrap();

    let l1 = cache.get_list("L1").unwrap();
    assert_eq!(l1.link_count, 1);
    assert_eq!(l1.status, ListStatus::Done);
  }

  #[test]
  fn test_lists_ordered_newest_first_and_filtered_by_title() {
    let cache = CacheStore::open_in_memory().unwrap();
    cache
      .save_lists(&[list("L1", "Old", 1), list("L2", "New", 5)])
      .unwrap();

    let lists = cache.get_lists(None).unwrap();
    let order: Vec<_> = lists.iter().map(|l| l.id.as_str()).collect();
    assert_eq!(order, vec!["L2", "L1"]);

    let old = cache
      .get_lists(Some(&ListFilter::ByTitle("Old".into())))
      .unwrap();
    assert_eq!(old.len(), 1);
    assert_eq!(old[0].id, "L1");
  }

  #[test]
  fn test_get_data_missing_key_is_not_found() {
    let cache = CacheStore::open_in_memory().unwrap();

    assert!(matches!(cache.get_data("nope"), Err(Error::NotFound(_))));
    assert_eq!(cache.find_data("nope").unwrap(), None);

    cache.set_data("k", "v1").unwrap();
    cache.set_data("k", "v2").unwrap();
    assert_eq!(cache.get_data("k").unwrap(), "v2");
  }

  #[test]
  fn test_watermark_never_moves_backwards() {
    let cache = CacheStore::open_in_memory().unwrap();
    assert_eq!(cache.last_synced_at().unwrap(), None);

    cache.advance_watermark(at(10)).unwrap();
    let stored = cache.advance_watermark(at(5)).unwrap();

    assert_eq!(stored, at(10));
    assert_eq!(cache.last_synced_at().unwrap(), Some(at(10)));
  }

  #[test]
  fn test_vocabularies_default_empty_and_round_trip() {
    let cache = CacheStore::open_in_memory().unwrap();
    assert_eq!(cache.vocabularies().unwrap(), Vocabularies::default());

    let vocab = Vocabularies {
      tags: strings(&["rust", "go"]),
      categories: strings(&["Article"]),
    };
    cache.save_vocabularies(&vocab).unwrap();
    assert_eq!(cache.vocabularies().unwrap(), vocab);
  }

  #[test]
  fn test_clear_keeps_credentials_and_vocabularies() {
    let cache = CacheStore::open_in_memory().unwrap();
    cache.save_lists(&[list("L1", "Reading", 1)]).unwrap();
    cache.save_links(&[link("A", &["L1"], false, 1)]).unwrap();
    cache.advance_watermark(at(1)).unwrap();
    cache.set_data(keys::ACCESS_TOKEN, "token").unwrap();
    cache
      .save_vocabularies(&Vocabularies {
        tags: strings(&["rust"]),
        categories: Vec::new(),
      })
      .unwrap();

    cache.clear().unwrap();

    assert!(cache.get_links(None, None).unwrap().is_empty());
    assert!(cache.get_lists(None).unwrap().is_empty());
    assert_eq!(cache.last_synced_at().unwrap(), None);
    assert_eq!(cache.get_data(keys::ACCESS_TOKEN).unwrap(), "token");
    assert_eq!(cache.vocabularies().unwrap().tags, strings(&["rust"]));
  }

  #[test]
  fn test_file_backed_cache_persists_between_opens() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");

    {
      let cache = CacheStore::open(&path).unwrap();
      cache.save_links(&[link("A", &[], false, 1)]).unwrap();
      cache.advance_watermark(at(7)).unwrap();
    }

    let cache = CacheStore::open(&path).unwrap();
    assert_eq!(cache.get_link("A").unwrap().title, "Link A");
    assert_eq!(cache.last_synced_at().unwrap(), Some(at(7)));
  }
}
