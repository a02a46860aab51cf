//! Fan-out fetch from the remote base and reconciling write into the cache.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

use crate::airtable::types::{Collection, LinkRecord, ListRecord, Vocabularies};
use crate::airtable::RemoteRecords;
use crate::cache::CacheStore;
use crate::error::{Error, Result};

/// Number of concurrent fetches per sync
const UNITS: usize = 5;

/// Result of one fetch unit
#[derive(Debug)]
enum UnitOutput {
  Links(Vec<LinkRecord>),
  Lists(Vec<ListRecord>),
  LinkIds(Vec<String>),
  ListIds(Vec<String>),
  Vocabularies(Vocabularies),
}

/// Results gathered from the fan-out, complete only when every unit delivered
#[derive(Debug, Default)]
struct Fetched {
  links: Option<Vec<LinkRecord>>,
  lists: Option<Vec<ListRecord>>,
  link_ids: Option<Vec<String>>,
  list_ids: Option<Vec<String>>,
  vocabularies: Option<Vocabularies>,
}

impl Fetched {
  fn accept(&mut self, output: UnitOutput) {
    match output {
      UnitOutput::Links(v) => self.links = Some(v),
      UnitOutput::Lists(v) => self.lists = Some(v),
      UnitOutput::LinkIds(v) => self.link_ids = Some(v),
      UnitOutput::ListIds(v) => self.list_ids = Some(v),
      UnitOutput::Vocabularies(v) => self.vocabularies = Some(v),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
  pub links_saved: usize,
  pub lists_saved: usize,
  pub links_removed: usize,
  pub lists_removed: usize,
  pub watermark: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
  /// The last sync is recent enough
  Skipped { last_synced_at: DateTime<Utc> },
  Synced(SyncReport),
}

pub struct SyncOrchestrator<R> {
  remote: Arc<R>,
  max_staleness: chrono::Duration,
}

impl<R: RemoteRecords> SyncOrchestrator<R> {
  pub fn new(remote: Arc<R>, max_staleness: chrono::Duration) -> Self {
    Self {
      remote,
      max_staleness,
    }
  }

  /// Bring the cache up to date with the remote base.
  ///
  /// Without `force`, nothing happens while the last sync is younger than the
  /// configured staleness. The watermark only advances after every fetch and
  /// every cache write succeeded; an error leaves whatever was already
  /// written in place.
  pub async fn sync(&self, cache: &CacheStore, force: bool) -> Result<SyncOutcome> {
    let started = Utc::now();
    if !force {
      if let Some(last) = fresh_since(cache, self.max_staleness, started)? {
        tracing::info!(%last, "Cache is fresh, skipping sync");
        return Ok(SyncOutcome::Skipped {
          last_synced_at: last,
        });
      }
    }
    let since = cache.last_synced_at()?;

    tracing::info!(since = ?since, force, "Starting sync");
    let fetched = self.fetch(since).await?;
    let report = apply(cache, fetched, started)?;

    tracing::info!(
      links_saved = report.links_saved,
      lists_saved = report.lists_saved,
      links_removed = report.links_removed,
      lists_removed = report.lists_removed,
      watermark = %report.watermark,
      "Sync complete"
    );
    Ok(SyncOutcome::Synced(report))
  }

  /// Run the five fetches concurrently. The first failure cancels the rest
  /// and is returned once every unit has stopped.
  async fn fetch(&self, since: Option<DateTime<Utc>>) -> Result<Fetched> {
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let (results_tx, mut results) = mpsc::channel(UNITS);
    let mut units = JoinSet::new();

    let remote = self.remote.clone();
    spawn_unit(&mut units, "links", &results_tx, &cancel_rx, async move {
      remote.fetch_links_since(since).await.map(UnitOutput::Links)
    });
    let remote = self.remote.clone();
    spawn_unit(&mut units, "lists", &results_tx, &cancel_rx, async move {
      remote.fetch_lists_since(since).await.map(UnitOutput::Lists)
    });
    let remote = self.remote.clone();
    spawn_unit(&mut units, "link ids", &results_tx, &cancel_rx, async move {
      remote
        .fetch_all_ids(Collection::Links)
        .await
        .map(UnitOutput::LinkIds)
    });
    let remote = self.remote.clone();
    spawn_unit(&mut units, "list ids", &results_tx, &cancel_rx, async move {
      remote
        .fetch_all_ids(Collection::Lists)
        .await
        .map(UnitOutput::ListIds)
    });
    let remote = self.remote.clone();
    spawn_unit(&mut units, "schema", &results_tx, &cancel_rx, async move {
      remote.fetch_schema().await.map(UnitOutput::Vocabularies)
    });
    drop(results_tx);

    let mut fetched = Fetched::default();
    let mut failure = None;
    while let Some(outcome) = results.recv().await {
      match outcome {
        Ok(output) => fetched.accept(output),
        Err(e) => {
          tracing::warn!(error = %e, "Fetch failed, cancelling sync");
          let _ = cancel_tx.send(true);
          failure = Some(e);
          break;
        }
      }
    }
    drop(results);

    // Nothing is applied until every unit has delivered or given up
    while let Some(joined) = units.join_next().await {
      if let Err(e) = joined {
        tracing::warn!(error = %e, "Fetch unit panicked");
      }
    }

    if let Some(e) = failure {
      return Err(e);
    }
    Ok(fetched)
  }
}

/// The last sync time, if it is younger than `max_staleness` at `now`
pub fn fresh_since(
  cache: &CacheStore,
  max_staleness: chrono::Duration,
  now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>> {
  Ok(
    cache
      .last_synced_at()?
      .filter(|last| now - *last < max_staleness),
  )
}

/// Best-effort sync ahead of a cache read.
///
/// A fresh cache is served without calling `connect`. Failing to connect or
/// to sync is logged and the cached data is left as it is.
pub async fn sync_before_read<R, F, Fut>(cache: &CacheStore, max_staleness: chrono::Duration, connect: F)
where
  R: RemoteRecords,
  F: FnOnce() -> Fut,
  Fut: Future<Output = Result<Arc<R>>>,
{
  match fresh_since(cache, max_staleness, Utc::now()) {
    Ok(Some(last)) => {
      tracing::debug!(%last, "Cache is fresh, reading without sync");
      return;
    }
    Ok(None) => {}
    Err(e) => {
      tracing::warn!(error = %e, "Could not read sync watermark, serving cached data");
      return;
    }
  }

  let remote = match connect().await {
    Ok(remote) => remote,
    Err(e) => {
      tracing::warn!(error = %e, "Could not connect, serving cached data");
      return;
    }
  };

  if let Err(e) = SyncOrchestrator::new(remote, max_staleness)
    .sync(cache, false)
    .await
  {
    tracing::warn!(error = %e, "Sync failed, serving cached data");
  }
}

/// Spawn one fetch. Its result is dropped if the sync was cancelled first.
fn spawn_unit<F>(
  units: &mut JoinSet<()>,
  name: &'static str,
  results: &mpsc::Sender<Result<UnitOutput>>,
  cancel: &watch::Receiver<bool>,
  fetch: F,
) where
  F: Future<Output = Result<UnitOutput>> + Send + 'static,
{
  let results = results.clone();
  let mut cancel = cancel.clone();

  units.spawn(async move {
    let outcome = tokio::select! {
      outcome = fetch => outcome,
      _ = cancel.changed() => {
        tracing::debug!(unit = name, "Fetch cancelled");
        return;
      }
    };

    let cancelled = *cancel.borrow();
    if cancelled {
      tracing::debug!(unit = name, "Discarding result of cancelled sync");
      return;
    }
    tracing::debug!(unit = name, ok = outcome.is_ok(), "Fetch finished");
    let _ = results.send(outcome).await;
  });
}

/// Write a complete fan-out into the cache in a fixed order, then advance
/// the watermark to the sync start.
fn apply(cache: &CacheStore, fetched: Fetched, started: DateTime<Utc>) -> Result<SyncReport> {
  let (Some(links), Some(lists), Some(link_ids), Some(list_ids), Some(vocabularies)) = (
    fetched.links,
    fetched.lists,
    fetched.link_ids,
    fetched.list_ids,
    fetched.vocabularies,
  ) else {
    return Err(Error::Cancelled);
  };

  let links_removed = cache.clear_deleted_records(Collection::Links, &link_ids)?;
  let lists_removed = cache.clear_deleted_records(Collection::Lists, &list_ids)?;
  cache.save_links(&links)?;
  cache.save_lists(&lists)?;
  cache.save_vocabularies(&vocabularies)?;
  let watermark = cache.advance_watermark(started)?;

  Ok(SyncReport {
    links_saved: links.len(),
    lists_saved: lists.len(),
    links_removed,
    lists_removed,
    watermark,
  })
}
