use chrono::{DateTime, SecondsFormat, Utc};
use futures::{stream, TryStreamExt};
use reqwest::{Method, RequestBuilder, Response};
use serde::{de::DeserializeOwned, de::IgnoredAny, Serialize};
use std::future::Future;
use std::sync::Arc;
use url::Url;

use crate::airtable::api_types::{
  ApiDeleteResponse, ApiLinkFields, ApiListFields, ApiRecord, ApiRecordPage, ApiSchemaResponse,
  ApiWriteRecord, ApiWriteRequest, ApiWriteResponse,
};
use crate::airtable::rate_limit::RateLimiter;
use crate::airtable::types::{Collection, LinkRecord, ListRecord, NewLink, NewList, Vocabularies};
use crate::config::AirtableConfig;
use crate::error::{Error, Result};

/// Largest number of records the service accepts in one write or delete
const BATCH_SIZE: usize = 10;

const LINK_FIELDS: &[&str] = &[
  "Name",
  "Note",
  "URL",
  "Category",
  "Tags",
  "Done",
  "Lists",
  "Last Modified",
  "Record URL",
];

const LIST_FIELDS: &[&str] = &["Name", "Note", "Last Modified", "Record URL"];

/// Record operations the sync engine and the actions need from the remote base.
///
/// `AirtableClient` is the real implementation; tests substitute an in-memory
/// one.
pub trait RemoteRecords: Send + Sync + 'static {
  /// Links modified after `since`, or every Link when `since` is `None`
  fn fetch_links_since(
    &self,
    since: Option<DateTime<Utc>>,
  ) -> impl Future<Output = Result<Vec<LinkRecord>>> + Send;

  /// Lists modified after `since`, or every List when `since` is `None`
  fn fetch_lists_since(
    &self,
    since: Option<DateTime<Utc>>,
  ) -> impl Future<Output = Result<Vec<ListRecord>>> + Send;

  /// Every identity currently present in `collection`
  fn fetch_all_ids(&self, collection: Collection)
    -> impl Future<Output = Result<Vec<String>>> + Send;

  fn fetch_schema(&self) -> impl Future<Output = Result<Vocabularies>> + Send;

  fn create_links(&self, links: &[NewLink]) -> impl Future<Output = Result<Vec<LinkRecord>>> + Send;

  fn update_links(
    &self,
    links: &[LinkRecord],
  ) -> impl Future<Output = Result<Vec<LinkRecord>>> + Send;

  fn create_lists(&self, lists: &[NewList]) -> impl Future<Output = Result<Vec<ListRecord>>> + Send;

  fn update_lists(
    &self,
    lists: &[ListRecord],
  ) -> impl Future<Output = Result<Vec<ListRecord>>> + Send;

  /// Delete records by identity, returning the identities the service confirmed
  fn delete(
    &self,
    collection: Collection,
    ids: &[String],
  ) -> impl Future<Output = Result<Vec<String>>> + Send;
}

/// Airtable REST API client
#[derive(Clone)]
pub struct AirtableClient {
  http: reqwest::Client,
  token: String,
  links_url: Url,
  lists_url: Url,
  schema_url: Url,
  links_table: String,
  limiter: Arc<RateLimiter>,
}

impl AirtableClient {
  pub fn new(
    config: &AirtableConfig,
    token: impl Into<String>,
    limiter: Arc<RateLimiter>,
  ) -> Result<Self> {
    let http = reqwest::Client::builder()
      .user_agent(concat!("linkmirror/", env!("CARGO_PKG_VERSION")))
      .build()?;

    Ok(Self {
      http,
      token: token.into(),
      links_url: endpoint(&config.api_url, &[&config.base_id, &config.links_table])?,
      lists_url: endpoint(&config.api_url, &[&config.base_id, &config.lists_table])?,
      schema_url: endpoint(&config.meta_url, &["bases", &config.base_id, "tables"])?,
      links_table: config.links_table.clone(),
      limiter,
    })
  }

  fn table_url(&self, collection: Collection) -> &Url {
    match collection {
      Collection::Links => &self.links_url,
      Collection::Lists => &self.lists_url,
    }
  }

  /// Claim a rate-limiter slot, send the request and reject non-2xx responses
  async fn send(&self, operation: &'static str, request: RequestBuilder) -> Result<Response> {
    self.limiter.acquire().await;

    let response = request.bearer_auth(&self.token).send().await?;
    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      tracing::warn!(operation, status = status.as_u16(), "Airtable request failed");
      return Err(Error::Status {
        operation,
        status: status.as_u16(),
        body,
      });
    }

    Ok(response)
  }

  /// Fetch every record of `collection` modified after `since`, following the
  /// `offset` continuation token until the service stops returning one.
  pub async fn list_changed<F: DeserializeOwned>(
    &self,
    collection: Collection,
    since: Option<DateTime<Utc>>,
    fields: &[&str],
  ) -> Result<Vec<ApiRecord<F>>> {
    let mut base_query: Vec<(&str, String)> = fields.iter().map(|f| ("fields[]", f.to_string())).collect();
    if let Some(since) = since {
      base_query.push(("filterByFormula", changed_since_formula(since)));
    }

    let client = self;
    let base_query = &base_query;

    // State is the offset of the next page to fetch; `None` once the last
    // page has been seen.
    let pages = stream::try_unfold(Some(None::<String>), move |next| async move {
      let Some(offset) = next else {
        return Ok::<_, Error>(None);
      };

      let mut query = base_query.clone();
      if let Some(token) = offset {
        query.push(("offset", token));
      }
      let request = client
        .http
        .get(client.table_url(collection).clone())
        .query(&query);
      let page: ApiRecordPage<F> = client.send("list records", request).await?.json().await?;

      let following = page.offset.filter(|o| !o.is_empty()).map(Some);
      Ok(Some((page.records, following)))
    });

    let (records, pages) = pages
      .try_fold((Vec::new(), 0usize), |(mut records, pages), page| async move {
        tracing::debug!(%collection, page = pages + 1, records = page.len(), "Fetched page");
        records.extend(page);
        Ok::<_, Error>((records, pages + 1))
      })
      .await?;

    tracing::info!(%collection, pages, records = records.len(), since = ?since, "Listed records");
    Ok(records)
  }

  /// Identities of every record in `collection`. Only the primary field is
  /// requested since the payload is discarded.
  pub async fn list_all_ids(&self, collection: Collection) -> Result<Vec<String>> {
    let records: Vec<ApiRecord<IgnoredAny>> = self.list_changed(collection, None, &["Name"]).await?;
    Ok(records.into_iter().map(|r| r.id).collect())
  }

  /// Tag and category vocabularies of the links table
  pub async fn get_schema(&self) -> Result<Vocabularies> {
    let request = self.http.get(self.schema_url.clone());
    let schema: ApiSchemaResponse = self.send("fetch schema", request).await?.json().await?;
    let vocab = schema.into_vocabularies(&self.links_table);

    tracing::info!(
      tags = vocab.tags.len(),
      categories = vocab.categories.len(),
      "Fetched schema"
    );
    Ok(vocab)
  }

  pub async fn create_records<F>(&self, collection: Collection, fields: Vec<F>) -> Result<Vec<ApiRecord<F>>>
  where
    F: Serialize + DeserializeOwned,
  {
    let records = fields
      .into_iter()
      .map(|fields| ApiWriteRecord { id: None, fields })
      .collect();
    self.write(Method::POST, "create records", collection, records).await
  }

  /// Update records in place. Every record must carry an identity; nothing is
  /// sent otherwise.
  pub async fn update_records<F>(
    &self,
    collection: Collection,
    records: Vec<(String, F)>,
  ) -> Result<Vec<ApiRecord<F>>>
  where
    F: Serialize + DeserializeOwned,
  {
    require_ids(records.iter().map(|(id, _)| id.as_str()), "update")?;

    let records = records
      .into_iter()
      .map(|(id, fields)| ApiWriteRecord { id: Some(id), fields })
      .collect();
    self.write(Method::PATCH, "update records", collection, records).await
  }

  async fn write<F>(
    &self,
    method: Method,
    operation: &'static str,
    collection: Collection,
    mut records: Vec<ApiWriteRecord<F>>,
  ) -> Result<Vec<ApiRecord<F>>>
  where
    F: Serialize + DeserializeOwned,
  {
    let mut written = Vec::with_capacity(records.len());

    while !records.is_empty() {
      let rest = records.split_off(records.len().min(BATCH_SIZE));
      let body = ApiWriteRequest {
        records: std::mem::replace(&mut records, rest),
        typecast: true,
      };

      let request = self
        .http
        .request(method.clone(), self.table_url(collection).clone())
        .json(&body);
      let response: ApiWriteResponse<F> = self.send(operation, request).await?.json().await?;
      written.extend(response.records);
    }

    tracing::info!(%collection, operation, records = written.len(), "Wrote records");
    Ok(written)
  }

  /// Delete records by identity. Every identity must be non-empty; nothing is
  /// sent otherwise.
  pub async fn delete_records(&self, collection: Collection, ids: &[String]) -> Result<Vec<String>> {
    require_ids(ids.iter().map(String::as_str), "delete")?;

    let mut deleted = Vec::with_capacity(ids.len());
    for batch in ids.chunks(BATCH_SIZE) {
      let query: Vec<(&str, &str)> = batch.iter().map(|id| ("records[]", id.as_str())).collect();
      let request = self
        .http
        .delete(self.table_url(collection).clone())
        .query(&query);
      let response: ApiDeleteResponse = self.send("delete records", request).await?.json().await?;
      deleted.extend(response.records.into_iter().filter(|r| r.deleted).map(|r| r.id));
    }

    tracing::info!(%collection, records = deleted.len(), "Deleted records");
    Ok(deleted)
  }
}

impl RemoteRecords for AirtableClient {
  async fn fetch_links_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<LinkRecord>> {
    let records: Vec<ApiRecord<ApiLinkFields>> =
      self.list_changed(Collection::Links, since, LINK_FIELDS).await?;
    Ok(records.into_iter().map(LinkRecord::from).collect())
  }

  async fn fetch_lists_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<ListRecord>> {
    let records: Vec<ApiRecord<ApiListFields>> =
      self.list_changed(Collection::Lists, since, LIST_FIELDS).await?;
    Ok(records.into_iter().map(ListRecord::from).collect())
  }

  async fn fetch_all_ids(&self, collection: Collection) -> Result<Vec<String>> {
    self.list_all_ids(collection).await
  }

  async fn fetch_schema(&self) -> Result<Vocabularies> {
    self.get_schema().await
  }

  async fn create_links(&self, links: &[NewLink]) -> Result<Vec<LinkRecord>> {
    let fields = links.iter().map(ApiLinkFields::from).collect();
    let records = self.create_records(Collection::Links, fields).await?;
    Ok(records.into_iter().map(LinkRecord::from).collect())
  }

  async fn update_links(&self, links: &[LinkRecord]) -> Result<Vec<LinkRecord>> {
    let records = links
      .iter()
      .map(|l| (l.id.clone(), ApiLinkFields::from(l)))
      .collect();
    let records = self.update_records(Collection::Links, records).await?;
    Ok(records.into_iter().map(LinkRecord::from).collect())
  }

  async fn create_lists(&self, lists: &[NewList]) -> Result<Vec<ListRecord>> {
    let fields = lists.iter().map(ApiListFields::from).collect();
    let records = self.create_records(Collection::Lists, fields).await?;
    Ok(records.into_iter().map(ListRecord::from).collect())
  }

  async fn update_lists(&self, lists: &[ListRecord]) -> Result<Vec<ListRecord>> {
    let records = lists
      .iter()
      .map(|l| (l.id.clone(), ApiListFields::from(l)))
      .collect();
    let records = self.update_records(Collection::Lists, records).await?;
    Ok(records.into_iter().map(ListRecord::from).collect())
  }

  async fn delete(&self, collection: Collection, ids: &[String]) -> Result<Vec<String>> {
    self.delete_records(collection, ids).await
  }
}

fn endpoint(base: &str, segments: &[&str]) -> Result<Url> {
  let mut url =
    Url::parse(base).map_err(|e| Error::Config(format!("Invalid API URL {}: {}", base, e)))?;
  url
    .path_segments_mut()
    .map_err(|_| Error::Config(format!("API URL cannot be a base: {}", base)))?
    .pop_if_empty()
    .extend(segments);
  Ok(url)
}

fn changed_since_formula(since: DateTime<Utc>) -> String {
  format!(
    "IS_AFTER(LAST_MODIFIED_TIME(),'{}')",
    since.to_rfc3339_opts(SecondsFormat::Secs, true)
  )
}

fn require_ids<'a>(mut ids: impl Iterator<Item = &'a str>, operation: &str) -> Result<()> {
  if ids.any(|id| id.trim().is_empty()) {
    return Err(Error::Validation(format!(
      "every record passed to {} must have an id",
      operation
    )));
  }
  Ok(())
}
