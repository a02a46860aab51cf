use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two mirrored tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
  Links,
  Lists,
}

impl fmt::Display for Collection {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Collection::Links => write!(f, "links"),
      Collection::Lists => write!(f, "lists"),
    }
  }
}

/// A bookmarked URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkRecord {
  pub id: String,
  pub title: String,
  pub note: Option<String>,
  pub url: String,
  pub category: Option<String>,
  pub tags: Vec<String>,
  pub done: bool,
  pub created: DateTime<Utc>,
  pub modified: DateTime<Utc>,
  pub record_url: String,
  /// Identities of the Lists this Link belongs to, in remote order
  pub list_ids: Vec<String>,
  /// Titles of the cached Lists among `list_ids`; never sent to the remote
  #[serde(default)]
  pub list_names: Vec<String>,
}

/// A named collection of Links
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListRecord {
  pub id: String,
  pub title: String,
  pub note: Option<String>,
  pub created: DateTime<Utc>,
  pub modified: DateTime<Utc>,
  pub record_url: String,
  // Derived from the Links that reference this List
  #[serde(default)]
  pub link_ids: Vec<String>,
  #[serde(default)]
  pub link_names: Vec<String>,
  #[serde(default)]
  pub link_count: usize,
  #[serde(default)]
  pub done_count: usize,
  #[serde(default)]
  pub status: ListStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ListStatus {
  #[default]
  ToDo,
  InProgress,
  Done,
}

impl ListStatus {
  /// Status of a List with `done` of its `total` Links completed
  pub fn from_counts(total: usize, done: usize) -> Self {
    if total == 0 || done == 0 {
      ListStatus::ToDo
    } else if done >= total {
      ListStatus::Done
    } else {
      ListStatus::InProgress
    }
  }
}

impl fmt::Display for ListStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ListStatus::ToDo => write!(f, "to-do"),
      ListStatus::InProgress => write!(f, "in-progress"),
      ListStatus::Done => write!(f, "done"),
    }
  }
}

/// Closed value sets of the Links select fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vocabularies {
  pub tags: Vec<String>,
  pub categories: Vec<String>,
}

/// Field values for a Link that does not exist remotely yet
#[derive(Debug, Clone, PartialEq)]
pub struct NewLink {
  pub title: String,
  pub note: Option<String>,
  pub url: String,
  pub category: Option<String>,
  pub tags: Vec<String>,
  pub done: bool,
  pub list_ids: Vec<String>,
}

/// Field values for a List that does not exist remotely yet
#[derive(Debug, Clone, PartialEq)]
pub struct NewList {
  pub title: String,
  pub note: Option<String>,
}
