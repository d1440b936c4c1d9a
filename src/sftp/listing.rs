//! Directory listings and their post-processing.
//!
//! Filtering and sorting are pure functions over a [`DirectoryListing`]; the
//! engine never sorts on the remote side.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    File,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileItem {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub permissions: String,
    pub owner: Option<String>,
    pub group: Option<String>,
}

impl FileItem {
    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }

    pub fn is_hidden(&self) -> bool {
        self.name.starts_with('.')
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryListing {
    pub path: String,
    pub items: Vec<FileItem>,
    pub parent: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    #[default]
    Name,
    Size,
    Modified,
    Type,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListOptions {
    pub include_hidden: bool,
    pub sort_by: SortBy,
    pub sort_order: SortOrder,
    pub max_items: Option<usize>,
}

/// Counts describing a listing before truncation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingMetadata {
    pub total_items: usize,
    pub returned_items: usize,
    pub directories: usize,
    pub files: usize,
    pub hidden_filtered: usize,
    pub truncated: bool,
}

fn primary_key(a: &FileItem, b: &FileItem, sort_by: SortBy) -> Ordering {
    match sort_by {
        SortBy::Name => Ordering::Equal,
        SortBy::Size => a.size.cmp(&b.size),
        SortBy::Modified => a.modified.cmp(&b.modified),
        // directories first
        SortBy::Type => b.is_dir().cmp(&a.is_dir()),
    }
}

/// Total order used for listings. The order flag flips the primary key;
/// ties always fall back to ascending name so output is deterministic.
pub fn compare_items(a: &FileItem, b: &FileItem, sort_by: SortBy, order: SortOrder) -> Ordering {
    let name = a.name.cmp(&b.name);
    let primary = match sort_by {
        SortBy::Name => name,
        other => primary_key(a, b, other),
    };
    let primary = match order {
        SortOrder::Asc => primary,
        SortOrder::Desc => primary.reverse(),
    };
    primary.then(name).then_with(|| a.path.cmp(&b.path))
}

/// Filter, sort and truncate a listing.
pub fn apply_list_options(
    mut listing: DirectoryListing,
    options: &ListOptions,
) -> (DirectoryListing, ListingMetadata) {
    let before = listing.items.len();
    if !options.include_hidden {
        listing.items.retain(|item| !item.is_hidden());
    }
    let hidden_filtered = before - listing.items.len();

    listing
        .items
        .sort_by(|a, b| compare_items(a, b, options.sort_by, options.sort_order));

    let total_items = listing.items.len();
    let directories = listing.items.iter().filter(|i| i.is_dir()).count();

    let truncated = match options.max_items {
        Some(max) if total_items > max => {
            listing.items.truncate(max);
            true
        }
        _ => false,
    };

    let metadata = ListingMetadata {
        total_items,
        returned_items: listing.items.len(),
        directories,
        files: total_items - directories,
        hidden_filtered,
        truncated,
    };
    (listing, metadata)
}
