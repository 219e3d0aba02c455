//! The episode manifest and its builder.
//!
//! A [`Manifest`] is the JSON document a reader needs to play an episode:
//!
//! ```json
//! {
//!   "episode_id": "ep-1718000000000",
//!   "title": "Chapter 1",
//!   "cover": "https://cdn.example/ep-…-page-1.jpg",
//!   "pages": ["https://cdn.example/ep-…-page-1.jpg", "…"],
//!   "total_pages": 12,
//!   "published": true,
//!   "created_at": "2026-10-16T09:30:00Z"
//! }
//! ```
//!
//! Manifests are only created by [`ManifestBuilder::build`], which checks the
//! ordering invariants, and expose no mutators afterwards. Republishing an
//! episode produces a new manifest.

use crate::error::IngestError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ordered description of an episode's playable page assets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    episode_id: String,
    title: String,
    cover: String,
    pages: Vec<String>,
    total_pages: usize,
    published: bool,
    created_at: DateTime<Utc>,
}

impl Manifest {
    pub fn episode_id(&self) -> &str {
        &self.episode_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// URL of the first page, or `""` for an empty manifest.
    pub fn cover(&self) -> &str {
        &self.cover
    }

    /// Page URLs in reading order.
    pub fn pages(&self) -> &[String] {
        &self.pages
    }

    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    pub fn is_published(&self) -> bool {
        self.published
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// URL of the page at 0-based `index`.
    pub fn page_url(&self, index: usize) -> Option<&str> {
        self.pages.get(index).map(String::as_str)
    }

    /// Decode a manifest fetched from storage.
    ///
    /// Only the JSON shape is checked here; playability is decided by
    /// [`crate::reader::resolve`].
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn to_json_pretty(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }
}

/// Collects `(page_num, url)` pairs from the upload stage and assembles the
/// manifest in page order.
#[derive(Debug)]
pub struct ManifestBuilder {
    episode_id: String,
    title: String,
    expected_pages: usize,
    entries: Vec<(usize, String)>,
    created_at: Option<DateTime<Utc>>,
}

impl ManifestBuilder {
    /// `expected_pages` is the page count the rasterizer reported for this run.
    pub fn new(episode_id: impl Into<String>, title: impl Into<String>, expected_pages: usize) -> Self {
        Self {
            episode_id: episode_id.into(),
            title: title.into(),
            expected_pages,
            entries: Vec::with_capacity(expected_pages),
            created_at: None,
        }
    }

    /// Add the URL of 1-based page `page_num`. Order of calls is irrelevant.
    pub fn page(mut self, page_num: usize, url: impl Into<String>) -> Self {
        self.entries.push((page_num, url.into()));
        self
    }

    pub fn pages(mut self, entries: impl IntoIterator<Item = (usize, String)>) -> Self {
        self.entries.extend(entries);
        self
    }

    /// Override the timestamp (defaults to now).
    pub fn created_at(mut self, ts: DateTime<Utc>) -> Self {
        self.created_at = Some(ts);
        self
    }

    /// Sort, verify and freeze.
    ///
    /// Any mismatch is a [`IngestError::BuildInconsistency`]: the pipeline
    /// handed over something other than exactly one URL per page `1..=N`.
    pub fn build(mut self) -> Result<Manifest, IngestError> {
        let expected = self.expected_pages;
        let actual = self.entries.len();
        let inconsistency = |detail: String| IngestError::BuildInconsistency {
            expected,
            actual,
            detail,
        };

        if actual != expected {
            return Err(inconsistency("page count mismatch".into()));
        }

        self.entries.sort_by_key(|(page_num, _)| *page_num);

        for (position, (page_num, url)) in self.entries.iter().enumerate() {
            let want = position + 1;
            if *page_num != want {
                let detail = if *page_num < want {
                    format!("page {page_num} appears more than once")
                } else {
                    format!("page {want} is missing")
                };
                return Err(inconsistency(detail));
            }
            if url.trim().is_empty() {
                return Err(inconsistency(format!("page {page_num} has an empty URL")));
            }
        }

        let pages: Vec<String> = self.entries.into_iter().map(|(_, url)| url).collect();
        let cover = pages.first().cloned().unwrap_or_default();

        Ok(Manifest {
            episode_id: self.episode_id,
            title: self.title,
            cover,
            total_pages: pages.len(),
            pages,
            published: true,
            created_at: self.created_at.unwrap_or_else(Utc::now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_are_sorted_and_cover_is_first_page() {
        let manifest = ManifestBuilder::new("ep-1", "Pilot", 3)
            .page(3, "u3")
            .page(1, "u1")
            .page(2, "u2")
            .build()
            .expect("consistent");
        assert_eq!(manifest.pages(), ["u1", "u2", "u3"]);
        assert_eq!(manifest.cover(), "u1");
        assert_eq!(manifest.total_pages(), 3);
        assert!(manifest.is_published());
        assert_eq!(manifest.page_url(1), Some("u2"));
        assert_eq!(manifest.page_url(3), None);
    }

    #[test]
    fn count_mismatch_is_inconsistent() {
        let err = ManifestBuilder::new("ep-1", "t", 3)
            .page(1, "u1")
            .page(2, "u2")
            .build()
            .unwrap_err();
        match err {
            IngestError::BuildInconsistency { expected, actual, .. } => {
                assert_eq!((expected, actual), (3, 2));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn gap_is_inconsistent() {
        let err = ManifestBuilder::new("ep-1", "t", 3)
            .pages(vec![(1, "a".into()), (2, "b".into()), (4, "d".into())])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("page 3 is missing"), "{err}");
    }

    #[test]
    fn duplicate_is_inconsistent() {
        let err = ManifestBuilder::new("ep-1", "t", 3)
            .pages(vec![(1, "a".into()), (2, "b".into()), (2, "b2".into())])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("more than once"), "{err}");
    }

    #[test]
    fn json_field_names_match_wire_format() {
        let ts = DateTime::parse_from_rfc3339("2026-10-16T09:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let manifest = ManifestBuilder::new("ep-9", "Finale", 1)
            .page(1, "https://cdn/ep-9-page-1.jpg")
            .created_at(ts)
            .build()
            .unwrap();
        let value: serde_json::Value =
            serde_json::from_slice(&manifest.to_json_pretty().unwrap()).unwrap();
        assert_eq!(value["episode_id"], "ep-9");
        assert_eq!(value["cover"], "https://cdn/ep-9-page-1.jpg");
        assert_eq!(value["total_pages"], 1);
        assert_eq!(value["published"], true);
        assert_eq!(value["created_at"], "2026-10-16T09:30:00Z");
        assert_eq!(value["pages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn decodes_manifest_written_elsewhere() {
        let json = br#"{
            "episode_id": "ep-1700000000000",
            "title": "Old",
            "cover": "https://s/1",
            "pages": ["https://s/1", "https://s/2"],
            "total_pages": 2,
            "published": true,
            "created_at": "2023-11-14T22:13:20.000Z"
        }"#;
        let manifest = Manifest::from_json(json).expect("decode");
        assert_eq!(manifest.total_pages(), 2);
        assert_eq!(manifest.title(), "Old");
    }
}
