//! In-memory view merging the durable index with a live scan of the
//! container, plus substring search over extracted text and summaries.

use crate::container::EntryInfo;
use crate::media::{is_media_name, parse_media_name};
use crate::types::{truncate_to_millis, EnrichmentState, Index, Sample, Summary};
use crate::writer::is_snapshot_name;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};

/// A search hit: either a sample or a summary, ordered newest first.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SearchHit {
    Sample(Sample),
    Summary(Summary),
}

impl SearchHit {
    fn sort_time(&self) -> DateTime<Utc> {
        match self {
            SearchHit::Sample(s) => s.timestamp,
            SearchHit::Summary(s) => s.end_time,
        }
    }
}

pub struct ReconcilingIndex {
    inner: RwLock<Index>,
}

impl ReconcilingIndex {
    pub fn new(index: Index) -> Self {
        Self {
            inner: RwLock::new(index),
        }
    }

    pub fn snapshot(&self) -> Index {
        self.inner.read().clone()
    }

    pub fn sample_count(&self) -> usize {
        self.inner.read().samples.len()
    }

    /// Merge the container's on-disk reality into the index. Media files
    /// with a canonical name get their timestamp from it; others fall back
    /// to file modification time and are flagged reconstructed; entries with
    /// neither are skipped entirely (excluded rather than sorted
    /// arbitrarily). Known records keep their extracted text; unknown files
    /// enter as pending.
    pub fn reconcile(&self, entries: &[EntryInfo]) -> usize {
        let mut index = self.inner.write();
        let mut discovered = 0;

        for entry in entries {
            if is_snapshot_name(&entry.name) || !is_media_name(&entry.name) {
                continue;
            }
            let (timestamp, reconstructed) = match parse_media_name(&entry.name) {
                Some((ts, _)) => (ts, false),
                None => match entry.modified {
                    Some(mtime) => (truncate_to_millis(mtime), true),
                    None => {
                        warn!(name = %entry.name, "unparseable media file without mtime, skipping");
                        continue;
                    }
                },
            };

            let sample = index.samples.entry(timestamp).or_insert_with(|| {
                discovered += 1;
                Sample {
                    timestamp,
                    media_ref: entry.name.clone(),
                    extracted_text: String::new(),
                    enrichment: EnrichmentState::Pending,
                    reconstructed,
                }
            });
            if sample.media_ref.is_empty() {
                sample.media_ref = entry.name.clone();
            }
        }

        if discovered > 0 {
            debug!(discovered, "reconciled container scan into index");
        }
        discovered
    }

    pub fn add_sample(&self, sample: Sample) {
        self.inner.write().samples.insert(sample.timestamp, sample);
    }

    pub fn enrichment_state(&self, timestamp: DateTime<Utc>) -> Option<EnrichmentState> {
        self.inner
            .read()
            .samples
            .get(&timestamp)
            .map(|s| s.enrichment)
    }

    /// Record extraction output. Idempotent: a sample already `Done` is left
    /// untouched, so re-enrichment never rewrites text.
    pub fn attach_text(&self, timestamp: DateTime<Utc>, text: String) -> bool {
        let mut index = self.inner.write();
        match index.samples.get_mut(&timestamp) {
            Some(sample) if sample.enrichment != EnrichmentState::Done => {
                sample.extracted_text = text;
                sample.enrichment = EnrichmentState::Done;
                true
            }
            _ => false,
        }
    }

    /// Insert or overwrite the summary for a span; the deterministic id
    /// makes the write idempotent.
    pub fn add_summary(
        &self,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        text: String,
    ) -> String {
        let summary = Summary::new(start_time, end_time, text);
        let id = summary.id.clone();
        self.inner.write().summaries.insert(id.clone(), summary);
        id
    }

    /// Samples still awaiting enrichment, oldest first.
    pub fn pending_samples(&self) -> Vec<Sample> {
        self.inner
            .read()
            .samples
            .values()
            .filter(|s| s.enrichment == EnrichmentState::Pending)
            .cloned()
            .collect()
    }

    /// Concatenated extracted text of samples at or after `cutoff`, in
    /// chronological order. Feeds the summarization window.
    pub fn recent_text_since(&self, cutoff: DateTime<Utc>) -> String {
        let index = self.inner.read();
        let mut text = String::new();
        for sample in index.samples.range(cutoff..).map(|(_, s)| s) {
            if !sample.extracted_text.is_empty() {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(&sample.extracted_text);
            }
        }
        text
    }

    /// Empty term: everything, newest first. Otherwise case-insensitive
    /// substring match over sample text and summary text.
    pub fn search(&self, term: &str) -> Vec<SearchHit> {
        let index = self.inner.read();
        let needle = term.trim().to_lowercase();

        let mut hits: Vec<SearchHit> = index
            .samples
            .values()
            .filter(|s| {
                needle.is_empty() || s.extracted_text.to_lowercase().contains(&needle)
            })
            .cloned()
            .map(SearchHit::Sample)
            .chain(
                index
                    .summaries
                    .values()
                    .filter(|s| needle.is_empty() || s.text.to_lowercase().contains(&needle))
                    .cloned()
                    .map(SearchHit::Summary),
            )
            .collect();

        hits.sort_by(|a, b| b.sort_time().cmp(&a.sort_time()));
        hits
    }
}

impl Default for ReconcilingIndex {
    fn default() -> Self {
        Self::new(Index::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{format_media_name, MediaKind};

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn indexed_sample(time: &str, text: &str) -> Sample {
        let mut sample = Sample::new(ts(time));
        sample.media_ref = format_media_name(sample.timestamp, MediaKind::Jpeg);
        sample.extracted_text = text.to_string();
        sample.enrichment = EnrichmentState::Done;
        sample
    }

    #[test]
    fn search_matches_substring_case_insensitively() {
        let index = ReconcilingIndex::default();
        index.add_sample(indexed_sample("2025-01-01T00:00:00Z", "invoice"));

        let hits = index.search("INVOICE");
        assert_eq!(hits.len(), 1);
        assert!(index.search("xyz").is_empty());
    }

    #[test]
    fn empty_search_returns_everything_newest_first() {
        let index = ReconcilingIndex::default();
        index.add_sample(indexed_sample("2025-01-01T00:00:00Z", "older"));
        index.add_sample(indexed_sample("2025-01-02T00:00:00Z", "newer"));
        index.add_summary(
            ts("2025-01-03T00:00:00Z"),
            ts("2025-01-03T00:40:00Z"),
            "latest summary".into(),
        );

        let hits = index.search("");
        assert_eq!(hits.len(), 3);
        assert!(matches!(&hits[0], SearchHit::Summary(_)));
        let times: Vec<_> = hits.iter().map(|h| h.sort_time()).collect();
        assert!(times.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn add_summary_overwrites_same_span() {
        let index = ReconcilingIndex::default();
        let start = ts("2025-01-01T00:00:00Z");
        let end = ts("2025-01-01T00:40:00Z");

        let id1 = index.add_summary(start, end, "first".into());
        let id2 = index.add_summary(start, end, "second".into());
        assert_eq!(id1, id2);

        let snapshot = index.snapshot();
        assert_eq!(snapshot.summaries.len(), 1);
        assert_eq!(snapshot.summaries[&id1].text, "second");
    }

    #[test]
    fn attach_text_is_write_once() {
        let index = ReconcilingIndex::default();
        let sample = Sample::new(ts("2025-01-01T00:00:00Z"));
        let when = sample.timestamp;
        index.add_sample(sample);

        assert!(index.attach_text(when, "first pass".into()));
        assert!(!index.attach_text(when, "second pass".into()));
        let snapshot = index.snapshot();
        assert_eq!(snapshot.samples[&when].extracted_text, "first pass");
        assert_eq!(snapshot.samples[&when].enrichment, EnrichmentState::Done);
    }

    #[test]
    fn reconcile_parses_canonical_names_and_flags_fallbacks() {
        let index = ReconcilingIndex::default();
        let canonical_ts = ts("2025-01-01T12:30:45Z");
        let entries = vec![
            EntryInfo {
                name: format_media_name(canonical_ts, MediaKind::Png),
                modified: None,
            },
            EntryInfo {
                name: "randomname.jpg".into(),
                modified: Some(ts("2025-02-01T00:00:00Z")),
            },
            EntryInfo {
                name: "hopeless.png".into(),
                modified: None,
            },
            EntryInfo {
                name: "index.json".into(),
                modified: Some(Utc::now()),
            },
        ];

        let discovered = index.reconcile(&entries);
        assert_eq!(discovered, 2);

        let snapshot = index.snapshot();
        let canonical = &snapshot.samples[&canonical_ts];
        assert!(!canonical.reconstructed);
        assert_eq!(canonical.enrichment, EnrichmentState::Pending);

        let fallback = &snapshot.samples[&ts("2025-02-01T00:00:00Z")];
        assert!(fallback.reconstructed);
        assert_eq!(fallback.media_ref, "randomname.jpg");
    }

    #[test]
    fn reconcile_keeps_existing_text() {
        let index = ReconcilingIndex::default();
        let sample = indexed_sample("2025-01-01T00:00:00Z", "kept text");
        let name = sample.media_ref.clone();
        let when = sample.timestamp;
        index.add_sample(sample);

        index.reconcile(&[EntryInfo {
            name,
            modified: None,
        }]);

        let snapshot = index.snapshot();
        assert_eq!(snapshot.samples[&when].extracted_text, "kept text");
        assert_eq!(snapshot.samples[&when].enrichment, EnrichmentState::Done);
    }

    #[test]
    fn recent_text_respects_cutoff() {
        let index = ReconcilingIndex::default();
        index.add_sample(indexed_sample("2025-01-01T00:00:00Z", "old"));
        index.add_sample(indexed_sample("2025-01-01T01:00:00Z", "new"));

        let text = index.recent_text_since(ts("2025-01-01T00:30:00Z"));
        assert_eq!(text, "new");
    }
}
