//! services/reader/src/engine/prefetch.rs
//!
//! Keeps up to `depth` audio resources downloaded ahead of the playing item.
//! Purely an optimisation: a miss just means the media element fetches itself.

use bytes::Bytes;
use recitation_core::domain::Edition;

#[derive(Debug, Clone)]
struct PrefetchEntry {
    index: usize,
    url: String,
    /// `None` while the download is still in flight.
    bytes: Option<Bytes>,
}

/// A planned download handed back to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefetchRequest {
    pub index: usize,
    pub url: String,
}

#[derive(Debug)]
pub struct PrefetchCache {
    depth: usize,
    edition: Option<Edition>,
    entries: Vec<PrefetchEntry>,
}

/// Indices `index+1 ..= index+depth` that exist in a container of `item_count`.
pub fn prefetch_targets(index: usize, item_count: usize, depth: usize) -> Vec<usize> {
    (index + 1..=index + depth)
        .filter(|i| *i < item_count)
        .collect()
}

impl PrefetchCache {
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            edition: None,
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn indices(&self) -> Vec<usize> {
        self.entries.iter().map(|e| e.index).collect()
    }

    pub fn invalidate(&mut self) {
        self.entries.clear();
        self.edition = None;
    }

    /// Re-targets the cache at the items after `index` and returns the downloads
    /// still missing. `url_for` resolves an index to its resource under `edition`.
    pub fn plan(
        &mut self,
        index: usize,
        item_count: usize,
        edition: &Edition,
        url_for: impl Fn(usize) -> Option<String>,
    ) -> Vec<PrefetchRequest> {
        if self.edition.as_ref() != Some(edition) {
            self.entries.clear();
            self.edition = Some(edition.clone());
        }

        let targets = prefetch_targets(index, item_count, self.depth);
        self.entries.retain(|e| targets.contains(&e.index));

        let mut requests = Vec::new();
        for target in targets {
            if self.entries.iter().any(|e| e.index == target) {
                continue;
            }
            let Some(url) = url_for(target) else {
                continue;
            };
            self.entries.push(PrefetchEntry {
                index: target,
                url: url.clone(),
                bytes: None,
            });
            requests.push(PrefetchRequest { index: target, url });
        }
        requests
    }

    /// Stores a finished download if the slot is still wanted.
    pub fn fulfil(&mut self, edition: &Edition, url: &str, bytes: Bytes) -> bool {
        if self.edition.as_ref() != Some(edition) {
            return false;
        }
        match self.entries.iter_mut().find(|e| e.url == url) {
            Some(entry) => {
                entry.bytes = Some(bytes);
                true
            }
            None => false,
        }
    }

    /// Drops a slot whose download failed.
    pub fn abandon(&mut self, url: &str) {
        self.entries.retain(|e| e.url != url);
    }

    /// Hands a downloaded resource to the media element, removing it from the cache.
    pub fn take(&mut self, url: &str) -> Option<Bytes> {
        let position = self
            .entries
            .iter()
            .position(|e| e.url == url && e.bytes.is_some())?;
        self.entries.remove(position).bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(index: usize) -> Option<String> {
        Some(format!("audio/{index}.mp3"))
    }

    #[test]
    fn targets_are_bounded_by_container_end() {
        assert_eq!(prefetch_targets(0, 10, 2), vec![1, 2]);
        assert_eq!(prefetch_targets(8, 10, 2), vec![9]);
        assert!(prefetch_targets(9, 10, 2).is_empty());
    }

    #[test]
    fn plan_keeps_at_most_depth_entries_ahead() {
        let edition = Edition::new("ar.alafasy");
        let mut cache = PrefetchCache::new(2);

        let first = cache.plan(0, 6, &edition, url);
        assert_eq!(first.len(), 2);
        assert_eq!(cache.indices(), vec![1, 2]);

        let second = cache.plan(1, 6, &edition, url);
        assert_eq!(second, vec![PrefetchRequest { index: 3, url: "audio/3.mp3".into() }]);
        assert_eq!(cache.indices(), vec![2, 3]);
        assert!(cache.len() <= 2);
    }

    #[test]
    fn edition_change_rebuilds_the_cache() {
        let mut cache = PrefetchCache::new(2);
        cache.plan(0, 6, &Edition::new("ar.alafasy"), url);
        assert!(cache.fulfil(&Edition::new("ar.alafasy"), "audio/1.mp3", Bytes::from_static(b"a")));

        let requests = cache.plan(0, 6, &Edition::new("ar.husary"), url);
        assert_eq!(requests.len(), 2);
        assert!(cache.take("audio/1.mp3").is_none());
        assert!(!cache.fulfil(&Edition::new("ar.alafasy"), "audio/1.mp3", Bytes::new()));
    }

    #[test]
    fn take_only_returns_finished_downloads() {
        let edition = Edition::default();
        let mut cache = PrefetchCache::new(2);
        cache.plan(3, 6, &edition, url);
        assert!(cache.take("audio/4.mp3").is_none());

        cache.fulfil(&edition, "audio/4.mp3", Bytes::from_static(b"mp3"));
        assert_eq!(cache.take("audio/4.mp3"), Some(Bytes::from_static(b"mp3")));
        assert_eq!(cache.indices(), vec![5]);
    }
}
