//! Search over the mirrored following set.
//!
//! Builds ephemeral, paginated views over whatever entity set the store
//! currently exposes. Matching is substring-based: exact mode matches the
//! whole query, token mode splits on whitespace with OR semantics, which
//! favors breadth over precision for short noisy queries. Every
//! non-empty query lands in a deduplicated, persisted
//! history ring capped at 50 entries.

use crate::model::{FollowedUser, SearchPage, Snapshot};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, warn};

/// Filename of the persisted query history inside the data directory.
pub const HISTORY_FILENAME: &str = "search_history.json";

/// Maximum retained history entries, most recent first.
pub const HISTORY_CAP: usize = 50;

/// Query service with a persisted history ring.
pub struct SearchService {
    history_file: PathBuf,
    history: Mutex<Vec<String>>,
}

impl SearchService {
    /// Open the service rooted at `data_dir`, loading any persisted
    /// history. History I/O failures degrade to an empty history.
    #[must_use]
    pub fn open(data_dir: impl Into<PathBuf>) -> Self {
        let history_file = data_dir.into().join(HISTORY_FILENAME);
        let history = std::fs::read_to_string(&history_file)
            .ok()
            .and_then(|content| serde_json::from_str::<Vec<String>>(&content).ok())
            .unwrap_or_default();

        Self {
            history_file,
            history: Mutex::new(history),
        }
    }

    /// Search the snapshot and return one result page.
    ///
    /// An empty or whitespace query returns the canonical empty page and
    /// does not touch the history. An out-of-range `page` is clamped into
    /// `[1, max(1, total_pages)]`, never an error. `elapsed_ms` covers
    /// only the filter+slice step.
    #[must_use]
    pub fn search(
        &self,
        snapshot: &Snapshot,
        query: &str,
        exact: bool,
        page: usize,
        page_size: usize,
    ) -> SearchPage {
        let page_size = page_size.max(1);
        let query = query.trim();
        if query.is_empty() {
            return SearchPage::empty(page_size);
        }

        let keyword = query.to_lowercase();
        let start = Instant::now();

        let matches: Vec<&FollowedUser> = if exact {
            snapshot
                .users
                .values()
                .filter(|user| matches_whole(user, &keyword))
                .collect()
        } else {
            let tokens: Vec<&str> = keyword.split_whitespace().collect();
            snapshot
                .users
                .values()
                .filter(|user| matches_any_token(user, &tokens))
                .collect()
        };

        let total = matches.len();
        let total_pages = total.div_ceil(page_size);
        let page = page.clamp(1, total_pages.max(1));
        let start_idx = (page - 1) * page_size;
        let results: Vec<FollowedUser> = matches
            .into_iter()
            .skip(start_idx)
            .take(page_size)
            .cloned()
            .collect();

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        debug!(%query, exact, total, page, elapsed_ms, "Search completed");

        self.record(query);

        SearchPage {
            results,
            total,
            page,
            page_size,
            total_pages,
            query: query.to_string(),
            elapsed_ms,
        }
    }

    /// The most recent queries, newest first.
    #[must_use]
    pub fn history(&self, limit: usize) -> Vec<String> {
        self.history.lock().iter().take(limit).cloned().collect()
    }

    /// Forget all recorded queries and persist the empty list.
    pub fn clear_history(&self) {
        let mut history = self.history.lock();
        history.clear();
        Self::save(&self.history_file, &history);
    }

    /// Push `query` to the front of the ring, deduplicated and capped.
    fn record(&self, query: &str) {
        let mut history = self.history.lock();
        history.retain(|entry| entry != query);
        history.insert(0, query.to_string());
        history.truncate(HISTORY_CAP);
        Self::save(&self.history_file, &history);
    }

    /// Persist the history list. Best-effort.
    fn save(path: &PathBuf, entries: &[String]) {
        match serde_json::to_string(entries) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    warn!(path = %path.display(), error = %e, "History write failed");
                }
            }
            Err(e) => warn!(error = %e, "History encode failed"),
        }
    }
}

/// Exact mode: the whole trimmed, case-folded query as a substring of
/// name, id, or bio.
fn matches_whole(user: &FollowedUser, keyword: &str) -> bool {
    user.display_name.to_lowercase().contains(keyword)
        || user.id.to_lowercase().contains(keyword)
        || user.bio.to_lowercase().contains(keyword)
}

/// Token mode: any token as a substring of name, id, or bio.
fn matches_any_token(user: &FollowedUser, tokens: &[&str]) -> bool {
    let name = user.display_name.to_lowercase();
    let id = user.id.to_lowercase();
    let bio = user.bio.to_lowercase();
    tokens
        .iter()
        .any(|token| name.contains(token) || id.contains(token) || bio.contains(token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::build_snapshot;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn user(id: &str, name: &str, bio: &str) -> FollowedUser {
        FollowedUser {
            id: id.to_string(),
            display_name: name.to_string(),
            bio: bio.to_string(),
            followed_at: None,
            avatar_ref: String::new(),
            badges: BTreeMap::new(),
        }
    }

    fn sample_snapshot() -> Snapshot {
        build_snapshot(vec![
            user("1", "Ann", "rust and games"),
            user("2", "Anna", "music covers"),
            user("3", "Bob", "cooking streams"),
        ])
    }

    fn service(dir: &TempDir) -> SearchService {
        SearchService::open(dir.path())
    }

    #[test]
    fn empty_query_returns_empty_page_and_skips_history() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let snapshot = sample_snapshot();

        for query in ["", "   ", "\t"] {
            let page = svc.search(&snapshot, query, false, 1, 20);
            assert!(page.results.is_empty());
            assert_eq!(page.total, 0);
            assert_eq!(page.total_pages, 0);
        }
        assert!(svc.history(10).is_empty());
    }

    #[test]
    fn ann_anna_match_in_both_modes() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let snapshot = sample_snapshot();

        for query in ["an", "ann"] {
            for exact in [false, true] {
                let page = svc.search(&snapshot, query, exact, 1, 20);
                let ids: Vec<&str> = page.results.iter().map(|u| u.id.as_str()).collect();
                assert_eq!(ids, ["1", "2"], "query {query:?} exact {exact}");
            }
        }
    }

    #[test]
    fn exact_mode_matches_whole_query_only() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let snapshot = sample_snapshot();

        // "ann music" is not a substring of anything as a whole...
        let page = svc.search(&snapshot, "ann music", true, 1, 20);
        assert_eq!(page.total, 0);

        // ...but token mode ORs the parts.
        let page = svc.search(&snapshot, "ann music", false, 1, 20);
        let ids: Vec<&str> = page.results.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, ["1", "2"]);
    }

    #[test]
    fn tokens_match_bio_and_id() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let snapshot = sample_snapshot();

        let page = svc.search(&snapshot, "cooking", false, 1, 20);
        assert_eq!(page.results[0].id, "3");

        let page = svc.search(&snapshot, "2", false, 1, 20);
        assert_eq!(page.results[0].id, "2");
    }

    #[test]
    fn out_of_range_pages_clamp() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let snapshot = build_snapshot((0..25).map(|i| user(&format!("{i:02}"), "name", "")));

        let page = svc.search(&snapshot, "name", false, 99, 10);
        assert_eq!(page.total, 25);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.page, 3);
        assert_eq!(page.results.len(), 5);

        let page = svc.search(&snapshot, "name", false, 0, 10);
        assert_eq!(page.page, 1);
        assert_eq!(page.results.len(), 10);
    }

    #[test]
    fn pagination_slices_in_order() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let snapshot = build_snapshot((0..25).map(|i| user(&format!("{i:02}"), "name", "")));

        let page = svc.search(&snapshot, "name", false, 2, 10);
        let ids: Vec<&str> = page.results.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids[0], "10");
        assert_eq!(ids.len(), 10);
    }

    #[test]
    fn history_dedupes_and_caps() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let snapshot = sample_snapshot();

        for i in 0..60 {
            svc.search(&snapshot, &format!("q{i}"), false, 1, 20);
        }
        assert_eq!(svc.history(usize::MAX).len(), HISTORY_CAP);

        // Re-submitting moves to the front without duplicating.
        svc.search(&snapshot, "q55", false, 1, 20);
        let history = svc.history(usize::MAX);
        assert_eq!(history[0], "q55");
        assert_eq!(history.iter().filter(|q| *q == "q55").count(), 1);
        assert_eq!(history.len(), HISTORY_CAP);
    }

    #[test]
    fn history_records_misses_and_persists() {
        let dir = TempDir::new().unwrap();
        {
            let svc = service(&dir);
            let snapshot = sample_snapshot();
            let page = svc.search(&snapshot, "no such channel", false, 1, 20);
            assert_eq!(page.total, 0);
        }

        // A fresh service over the same directory sees the entry.
        let svc = service(&dir);
        assert_eq!(svc.history(10), ["no such channel"]);

        svc.clear_history();
        let svc = service(&dir);
        assert!(svc.history(10).is_empty());
    }

    #[test]
    fn corrupt_history_degrades_to_empty() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(HISTORY_FILENAME), "{oops").unwrap();
        let svc = service(&dir);
        assert!(svc.history(10).is_empty());
    }
}
