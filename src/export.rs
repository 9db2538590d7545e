//! Simplified export writer and the forgiving import parser.
//!
//! Exports are a reporting format: display-oriented records in a
//! timestamped file, not a byte-round-trippable backup (the store's own
//! data file is that). Import accepts either the export shape or the
//! internal/raw shape and skips entries it cannot use.

use crate::error::{FoloError, Result};
use crate::model::{FollowedUser, Snapshot};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One display-oriented export record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRecord {
    pub username: String,
    pub uid: String,
    /// Formatted follow date, or "unknown".
    pub follow_time: String,
    pub follow_timestamp: Option<i64>,
    pub bio: String,
    pub verified: Option<String>,
    pub avatar: String,
}

impl From<&FollowedUser> for ExportRecord {
    fn from(user: &FollowedUser) -> Self {
        Self {
            username: user.display_name.clone(),
            uid: user.id.clone(),
            follow_time: user.followed_at_display(),
            follow_timestamp: user.followed_at,
            bio: user.bio.clone(),
            verified: user.verified_label().map(ToString::to_string),
            avatar: user.avatar_ref.clone(),
        }
    }
}

/// Write `users` as an export file under `dir` and return its path.
///
/// The filename carries a timestamp and the entry count, e.g.
/// `following_export_20260829_101530_412_users.json`.
///
/// # Errors
///
/// Filesystem errors creating `dir` or writing the file.
pub fn write_export<'a>(
    users: impl IntoIterator<Item = &'a FollowedUser>,
    dir: &Path,
) -> Result<PathBuf> {
    let records: Vec<ExportRecord> = users.into_iter().map(ExportRecord::from).collect();

    fs::create_dir_all(dir)
        .map_err(|e| FoloError::path_error("create export directory", dir, e))?;

    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!(
        "following_export_{stamp}_{}_users.json",
        records.len()
    ));

    let json = serde_json::to_string_pretty(&records)?;
    fs::write(&path, json).map_err(|e| FoloError::path_error("write export", &path, e))?;

    debug!(path = %path.display(), count = records.len(), "Export written");
    Ok(path)
}

/// Export the whole snapshot in id order.
///
/// # Errors
///
/// Same as [`write_export`].
pub fn export_snapshot(snapshot: &Snapshot, dir: &Path) -> Result<PathBuf> {
    write_export(snapshot.users.values(), dir)
}

/// Parse a user list from `path`, accepting the export shape (`uid`
/// key), the raw wire shape (`mid`), or the internal entity shape
/// (`id`). Entries without a usable id or name are skipped with a
/// warning, not fatal.
///
/// # Errors
///
/// Returns a `ValidationError` if the file is not a JSON array at the
/// top level; filesystem and JSON syntax errors as usual.
pub fn import_users(path: &Path) -> Result<Vec<FollowedUser>> {
    let raw = fs::read_to_string(path)
        .map_err(|e| FoloError::path_error("read import file", path, e))?;
    let value: Value = serde_json::from_str(&raw)?;

    let Value::Array(entries) = value else {
        return Err(FoloError::validation(format!(
            "{} is not a JSON array of users",
            path.display()
        )));
    };

    let total = entries.len();
    let users: Vec<FollowedUser> = entries.into_iter().filter_map(parse_entry).collect();
    let skipped = total - users.len();
    if skipped > 0 {
        warn!(skipped, total, "Import skipped unusable entries");
    }

    Ok(users)
}

/// Extract the ids from an import file, preserving order.
///
/// # Errors
///
/// Same as [`import_users`].
pub fn import_ids(path: &Path) -> Result<Vec<String>> {
    Ok(import_users(path)?.into_iter().map(|u| u.id).collect())
}

fn parse_entry(entry: Value) -> Option<FollowedUser> {
    let obj = entry.as_object()?;

    let id = id_field(obj, "uid")
        .or_else(|| id_field(obj, "mid"))
        .or_else(|| id_field(obj, "id"))?;

    let display_name = ["username", "uname", "display_name"]
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .unwrap_or("")
        .trim()
        .to_string();

    let bio = ["bio", "sign"]
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .unwrap_or("")
        .trim()
        .to_string();

    let followed_at = ["follow_timestamp", "mtime", "followed_at"]
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_i64))
        .filter(|&t| t > 0);

    let avatar_ref = ["avatar", "face", "avatar_ref"]
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .unwrap_or("")
        .to_string();

    Some(FollowedUser {
        id,
        display_name,
        bio,
        followed_at,
        avatar_ref,
        badges: BTreeMap::new(),
    })
}

/// Numeric or string id under `key`; empty strings do not count.
fn id_field(obj: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::build_snapshot;
    use serde_json::json;
    use tempfile::TempDir;

    fn user(id: &str, name: &str) -> FollowedUser {
        FollowedUser {
            id: id.to_string(),
            display_name: name.to_string(),
            bio: String::new(),
            followed_at: Some(1_700_000_000),
            avatar_ref: String::new(),
            badges: BTreeMap::new(),
        }
    }

    #[test]
    fn export_filename_carries_count() {
        let dir = TempDir::new().unwrap();
        let snapshot = build_snapshot([user("1", "Ann"), user("2", "Bea")]);

        let path = export_snapshot(&snapshot, dir.path()).unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("following_export_"));
        assert!(name.ends_with("_2_users.json"));

        let records: Vec<ExportRecord> =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].uid, "1");
        assert_eq!(records[0].username, "Ann");
    }

    #[test]
    fn import_reads_export_shape() {
        let dir = TempDir::new().unwrap();
        let snapshot = build_snapshot([user("42", "Cara")]);
        let path = export_snapshot(&snapshot, dir.path()).unwrap();

        let users = import_users(&path).unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, "42");
        assert_eq!(users[0].display_name, "Cara");
        assert_eq!(users[0].followed_at, Some(1_700_000_000));
    }

    #[test]
    fn import_reads_raw_wire_shape() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wire.json");
        fs::write(
            &path,
            json!([
                {"mid": 7, "uname": "Dee", "sign": "hi", "mtime": 1_600_000_000},
                {"mid": 8, "uname": "Eve"}
            ])
            .to_string(),
        )
        .unwrap();

        let users = import_users(&path).unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].id, "7");
        assert_eq!(users[0].bio, "hi");
        assert_eq!(users[1].followed_at, None);
    }

    #[test]
    fn import_skips_entries_without_id() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mixed.json");
        fs::write(
            &path,
            json!([
                {"uid": "1", "username": "ok"},
                {"username": "no id"},
                {"uid": "", "username": "empty id"},
                "not an object"
            ])
            .to_string(),
        )
        .unwrap();

        let users = import_users(&path).unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, "1");
    }

    #[test]
    fn import_rejects_non_array() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("obj.json");
        fs::write(&path, "{\"users\": {}}").unwrap();
        assert!(matches!(
            import_users(&path).unwrap_err(),
            FoloError::ValidationError { .. }
        ));
    }

    #[test]
    fn import_ids_preserves_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ids.json");
        fs::write(&path, json!([{"uid": "9"}, {"uid": "3"}, {"uid": "5"}]).to_string()).unwrap();
        assert_eq!(import_ids(&path).unwrap(), vec!["9", "3", "5"]);
    }
}
