//! Keep/delete planning for duplicate groups. Pure: nothing here touches the
//! filesystem beyond reading modification times.

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::SystemTime;

use super::DuplicateGroup;

/// Path components that mark a copy as transient.
const TRANSIENT_COMPONENTS: &[&str] = &["temp", "tmp", "download", "downloads", "cache", "trash", ".trash"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeepStrategy {
    /// Prefer permanent locations, then the shortest path.
    #[default]
    ShortestPath,
    Newest,
    Oldest,
}

impl fmt::Display for KeepStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KeepStrategy::ShortestPath => "shortest_path",
            KeepStrategy::Newest => "newest",
            KeepStrategy::Oldest => "oldest",
        })
    }
}

impl FromStr for KeepStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "shortest" | "shortest_path" | "path" => Ok(KeepStrategy::ShortestPath),
            "newest" | "date" => Ok(KeepStrategy::Newest),
            "oldest" => Ok(KeepStrategy::Oldest),
            other => Err(format!("unknown keep strategy '{}'", other)),
        }
    }
}

/// Exactly one path survives; every other member of the group is a delete candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeepPlan {
    pub hash: String,
    pub size: u64,
    pub keep: PathBuf,
    pub delete: Vec<PathBuf>,
    pub reason: String,
    pub strategy: KeepStrategy,
}

impl KeepPlan {
    pub fn space_freed(&self) -> u64 {
        self.size * self.delete.len() as u64
    }
}

fn is_transient(path: &Path) -> bool {
    path.components().any(|c| {
        let name = c.as_os_str().to_string_lossy().to_lowercase();
        TRANSIENT_COMPONENTS.contains(&name.as_str())
    })
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn split(group: &DuplicateGroup, keep: &Path, reason: String, strategy: KeepStrategy) -> KeepPlan {
    KeepPlan {
        hash: group.hash.clone(),
        size: group.size,
        keep: keep.to_path_buf(),
        delete: group
            .paths
            .iter()
            .filter(|p| p.as_path() != keep)
            .cloned()
            .collect(),
        reason,
        strategy,
    }
}

/// Keep the copy in the most permanent-looking place: not under a temporary
/// folder, then the shortest path, then the lexicographically smallest.
pub fn suggest_keep(group: &DuplicateGroup) -> Option<KeepPlan> {
    let rank = |p: &PathBuf| (is_transient(p), p.as_os_str().len());
    let keep = group
        .paths
        .iter()
        .min_by(|a, b| rank(a).cmp(&rank(b)).then_with(|| a.cmp(b)))?;
    let reason = if is_transient(keep) {
        "Shortest path (every copy is in a temporary location)".to_string()
    } else if group.paths.iter().any(|p| is_transient(p)) {
        "Permanent location preferred over temporary copies".to_string()
    } else {
        "Shortest path".to_string()
    };
    Some(split(group, keep, reason, KeepStrategy::ShortestPath))
}

/// Keep the newest (or oldest) copy by modification time. Unreadable times
/// count as oldest; ties go to the smallest path.
pub fn compare_by_date(group: &DuplicateGroup, newest: bool) -> Option<KeepPlan> {
    let dated: Vec<(Option<SystemTime>, &PathBuf)> =
        group.paths.iter().map(|p| (modified(p), p)).collect();
    let (_, keep) = if newest {
        dated.iter().min_by_key(|(time, path)| (Reverse(*time), *path))?
    } else {
        dated.iter().min_by_key(|(time, path)| (*time, *path))?
    };
    let (reason, strategy) = if newest {
        ("Newest modification time", KeepStrategy::Newest)
    } else {
        ("Oldest modification time", KeepStrategy::Oldest)
    };
    Some(split(group, keep, reason.to_string(), strategy))
}

pub fn plan_group(group: &DuplicateGroup, strategy: KeepStrategy) -> Option<KeepPlan> {
    match strategy {
        KeepStrategy::ShortestPath => suggest_keep(group),
        KeepStrategy::Newest => compare_by_date(group, true),
        KeepStrategy::Oldest => compare_by_date(group, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn group(paths: &[&str]) -> DuplicateGroup {
        DuplicateGroup::new("abc".into(), 10, paths.iter().map(PathBuf::from).collect())
    }

    #[test]
    fn test_permanent_location_beats_shorter_temp_path() {
        let g = group(&["/data/tmp/a.txt", "/data/photos/2024/a.txt"]);
        let plan = suggest_keep(&g).unwrap();
        assert_eq!(plan.keep, PathBuf::from("/data/photos/2024/a.txt"));
        assert_eq!(plan.delete, vec![PathBuf::from("/data/tmp/a.txt")]);
        assert_eq!(plan.space_freed(), 10);
    }

    #[test]
    fn test_shortest_then_lexicographic() {
        let g = group(&["/data/bb.txt", "/data/ab.txt", "/data/long/ab.txt"]);
        let plan = suggest_keep(&g).unwrap();
        assert_eq!(plan.keep, PathBuf::from("/data/ab.txt"));
        assert_eq!(plan.delete.len(), 2);
    }

    #[test]
    fn test_keep_is_never_in_delete() {
        let g = group(&["/x/a", "/x/b", "/x/c"]);
        for strategy in [KeepStrategy::ShortestPath, KeepStrategy::Newest, KeepStrategy::Oldest] {
            let plan = plan_group(&g, strategy).unwrap();
            assert!(!plan.delete.contains(&plan.keep));
            assert_eq!(plan.delete.len(), 2);
        }
    }

    #[test]
    fn test_compare_by_date() {
        let dir = tempdir().unwrap();
        let old = dir.path().join("old.txt");
        let new = dir.path().join("new.txt");
        fs::write(&old, b"same").unwrap();
        fs::write(&new, b"same").unwrap();
        let past = SystemTime::now() - Duration::from_secs(3600);
        fs::File::options()
            .write(true)
            .open(&old)
            .unwrap()
            .set_modified(past)
            .unwrap();

        let g = DuplicateGroup::new("h".into(), 4, vec![old.clone(), new.clone()]);
        assert_eq!(compare_by_date(&g, true).unwrap().keep, new);
        assert_eq!(compare_by_date(&g, false).unwrap().keep, old);
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("newest".parse::<KeepStrategy>().unwrap(), KeepStrategy::Newest);
        assert_eq!("shortest".parse::<KeepStrategy>().unwrap(), KeepStrategy::ShortestPath);
        assert!("random".parse::<KeepStrategy>().is_err());
    }
}
