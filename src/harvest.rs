//! Change-log harvesting
//!
//! Copies the binary logs found in the source directory into the data
//! directory as a single contiguous relay-log stream and writes the relay log
//! index the engine replays from.
//!
//! # Naming
//!
//! Source files are renumbered, never parsed: the Nth qualifying file becomes
//! `<prefix>.<N as 6 digits>`. Source numbering may have gaps or restart after
//! a server reset, while the engine only accepts relay logs numbered as one
//! stream starting at 1.
//!
//! # Durability
//!
//! Every copied segment is fsynced before the next one is written. The index
//! is built in memory, written to a temporary file, fsynced and renamed into
//! place, so a crash never leaves a half-written index behind.

use log::{debug, info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use strum::{Display, EnumString};

use crate::error::{PitrError, Result};

/// Relay log base name used when neither the operator nor the engine names one
pub const DEFAULT_RELAY_LOG_NAME: &str = "mysql1-relay-bin";

/// Companion files recording replication position state, not log data
pub const AUXILIARY_SUFFIX: &str = "-gtid-set";

/// Width of the zero-padded sequence in destination names
pub const SEQUENCE_WIDTH: usize = 6;

/// Most segments a single stream can hold at [`SEQUENCE_WIDTH`] digits
pub const MAX_SEGMENTS: usize = 999_999;

/// `name.000123` as written by the server (seven digits and more past
/// 999999), or `binlog_<ts>_<hash>` as uploaded by binlog collectors
static SEGMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\.[0-9]{6,}$)|(^binlog_[0-9]+_[0-9a-f]+$)").expect("invalid segment pattern")
});

/// Order in which qualifying files receive sequence numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SegmentOrder {
    /// Directory listing order
    #[default]
    Discovery,
    /// Ascending original file name
    Name,
}

/// One change-log segment scheduled for copying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSegmentFile {
    pub original_name: String,
    /// 1-based, assigned after filtering
    pub sequence: u32,
    pub destination_name: String,
}

/// Returns true if `name` is a genuine log segment (not auxiliary metadata).
pub fn is_log_segment(name: &str) -> bool {
    !name.ends_with(AUXILIARY_SUFFIX) && SEGMENT_RE.is_match(name)
}

/// Destination file name for a sequence number.
pub fn destination_name(prefix: &str, sequence: u32) -> String {
    format!("{}.{:0width$}", prefix, sequence, width = SEQUENCE_WIDTH)
}

/// Filter candidate names and assign contiguous sequence numbers.
pub fn plan_segments<I>(prefix: &str, names: I, order: SegmentOrder) -> Vec<LogSegmentFile>
where
    I: IntoIterator<Item = String>,
{
    let mut qualifying: Vec<String> = names
        .into_iter()
        .filter(|name| {
            let keep = is_log_segment(name);
            if !keep {
                debug!("Skipping {} (not a log segment)", name);
            }
            keep
        })
        .collect();

    if order == SegmentOrder::Name {
        qualifying.sort();
    }

    qualifying
        .into_iter()
        .zip(1u32..)
        .map(|(original_name, sequence)| LogSegmentFile {
            destination_name: destination_name(prefix, sequence),
            original_name,
            sequence,
        })
        .collect()
}

/// Ordered relay log index contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogIndex {
    entries: Vec<String>,
}

impl LogIndex {
    /// Build the index from planned segments, sorted by destination name.
    pub fn from_segments(segments: &[LogSegmentFile]) -> Self {
        let mut entries: Vec<String> = segments
            .iter()
            .map(|s| s.destination_name.clone())
            .collect();
        entries.sort();
        Self { entries }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Segment replay must start from.
    pub fn first(&self) -> Option<&str> {
        self.entries.first().map(String::as_str)
    }

    /// One name per line, newline terminated.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(entry);
            out.push('\n');
        }
        out
    }

    /// Write the index atomically and durably.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let mut file = File::create(&tmp_path).map_err(|e| PitrError::file_io(&tmp_path, e))?;
        file.write_all(self.render().as_bytes())
            .map_err(|e| PitrError::file_io(&tmp_path, e))?;
        file.sync_all().map_err(|e| PitrError::file_io(&tmp_path, e))?;
        drop(file);

        fs::rename(&tmp_path, path).map_err(|e| PitrError::file_io(path, e))?;
        if let Some(parent) = path.parent() {
            sync_directory(parent)?;
        }
        Ok(())
    }
}

/// Result of a harvest run.
#[derive(Debug, Clone)]
pub struct HarvestReport {
    pub segments: Vec<LogSegmentFile>,
    pub index: LogIndex,
    pub index_path: PathBuf,
    /// Smallest destination name; replay starts here
    pub first_segment: String,
}

/// Copies change logs into the data directory and writes the relay log index.
#[derive(Debug, Clone)]
pub struct Harvester {
    pub source_dir: PathBuf,
    pub data_dir: PathBuf,
    /// Relay log index the engine reads on start
    pub index_path: PathBuf,
    pub prefix: String,
    pub order: SegmentOrder,
    /// Plan and log only
    pub dry_run: bool,
}

impl Harvester {
    pub fn new(
        source_dir: impl Into<PathBuf>,
        data_dir: impl Into<PathBuf>,
        index_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source_dir: source_dir.into(),
            data_dir: data_dir.into(),
            index_path: index_path.into(),
            prefix: DEFAULT_RELAY_LOG_NAME.to_string(),
            order: SegmentOrder::Discovery,
            dry_run: false,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_order(mut self, order: SegmentOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Copy, renumber and index every qualifying segment.
    ///
    /// Fails without writing anything when no qualifying segment exists.
    pub fn harvest(&self) -> Result<HarvestReport> {
        let candidates = list_candidates(&self.source_dir)?;
        let segments = plan_segments(&self.prefix, candidates, self.order);
        check_segment_count(segments.len(), &self.source_dir)?;

        let index = LogIndex::from_segments(&segments);
        let index_path = self.index_path.clone();
        let first_segment = index
            .first()
            .map(str::to_string)
            .ok_or_else(|| PitrError::harvest("Relay log index is empty"))?;

        for segment in &segments {
            let src = self.source_dir.join(&segment.original_name);
            let dst = self.data_dir.join(&segment.destination_name);
            if self.dry_run {
                info!("[DRY RUN] Would copy {} to {}", src.display(), dst.display());
                continue;
            }
            debug!("Copying {} to {}", src.display(), dst.display());
            copy_segment(&src, &dst)?;
        }

        if self.dry_run {
            info!(
                "[DRY RUN] Would write {} entries to {}",
                index.entries().len(),
                index_path.display()
            );
        } else {
            index.persist(&index_path)?;
            sync_directory(&self.data_dir)?;
        }

        info!(
            "Staged {} binary log(s) from {}, replay starts at {}",
            segments.len(),
            self.source_dir.display(),
            first_segment
        );

        Ok(HarvestReport {
            segments,
            index,
            index_path,
            first_segment,
        })
    }
}

/// At least one segment, and no more than fit the fixed-width numbering
/// (wider names would sort ahead of `.999999` in the index).
fn check_segment_count(count: usize, source_dir: &Path) -> Result<()> {
    if count == 0 {
        return Err(PitrError::harvest(format!(
            "No binary logs found in {}",
            source_dir.display()
        )));
    }
    if count > MAX_SEGMENTS {
        return Err(PitrError::harvest(format!(
            "{} binary logs found in {}, at most {} can be replayed in one run",
            count,
            source_dir.display(),
            MAX_SEGMENTS
        )));
    }
    Ok(())
}

/// Non-directory entry names of `dir`, in listing order.
fn list_candidates(dir: &Path) -> Result<Vec<String>> {
    let entries = fs::read_dir(dir).map_err(|e| PitrError::file_io(dir, e))?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| PitrError::file_io(dir, e))?;
        let path = entry.path();
        if path.is_dir() {
            debug!("Skipping directory {}", path.display());
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(raw) => warn!("Skipping non UTF-8 file name {:?}", raw),
        }
    }
    Ok(names)
}

/// Full read then write, fsynced before returning.
fn copy_segment(src: &Path, dst: &Path) -> Result<()> {
    let data = fs::read(src).map_err(|e| PitrError::file_io(src, e))?;
    let mut file = File::create(dst).map_err(|e| PitrError::file_io(dst, e))?;
    file.write_all(&data).map_err(|e| PitrError::file_io(dst, e))?;
    file.sync_all()
        .map_err(|e| PitrError::file_io(dst, e))
}

fn sync_directory(dir: &Path) -> Result<()> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| PitrError::file_io(dir, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_is_log_segment() {
        assert!(is_log_segment("binlog.000001"));
        assert!(is_log_segment("relay-bin.123456"));
        assert!(is_log_segment("binlog.1000000"));
        assert!(!is_log_segment("binlog.1000000-gtid-set"));
        assert!(is_log_segment("binlog_1618226384_d1c2f7f25e0d2a4c4a0b0d6a2e5b8f11"));
        assert!(!is_log_segment("relay-bin.000001-gtid-set"));
        assert!(!is_log_segment("binlog_1618226384_d1c2f7f2-gtid-set"));
        assert!(!is_log_segment("binlog.index"));
        assert!(!is_log_segment("binlog.00001"));
        assert!(!is_log_segment("README"));
    }

    #[test]
    fn test_destination_name_is_zero_padded() {
        assert_eq!(destination_name("mysql1-relay-bin", 1), "mysql1-relay-bin.000001");
        assert_eq!(destination_name("r", 123456), "r.123456");
    }

    #[test]
    fn test_plan_uses_discovery_order() {
        let plan = plan_segments(
            "mysql1-relay-bin",
            names(&["relay-bin.000003", "relay-bin.000001", "relay-bin.000001-gtid-set"]),
            SegmentOrder::Discovery,
        );
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].original_name, "relay-bin.000003");
        assert_eq!(plan[0].destination_name, "mysql1-relay-bin.000001");
        assert_eq!(plan[1].original_name, "relay-bin.000001");
        assert_eq!(plan[1].destination_name, "mysql1-relay-bin.000002");
    }

    #[test]
    fn test_plan_name_order() {
        let plan = plan_segments(
            "r",
            names(&["b.000002", "b.000010", "b.000001"]),
            SegmentOrder::Name,
        );
        let originals: Vec<&str> = plan.iter().map(|s| s.original_name.as_str()).collect();
        assert_eq!(originals, vec!["b.000001", "b.000002", "b.000010"]);
        assert_eq!(plan[2].sequence, 3);
    }

    #[test]
    fn test_segment_count_bounds() {
        let dir = Path::new("/srv/binlogs");
        assert!(matches!(check_segment_count(0, dir), Err(PitrError::Harvest(_))));
        assert!(check_segment_count(1, dir).is_ok());
        assert!(check_segment_count(MAX_SEGMENTS, dir).is_ok());
        assert!(matches!(
            check_segment_count(MAX_SEGMENTS + 1, dir),
            Err(PitrError::Harvest(_))
        ));
    }

    #[test]
    fn test_plan_keeps_rollover_segments() {
        let plan = plan_segments(
            "r",
            names(&["binlog.999999", "binlog.1000000", "binlog.1000001"]),
            SegmentOrder::Discovery,
        );
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[2].destination_name, "r.000003");
    }

    #[test]
    fn test_index_render_and_first() {
        let plan = plan_segments("r", names(&["a.000009", "a.000004"]), SegmentOrder::Discovery);
        let index = LogIndex::from_segments(&plan);
        assert_eq!(index.render(), "r.000001\nr.000002\n");
        assert_eq!(index.first(), Some("r.000001"));
    }

    #[test]
    fn test_index_persist_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.index");
        let plan = plan_segments("r", names(&["a.000001"]), SegmentOrder::Discovery);
        LogIndex::from_segments(&plan).persist(&path).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "r.000001\n");
        assert!(!dir.path().join("relay.index.tmp").exists());
    }
}
