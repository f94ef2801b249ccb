//! Durable scan state: cursors and settings as TOML, results as text records.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::ScanKind;
use crate::error::CheckpointError;
use crate::model::{BlockPos, ClusterResult, PatternType};

const RESULTS_HEADER: &str = "# seed x y z distSq pattern permanent";

/// Settings needed to resume a scan exactly as it was.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedSettings {
    pub mode: ScanKind,
    pub seed: String,
    pub radius: i64,
    pub threads: usize,
    pub low_priority: bool,
    pub sweep_radius_blocks: i64,
}

impl Default for PersistedSettings {
    fn default() -> Self {
        Self {
            mode: ScanKind::Area,
            seed: "0".to_string(),
            radius: 15_000,
            threads: 1,
            low_priority: true,
            sweep_radius_blocks: 1000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ScanCheckpoint {
    /// Next unclaimed row index of the area scan.
    pub area_cursor: i64,
    /// Seed and radius `area_cursor` counts rows of. A radius of 0 means no
    /// area scan has been recorded.
    pub area_seed: i64,
    pub area_radius: i64,
    /// Next seed of the sweep.
    pub next_seed: i64,
    /// Settings of whichever run wrote this checkpoint last.
    pub settings: PersistedSettings,
}

impl ScanCheckpoint {
    /// Whether `area_cursor` belongs to an area scan of `seed` over `radius`.
    pub fn area_matches(&self, seed: i64, radius: i32) -> bool {
        self.area_radius == i64::from(radius) && self.area_seed == seed
    }

    /// Point the area cursor at a fresh scan of `seed` over `radius`.
    pub fn restart_area(&mut self, seed: i64, radius: i32) {
        self.area_cursor = 0;
        self.area_seed = seed;
        self.area_radius = i64::from(radius);
    }
}

#[derive(Clone, Debug)]
pub struct CheckpointStore {
    state_path: PathBuf,
    results_path: PathBuf,
}

impl CheckpointStore {
    pub fn new(state_path: impl Into<PathBuf>, results_path: impl Into<PathBuf>) -> Self {
        Self {
            state_path: state_path.into(),
            results_path: results_path.into(),
        }
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    pub fn results_path(&self) -> &Path {
        &self.results_path
    }

    pub fn save(
        &self,
        state: &ScanCheckpoint,
        results: &[ClusterResult],
    ) -> Result<(), CheckpointError> {
        let text = toml::to_string(state)?;
        write_replacing(&self.state_path, |w| w.write_all(text.as_bytes()))?;
        write_replacing(&self.results_path, |w| {
            writeln!(w, "{RESULTS_HEADER}")?;
            for r in results {
                writeln!(w, "{}", format_record(r))?;
            }
            Ok(())
        })
    }

    /// `Ok(None)` when no state file exists yet.
    pub fn load_state(&self) -> Result<Option<ScanCheckpoint>, CheckpointError> {
        let text = match fs::read_to_string(&self.state_path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CheckpointError::io(&self.state_path, e)),
        };
        toml::from_str(&text)
            .map(Some)
            .map_err(|source| CheckpointError::Decode {
                path: self.state_path.clone(),
                source,
            })
    }

    /// Read every well-formed record; malformed lines are logged and skipped.
    pub fn load_results(&self) -> Result<Vec<ClusterResult>, CheckpointError> {
        let file = match File::open(&self.results_path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CheckpointError::io(&self.results_path, e)),
        };
        let mut results = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| CheckpointError::io(&self.results_path, e))?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            match parse_record(idx + 1, trimmed) {
                Ok(r) => results.push(r),
                Err(e) => warn!("{}: {e}", self.results_path.display()),
            }
        }
        Ok(results)
    }

    /// Load whatever is usable, falling back to a fresh state on failure.
    pub fn load_or_default(&self) -> (ScanCheckpoint, Vec<ClusterResult>) {
        let state = match self.load_state() {
            Ok(Some(state)) => {
                info!(
                    "已恢复状态 / resumed state from {} (area cursor {}, next seed {})",
                    self.state_path.display(),
                    state.area_cursor,
                    state.next_seed
                );
                state
            }
            Ok(None) => ScanCheckpoint::default(),
            Err(e) => {
                warn!("{e}; 使用默认状态 / starting from defaults");
                ScanCheckpoint::default()
            }
        };
        let results = self.load_results().unwrap_or_else(|e| {
            warn!("{e}; 结果清空 / starting with no results");
            Vec::new()
        });
        (state, results)
    }
}

fn write_replacing<F>(path: &Path, body: F) -> Result<(), CheckpointError>
where
    F: FnOnce(&mut BufWriter<File>) -> std::io::Result<()>,
{
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| CheckpointError::io(parent, e))?;
        }
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let file = File::create(&tmp).map_err(|e| CheckpointError::io(&tmp, e))?;
    let mut writer = BufWriter::new(file);
    body(&mut writer)
        .and_then(|_| writer.flush())
        .map_err(|e| CheckpointError::io(&tmp, e))?;
    drop(writer);
    fs::rename(&tmp, path).map_err(|e| CheckpointError::io(path, e))
}

fn format_record(r: &ClusterResult) -> String {
    let c = r.center();
    format!(
        "{} {} {} {} {} {} {}",
        r.seed(),
        c.x,
        c.y,
        c.z,
        r.distance_squared(),
        r.pattern().code(),
        u8::from(r.is_permanent())
    )
}

fn parse_record(line: usize, text: &str) -> Result<ClusterResult, CheckpointError> {
    let malformed = || CheckpointError::MalformedRecord {
        line,
        text: text.to_string(),
    };
    let fields: Vec<&str> = text.split_whitespace().collect();
    if fields.len() != 7 {
        return Err(malformed());
    }
    let seed: i64 = fields[0].parse().map_err(|_| malformed())?;
    let x: i32 = fields[1].parse().map_err(|_| malformed())?;
    let y: i32 = fields[2].parse().map_err(|_| malformed())?;
    let z: i32 = fields[3].parse().map_err(|_| malformed())?;
    // fields[4] is the stored distance; it is always recomputed from the center.
    fields[4].parse::<i64>().map_err(|_| malformed())?;
    let pattern = fields[5]
        .parse::<u8>()
        .ok()
        .and_then(PatternType::from_code)
        .ok_or_else(malformed)?;
    let permanent = match fields[6] {
        "0" => false,
        "1" => true,
        _ => return Err(malformed()),
    };
    Ok(ClusterResult::new(
        seed,
        BlockPos::new(x, y, z),
        pattern,
        permanent,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn area_cursor_is_tied_to_its_seed_and_radius() {
        let mut state = ScanCheckpoint::default();
        assert!(!state.area_matches(0, 15_000));
        state.restart_area(1, 20);
        state.area_cursor = 7;
        assert!(state.area_matches(1, 20));
        assert!(!state.area_matches(2, 20));
        assert!(!state.area_matches(1, 21));

        // A sweep rewrites `settings` but leaves the area fields alone.
        state.settings.mode = ScanKind::Sweep;
        state.settings.seed = "2".into();
        assert!(!state.area_matches(2, 20));
        state.restart_area(2, 20);
        assert_eq!(state.area_cursor, 0);
        assert!(state.area_matches(2, 20));
    }

    #[test]
    fn record_line_matches_layout() {
        let r = ClusterResult::new(-5, BlockPos::new(9, 64, -9), PatternType::TShape, true);
        assert_eq!(format_record(&r), "-5 9 64 -9 162 1 1");
        let back = parse_record(1, "-5 9 64 -9 162 1 1").unwrap();
        assert_eq!(back, r);
        assert!(back.is_permanent());
    }

    #[test]
    fn stored_distance_is_recomputed() {
        let r = parse_record(3, "0 9 64 9 7 0 0").unwrap();
        assert_eq!(r.distance_squared(), 162);
    }

    #[test]
    fn malformed_records_are_rejected() {
        for bad in [
            "0 9 64 9 81 0",
            "0 9 64 9 81 9 0",
            "0 9 64 nine 81 0 0",
            "0 9 64 9 81 0 2",
        ] {
            assert!(matches!(
                parse_record(4, bad),
                Err(CheckpointError::MalformedRecord { line: 4, .. })
            ));
        }
    }
}
