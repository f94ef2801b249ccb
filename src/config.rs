use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::checkpoint::PersistedSettings;
use crate::error::ScanError;
use crate::model::Seed;
use crate::scheduler::Partition;

pub const DEFAULT_CONFIG: &str = r#"# Fortressfinder 配置 / Configuration

[scan]
# 模式: "area" 单种子区域扫描, "sweep" 种子搜索 / "area" single-seed scan, "sweep" seed sweep
mode = "area"
# 世界种子（area 模式）/ world seed (area mode)
seed = "0"
# 区域半径（扫描 [-radius, radius]² 个区域）/ region radius
radius = 15000
# 线程数，0 表示全部核心 / worker threads, 0 = all cores
threads = 0
# 低优先级（每个单元后让出线程）/ yield between work units
low_priority = true
# 行分配: "shared" 共享游标, "sliced" 每线程固定分段 / row partitioning
partition = "shared"

[sweep]
# 距离原点的最大方块距离 / max distance from origin in blocks
radius_blocks = 1000
# 可选的结束种子（不含）/ optional exclusive end seed
# end_seed = 1000000

[oracle]
# 生成器版本 / generator version
version = "1.21"

[output]
# 扫描状态文件 / scan state file
state_file = "scan_state.toml"
# 结果文件 / results file
results_file = "results.dat"
# 检查点间隔（秒）/ checkpoint interval in seconds
checkpoint_secs = 5
# 每种类型显示的结果数 / results listed per pattern
show_per_pattern = 20
"#;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScanKind {
    #[default]
    Area,
    Sweep,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub mode: ScanKind,
    pub seed: String,
    pub radius: i64,
    pub threads: i64,
    pub low_priority: bool,
    pub partition: String,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            mode: ScanKind::Area,
            seed: "0".to_string(),
            radius: 15_000,
            threads: 0,
            low_priority: true,
            partition: "shared".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub radius_blocks: i64,
    pub end_seed: Option<Seed>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            radius_blocks: 1000,
            end_seed: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub version: String,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            version: "1.21".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub state_file: String,
    pub results_file: String,
    pub checkpoint_secs: u64,
    pub show_per_pattern: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            state_file: "scan_state.toml".to_string(),
            results_file: "results.dat".to_string(),
            checkpoint_secs: 5,
            show_per_pattern: 20,
        }
    }
}

/// Checked scan parameters, normally produced by [`AppConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSettings {
    pub kind: ScanKind,
    pub seed_text: String,
    pub seed: Seed,
    pub radius: i32,
    pub threads: usize,
    pub low_priority: bool,
    pub partition: Partition,
    pub sweep_radius_blocks: i32,
    pub end_seed: Option<Seed>,
    pub checkpoint_every: Duration,
}

impl ScanSettings {
    pub fn persisted(&self) -> PersistedSettings {
        PersistedSettings {
            mode: self.kind,
            seed: self.seed_text.clone(),
            radius: i64::from(self.radius),
            threads: self.threads,
            low_priority: self.low_priority,
            sweep_radius_blocks: i64::from(self.sweep_radius_blocks),
        }
    }

    /// Builder for callers that do not go through a config file. Unlike
    /// `threads = 0` in a config, a zero thread count is an error here.
    pub fn area(seed_text: &str, radius: i64, threads: usize) -> Result<Self, ScanError> {
        if threads == 0 {
            return Err(ScanError::InvalidThreads(0));
        }
        let mut cfg = AppConfig::default();
        cfg.scan.mode = ScanKind::Area;
        cfg.scan.seed = seed_text.to_string();
        cfg.scan.radius = radius;
        cfg.scan.threads = threads as i64;
        cfg.scan.low_priority = false;
        cfg.validate()
    }

    pub fn sweep(
        radius_blocks: i64,
        end_seed: Option<Seed>,
        threads: usize,
    ) -> Result<Self, ScanError> {
        if threads == 0 {
            return Err(ScanError::InvalidThreads(0));
        }
        let mut cfg = AppConfig::default();
        cfg.scan.mode = ScanKind::Sweep;
        cfg.scan.threads = threads as i64;
        cfg.scan.low_priority = false;
        cfg.sweep.radius_blocks = radius_blocks;
        cfg.sweep.end_seed = end_seed;
        cfg.validate()
    }
}

pub fn parse_seed(text: &str) -> Result<Seed, ScanError> {
    text.trim()
        .parse::<i64>()
        .map_err(|_| ScanError::InvalidSeed(text.to_string()))
}

fn parse_partition(text: &str) -> Result<Partition, ScanError> {
    match text.trim().to_ascii_lowercase().as_str() {
        "shared" => Ok(Partition::Shared),
        "sliced" => Ok(Partition::Sliced),
        _ => Err(ScanError::UnknownOption {
            field: "scan.partition",
            value: text.to_string(),
        }),
    }
}

fn positive_i32(value: i64) -> Result<i32, ScanError> {
    if value <= 0 {
        return Err(ScanError::InvalidRadius(value));
    }
    i32::try_from(value).map_err(|_| ScanError::InvalidRadius(value))
}

impl AppConfig {
    /// Reject anything that would make a scan meaningless before it starts.
    pub fn validate(&self) -> Result<ScanSettings, ScanError> {
        let threads = match self.scan.threads {
            0 => num_cpus::get().max(1),
            n if n < 0 => return Err(ScanError::InvalidThreads(n)),
            n => usize::try_from(n).map_err(|_| ScanError::InvalidThreads(n))?,
        };
        let seed = match self.scan.mode {
            ScanKind::Area => parse_seed(&self.scan.seed)?,
            // Unused by the sweep and not required to parse.
            ScanKind::Sweep => parse_seed(&self.scan.seed).unwrap_or_default(),
        };
        let radius = match self.scan.mode {
            ScanKind::Area => positive_i32(self.scan.radius)?,
            ScanKind::Sweep => positive_i32(self.scan.radius).unwrap_or(1),
        };
        let sweep_radius_blocks = match self.scan.mode {
            ScanKind::Sweep => positive_i32(self.sweep.radius_blocks)?,
            ScanKind::Area => positive_i32(self.sweep.radius_blocks).unwrap_or(1),
        };
        if self.output.checkpoint_secs == 0 {
            return Err(ScanError::InvalidInterval);
        }
        Ok(ScanSettings {
            kind: self.scan.mode,
            seed_text: self.scan.seed.trim().to_string(),
            seed,
            radius,
            threads,
            low_priority: self.scan.low_priority,
            partition: parse_partition(&self.scan.partition)?,
            sweep_radius_blocks,
            end_seed: self.sweep.end_seed,
            checkpoint_every: Duration::from_secs(self.output.checkpoint_secs),
        })
    }
}
