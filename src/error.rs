use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Fatal faults reported by a world-generation oracle.
///
/// "No structure here" is never an error; see [`crate::oracle::Oracle`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OracleError {
    #[error("不支持的版本 / unsupported generator version: {0}")]
    UnsupportedVersion(String),
    #[error("生成器内部错误 / generator invariant violated: {0}")]
    Internal(String),
}

/// Errors surfaced to whoever starts or drives a scan.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("种子无效 / invalid seed text {0:?}")]
    InvalidSeed(String),
    #[error("半径必须大于 0 / radius must be positive, got {0}")]
    InvalidRadius(i64),
    #[error("线程数必须至少为 1 / thread count must be at least 1, got {0}")]
    InvalidThreads(i64),
    #[error("检查点间隔必须大于 0 / checkpoint interval must be positive")]
    InvalidInterval,
    #[error("未知取值 / unknown {field} value {value:?}")]
    UnknownOption { field: &'static str, value: String },
    #[error("无法创建线程池 / failed to build worker pool: {0}")]
    WorkerPool(String),
    #[error(transparent)]
    Oracle(#[from] OracleError),
}

/// Persistence failures. These never stop a running scan.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("读写失败 / i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("状态编码失败 / failed to encode scan state: {0}")]
    Encode(#[from] toml::ser::Error),
    #[error("状态解析失败 / failed to decode scan state in {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("结果行无效 / malformed result record on line {line}: {text:?}")]
    MalformedRecord { line: usize, text: String },
}

impl CheckpointError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CheckpointError::Io {
            path: path.into(),
            source,
        }
    }
}
