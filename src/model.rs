use std::fmt;
use std::hash::{Hash, Hasher};

/// One procedurally generated world.
pub type Seed = i64;

/// Coarse grid cell holding at most one structure per seed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionCoord {
    pub rx: i32,
    pub rz: i32,
}

impl RegionCoord {
    pub fn new(rx: i32, rz: i32) -> Self {
        Self { rx, rz }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

/// Alignment anchor taken from a structure's crossing pieces.
pub type Crossing = BlockPos;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PatternType {
    Quad,
    TShape,
    LShape,
    Triple,
}

impl PatternType {
    /// Classification precedence order, also the listing order.
    pub const ALL: [PatternType; 4] = [
        PatternType::Quad,
        PatternType::TShape,
        PatternType::LShape,
        PatternType::Triple,
    ];

    /// Stable code used by the results file.
    pub fn code(self) -> u8 {
        match self {
            PatternType::Quad => 0,
            PatternType::TShape => 1,
            PatternType::LShape => 2,
            PatternType::Triple => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(PatternType::Quad),
            1 => Some(PatternType::TShape),
            2 => Some(PatternType::LShape),
            3 => Some(PatternType::Triple),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PatternType::Quad => "Quads (2x2)",
            PatternType::TShape => "T-Shapes",
            PatternType::LShape => "L-Shapes",
            PatternType::Triple => "Triple Lines",
        }
    }
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A discovered cluster.
///
/// Identity is `(seed, center, pattern)`; `distance_squared` is derived from
/// the center when the value is built and never changes afterwards.
#[derive(Clone, Copy, Debug)]
pub struct ClusterResult {
    pub(crate) seed: Seed,
    pub(crate) center: BlockPos,
    pub(crate) distance_squared: i64,
    pub(crate) pattern: PatternType,
    pub(crate) permanent: bool,
}

impl ClusterResult {
    pub fn new(seed: Seed, center: BlockPos, pattern: PatternType, permanent: bool) -> Self {
        let x = i64::from(center.x);
        let z = i64::from(center.z);
        Self {
            seed,
            center,
            distance_squared: x * x + z * z,
            pattern,
            permanent,
        }
    }

    pub fn seed(&self) -> Seed {
        self.seed
    }

    pub fn center(&self) -> BlockPos {
        self.center
    }

    pub fn distance_squared(&self) -> i64 {
        self.distance_squared
    }

    pub fn pattern(&self) -> PatternType {
        self.pattern
    }

    pub fn is_permanent(&self) -> bool {
        self.permanent
    }

    /// Horizontal distance from the origin, rounded down.
    pub fn distance(&self) -> u64 {
        isqrt(self.distance_squared.max(0) as u64)
    }

    /// Teleport point two blocks above the crossing deck.
    pub fn teleport_command(&self) -> String {
        format!(
            "/tp {} {} {}",
            self.center.x,
            self.center.y + 2,
            self.center.z
        )
    }
}

impl PartialEq for ClusterResult {
    fn eq(&self, other: &Self) -> bool {
        self.seed == other.seed && self.center == other.center && self.pattern == other.pattern
    }
}

impl Eq for ClusterResult {}

impl Hash for ClusterResult {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.seed.hash(state);
        self.center.hash(state);
        self.pattern.hash(state);
    }
}

fn isqrt(n: u64) -> u64 {
    if n < 2 {
        return n;
    }
    let mut x = (n as f64).sqrt() as u64;
    while x * x > n {
        x -= 1;
    }
    while (x + 1) * (x + 1) <= n {
        x += 1;
    }
    x
}
