#![allow(dead_code)]

use std::thread;
use std::time::Duration;

use fortressfinder::oracle::TableOracleFactory;
use fortressfinder::{
    BlockPos, Oracle, OracleError, OracleFactory, OracleParams, Piece, PieceKind, RegionCoord,
    Seed, StructureHandle,
};

pub const PARAMS: OracleParams = OracleParams {
    alignment_unit: 19,
    region_blocks: 432,
};

const U: i32 = 19;

fn crossings(origin: (i32, i32), offsets: &[(i32, i32)]) -> Vec<Piece> {
    offsets
        .iter()
        .map(|&(dx, dz)| {
            Piece::new(
                PieceKind::Crossing,
                BlockPos::new(origin.0 + dx * U, 64, origin.1 + dz * U),
            )
        })
        .collect()
}

/// Corner of `region` in blocks.
pub fn region_origin(region: RegionCoord) -> (i32, i32) {
    (region.rx * PARAMS.region_blocks, region.rz * PARAMS.region_blocks)
}

pub fn quad_at(region: RegionCoord) -> Vec<Piece> {
    crossings(region_origin(region), &[(0, 0), (1, 0), (0, 1), (1, 1)])
}

pub fn t_shape_at(region: RegionCoord) -> Vec<Piece> {
    crossings(region_origin(region), &[(0, 0), (1, 0), (2, 0), (0, 1)])
}

pub fn l_shape_at(region: RegionCoord) -> Vec<Piece> {
    crossings(region_origin(region), &[(0, 0), (1, 0), (0, 1)])
}

pub fn line_at(region: RegionCoord) -> Vec<Piece> {
    let mut pieces = crossings(region_origin(region), &[(0, 0), (1, 0), (2, 0)]);
    pieces.push(Piece::new(
        PieceKind::Corridor,
        BlockPos::new(region_origin(region).0 + 5, 64, region_origin(region).1),
    ));
    pieces
}

/// A world for `seed` with one cluster of each kind scattered over
/// `[-radius, radius]²`, plus an unviable structure that must be ignored.
pub fn scattered_world(seed: Seed, radius: i32) -> TableOracleFactory {
    let mut factory = TableOracleFactory::new(PARAMS);
    add_scattered(&mut factory, seed, radius);
    factory
}

pub fn add_scattered(factory: &mut TableOracleFactory, seed: Seed, radius: i32) {
    let r = radius;
    let layouts: [(RegionCoord, fn(RegionCoord) -> Vec<Piece>); 6] = [
        (RegionCoord::new(-r, -r), quad_at),
        (RegionCoord::new(r, r), quad_at),
        (RegionCoord::new(0, 1), t_shape_at),
        (RegionCoord::new(-1, r), l_shape_at),
        (RegionCoord::new(r, 0), line_at),
        (RegionCoord::new(1, -1), quad_at),
    ];
    for (region, build) in layouts {
        let (x, z) = region_origin(region);
        factory.insert(seed, region, BlockPos::new(x, 64, z), build(region));
    }
    let (x, z) = region_origin(RegionCoord::new(0, -1));
    factory.insert_unviable(seed, RegionCoord::new(0, -1), BlockPos::new(x, 64, z));
}

/// Wraps a factory so every placement query takes at least `delay`.
pub struct SlowFactory<F> {
    pub inner: F,
    pub delay: Duration,
}

impl<F: OracleFactory> OracleFactory for SlowFactory<F> {
    type Oracle = SlowOracle<F::Oracle>;

    fn params(&self) -> OracleParams {
        self.inner.params()
    }

    fn create(&self) -> Result<Self::Oracle, OracleError> {
        Ok(SlowOracle {
            inner: self.inner.create()?,
            delay: self.delay,
        })
    }
}

pub struct SlowOracle<O> {
    inner: O,
    delay: Duration,
}

impl<O: Oracle> Oracle for SlowOracle<O> {
    fn set_seed(&mut self, seed: Seed) -> Result<(), OracleError> {
        self.inner.set_seed(seed)
    }

    fn structure_position(
        &mut self,
        seed: Seed,
        region: RegionCoord,
    ) -> Result<Option<StructureHandle>, OracleError> {
        thread::sleep(self.delay);
        self.inner.structure_position(seed, region)
    }

    fn is_viable(&mut self, handle: &StructureHandle) -> Result<bool, OracleError> {
        self.inner.is_viable(handle)
    }

    fn pieces(
        &mut self,
        seed: Seed,
        handle: &StructureHandle,
        out: &mut Vec<Piece>,
    ) -> Result<(), OracleError> {
        self.inner.pieces(seed, handle, out)
    }
}

/// Results as a sorted list of `(seed, x, z, pattern code)` for comparisons.
pub fn keys(results: &[fortressfinder::ClusterResult]) -> Vec<(Seed, i32, i32, u8)> {
    let mut keys: Vec<_> = results
        .iter()
        .map(|r| (r.seed(), r.center().x, r.center().z, r.pattern().code()))
        .collect();
    keys.sort();
    keys
}
