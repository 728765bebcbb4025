//! Schedule-tree rewriters: tile, tile+unroll, interchange, vectorize and
//! the call-once mark.
//!
//! Each transformer walks the tree top-down carrying the current filter
//! set (which statements reach a band) and rewrites the first matching
//! band. Tiling splits a band into a tile-loop band and a point-loop band
//! with `… - tiles` / `… - points` marks between them; the vectorize
//! rewrite adds a dedicated width-sized band pair for the innermost
//! dimension so the later IR pass finds its `vectorize - points` mark.

use log::debug;

use crate::error::CompileError;
use crate::poly::{Band, BandMember, BandOptions, MemberRole, ScheduleTree};

/// Mark inserted above the band of a call-once stage.
pub const CALL_ONCE_MARK: &str = "__call_once__";

/// Insert a `__call_once__` mark above the outermost band of `stage`.
/// The stage must not share its band with other statements.
pub fn insert_call_once_mark(
    tree: ScheduleTree,
    stage: &str,
) -> Result<ScheduleTree, CompileError> {
    let mut applied = false;
    let tree = walk(tree, &mut Vec::new(), &mut |band, active, applied_now| {
        if *applied_now || !active.iter().any(|s| s == stage) {
            return Ok(None);
        }
        if active.len() != 1 {
            return Err(CompileError::schedule(format!(
                "call-once stage '{stage}' must not share a band with other stages"
            )));
        }
        *applied_now = true;
        Ok(Some(ScheduleTree::mark(
            CALL_ONCE_MARK,
            ScheduleTree::Band(band),
        )))
    }, &mut applied)?;
    if !applied {
        return Err(CompileError::schedule(format!(
            "no band found for call-once stage '{stage}'"
        )));
    }
    Ok(tree)
}

/// Swap the members scheduling `dim0` and `dim1` in the band of `stage`.
/// Bands that carry only one of the two dimensions are left alone.
pub fn interchange(
    tree: ScheduleTree,
    stage: &str,
    dim0: &str,
    dim1: &str,
) -> Result<ScheduleTree, CompileError> {
    let mut applied = false;
    let tree = walk(tree, &mut Vec::new(), &mut |mut band, active, applied_now| {
        if *applied_now || !active.iter().any(|s| s == stage) {
            return Ok(None);
        }
        let (Some(p0), Some(p1)) = (band.member_index(dim0), band.member_index(dim1)) else {
            return Ok(None);
        };
        band.members.swap(p0, p1);
        *applied_now = true;
        debug!("interchange {dim0} <-> {dim1} on stage {stage}");
        Ok(Some(ScheduleTree::Band(band)))
    }, &mut applied)?;
    if !applied {
        return Err(CompileError::schedule(format!(
            "interchange of '{dim0}'/'{dim1}' found no band carrying both for stage '{stage}'"
        )));
    }
    Ok(tree)
}

/// Tile the last `sizes.len()` dimensions of the band of `stage`. With
/// `unroll`, the tile separates full and partial tiles and the innermost
/// point loop unrolls.
pub fn tile(
    tree: ScheduleTree,
    stage: &str,
    sizes: &[i64],
    unroll: bool,
) -> Result<ScheduleTree, CompileError> {
    let id = if unroll { "tile-unroll" } else { "tile" };
    let sizes = sizes.to_vec();
    let mut applied = false;
    let tree = walk(tree, &mut Vec::new(), &mut |band, active, applied_now| {
        if *applied_now || !active.iter().any(|s| s == stage) {
            return Ok(None);
        }
        *applied_now = true;
        Ok(Some(tile_band(band, id, &sizes, unroll)?))
    }, &mut applied)?;
    if !applied {
        return Err(CompileError::schedule(format!(
            "no tileable band found for stage '{stage}'"
        )));
    }
    Ok(tree)
}

/// Tile `stage`'s outer dimensions by `outer` and give the innermost
/// dimension a `vectorize`-marked band pair of width `width`.
pub fn vectorize(
    tree: ScheduleTree,
    stage: &str,
    outer: &[i64],
    width: i64,
) -> Result<ScheduleTree, CompileError> {
    let outer = outer.to_vec();
    let mut applied = false;
    let tree = walk(tree, &mut Vec::new(), &mut |band, active, applied_now| {
        if *applied_now || !active.iter().any(|s| s == stage) {
            return Ok(None);
        }
        *applied_now = true;
        Ok(Some(vectorize_band(band, &outer, width)?))
    }, &mut applied)?;
    if !applied {
        return Err(CompileError::schedule(format!(
            "no band found to vectorize for stage '{stage}'"
        )));
    }
    Ok(tree)
}

/// Check a band can be tiled and split it into `Mark(id - tiles)` →
/// tile-loop band → `Mark(id - points)` → point-loop band.
fn tile_band(
    band: Band,
    id: &str,
    sizes: &[i64],
    unroll: bool,
) -> Result<ScheduleTree, CompileError> {
    check_tileable(&band, sizes.len())?;
    let n = band.members.len();
    let first_tiled = n - sizes.len();

    let mut outer_members = Vec::with_capacity(n);
    let mut point_members = Vec::with_capacity(sizes.len());
    for (i, member) in band.members.iter().enumerate() {
        if i < first_tiled {
            outer_members.push(member.clone());
        } else {
            let size = sizes[i - first_tiled];
            outer_members.push(BandMember::with_role(
                member.dim.clone(),
                MemberRole::TileLoop(size),
            ));
            let mut point = BandMember::with_role(member.dim.clone(), MemberRole::TilePoint(size));
            // only the innermost point loop unrolls
            point.unroll = unroll && i + 1 == n;
            point_members.push(point);
        }
    }

    let points = ScheduleTree::Band(Band {
        members: point_members,
        permutable: band.permutable,
        options: BandOptions::default(),
        child: band.child,
    });
    let tiles = ScheduleTree::Band(Band {
        members: outer_members,
        permutable: band.permutable,
        options: BandOptions { separate: unroll },
        child: Box::new(ScheduleTree::mark(format!("{id} - points"), points)),
    });
    Ok(ScheduleTree::mark(format!("{id} - tiles"), tiles))
}

fn vectorize_band(band: Band, outer: &[i64], width: i64) -> Result<ScheduleTree, CompileError> {
    check_tileable(&band, outer.len() + 1)?;
    let n = band.members.len();
    let first_tiled = n - 1 - outer.len();
    let vector_dim = band.members[n - 1].dim.clone();

    // innermost: the vectorize band pair over the last dimension
    let vec_points = ScheduleTree::Band(Band {
        members: vec![BandMember::with_role(
            vector_dim.clone(),
            MemberRole::TilePoint(width),
        )],
        permutable: true,
        options: BandOptions::default(),
        child: band.child,
    });
    let vec_tiles = ScheduleTree::Band(Band {
        members: vec![BandMember::with_role(
            vector_dim,
            MemberRole::TileLoop(width),
        )],
        permutable: true,
        options: BandOptions::default(),
        child: Box::new(ScheduleTree::mark("vectorize - points", vec_points)),
    });
    let mut nest = ScheduleTree::mark("vectorize - tiles", vec_tiles);

    // outer tile sizes apply to the dimensions preceding the last
    if !outer.is_empty() {
        let mut tile_members = Vec::with_capacity(outer.len());
        let mut point_members = Vec::with_capacity(outer.len());
        for (i, size) in outer.iter().enumerate() {
            let dim = band.members[first_tiled + i].dim.clone();
            tile_members.push(BandMember::with_role(dim.clone(), MemberRole::TileLoop(*size)));
            point_members.push(BandMember::with_role(dim, MemberRole::TilePoint(*size)));
        }
        let points = ScheduleTree::Band(Band {
            members: point_members,
            permutable: true,
            options: BandOptions::default(),
            child: Box::new(nest),
        });
        let tiles = ScheduleTree::Band(Band {
            members: tile_members,
            permutable: true,
            options: BandOptions::default(),
            child: Box::new(ScheduleTree::mark("tile - points", points)),
        });
        nest = ScheduleTree::mark("tile - tiles", tiles);
    }

    if first_tiled > 0 {
        nest = ScheduleTree::Band(Band {
            members: band.members[..first_tiled].to_vec(),
            permutable: band.permutable,
            options: BandOptions::default(),
            child: Box::new(nest),
        });
    }
    Ok(nest)
}

fn check_tileable(band: &Band, tiled: usize) -> Result<(), CompileError> {
    if !band.permutable || band.members.is_empty() {
        return Err(CompileError::schedule(
            "band is not tileable: it must be permutable with at least one dimension",
        ));
    }
    if tiled > band.members.len() {
        return Err(CompileError::schedule(format!(
            "cannot tile {tiled} dimensions of a band with {} members",
            band.members.len()
        )));
    }
    if band
        .members
        .iter()
        .any(|m| m.role != MemberRole::Point)
    {
        return Err(CompileError::schedule(
            "band was already tiled; transformations apply once per stage",
        ));
    }
    Ok(())
}

/// Generic top-down walk: rebuild the tree, tracking the active filter
/// set, and let `on_band` replace band nodes.
fn walk<F>(
    tree: ScheduleTree,
    active: &mut Vec<String>,
    on_band: &mut F,
    applied: &mut bool,
) -> Result<ScheduleTree, CompileError>
where
    F: FnMut(Band, &[String], &mut bool) -> Result<Option<ScheduleTree>, CompileError>,
{
    match tree {
        ScheduleTree::Domain { domain, child } => {
            *active = domain.iter().map(|s| s.tuple().to_owned()).collect();
            let child = walk(*child, active, on_band, applied)?;
            Ok(ScheduleTree::domain(domain, child))
        }
        ScheduleTree::Sequence { children } => {
            let mut rebuilt = Vec::with_capacity(children.len());
            for c in children {
                let mut scoped = active.clone();
                rebuilt.push(walk(c, &mut scoped, on_band, applied)?);
            }
            Ok(ScheduleTree::Sequence { children: rebuilt })
        }
        ScheduleTree::SetNode { children } => {
            let mut rebuilt = Vec::with_capacity(children.len());
            for c in children {
                let mut scoped = active.clone();
                rebuilt.push(walk(c, &mut scoped, on_band, applied)?);
            }
            Ok(ScheduleTree::SetNode { children: rebuilt })
        }
        ScheduleTree::Filter { stages, child } => {
            let mut scoped = stages.clone();
            let child = walk(*child, &mut scoped, on_band, applied)?;
            Ok(ScheduleTree::filter(stages, child))
        }
        ScheduleTree::Mark { id, child } => {
            let child = walk(*child, active, on_band, applied)?;
            Ok(ScheduleTree::mark(id, child))
        }
        ScheduleTree::Context { context, child } => {
            let child = walk(*child, active, on_band, applied)?;
            Ok(ScheduleTree::Context {
                context,
                child: Box::new(child),
            })
        }
        ScheduleTree::Extension { child } => {
            let child = walk(*child, active, on_band, applied)?;
            Ok(ScheduleTree::Extension {
                child: Box::new(child),
            })
        }
        ScheduleTree::Band(band) => {
            if let Some(replacement) = on_band(band.clone(), active, applied)? {
                return Ok(replacement);
            }
            let Band {
                members,
                permutable,
                options,
                child,
            } = band;
            let child = walk(*child, active, on_band, applied)?;
            Ok(ScheduleTree::Band(Band {
                members,
                permutable,
                options,
                child: Box::new(child),
            }))
        }
        ScheduleTree::Leaf => Ok(ScheduleTree::Leaf),
    }
}
