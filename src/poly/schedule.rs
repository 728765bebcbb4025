//! Schedule trees.
//!
//! A schedule tree partitions the iteration domain (filter / sequence /
//! set), assigns partial orders (band) and annotates (mark / context). The
//! AST builder materializes it into loop nests.

use super::set::Set;

/// What a band member contributes to the loop nest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRole {
    /// A plain loop over the dimension's full range.
    Point,
    /// The tile loop: steps by the tile size over the original range.
    TileLoop(i64),
    /// The zero-based point loop inside a tile of the given size.
    TilePoint(i64),
}

/// One dimension of a band.
#[derive(Debug, Clone, PartialEq)]
pub struct BandMember {
    /// Name of the source domain dimension this member schedules.
    pub dim: String,
    pub role: MemberRole,
    pub coincident: bool,
    /// Expand this member into its constant-count copies at AST build.
    pub unroll: bool,
}

impl BandMember {
    pub fn point(dim: impl Into<String>) -> Self {
        BandMember {
            dim: dim.into(),
            role: MemberRole::Point,
            coincident: false,
            unroll: false,
        }
    }

    pub fn with_role(dim: impl Into<String>, role: MemberRole) -> Self {
        BandMember {
            dim: dim.into(),
            role,
            coincident: false,
            unroll: false,
        }
    }
}

/// AST-build options attached to a band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BandOptions {
    /// Emit full and partial tiles as separate loop nests.
    pub separate: bool,
}

/// A contiguous group of schedule dimensions tiled and permuted together.
#[derive(Debug, Clone, PartialEq)]
pub struct Band {
    pub members: Vec<BandMember>,
    pub permutable: bool,
    pub options: BandOptions,
    pub child: Box<ScheduleTree>,
}

impl Band {
    /// A permutable band of plain point loops over `dims`.
    pub fn over_dims<I, S>(dims: I, child: ScheduleTree) -> Band
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Band {
            members: dims.into_iter().map(BandMember::point).collect(),
            permutable: true,
            options: BandOptions::default(),
            child: Box::new(child),
        }
    }

    pub fn member_index(&self, dim: &str) -> Option<usize> {
        self.members.iter().position(|m| m.dim == dim)
    }
}

/// Schedule tree nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleTree {
    /// The root: the union of the stage domains.
    Domain {
        domain: Vec<Set>,
        child: Box<ScheduleTree>,
    },
    /// Ordered branches.
    Sequence { children: Vec<ScheduleTree> },
    /// Unordered branches.
    SetNode { children: Vec<ScheduleTree> },
    /// Restrict the subtree to the named stages (kept in creation order).
    Filter {
        stages: Vec<String>,
        child: Box<ScheduleTree>,
    },
    Band(Band),
    /// A free annotation.
    Mark {
        id: String,
        child: Box<ScheduleTree>,
    },
    /// Extra context constraints (unused by the rectangular domains here).
    Context {
        context: Set,
        child: Box<ScheduleTree>,
    },
    /// An extension node (kept for completeness of the node set).
    Extension { child: Box<ScheduleTree> },
    Leaf,
}

impl ScheduleTree {
    pub fn domain(domain: Vec<Set>, child: ScheduleTree) -> ScheduleTree {
        ScheduleTree::Domain {
            domain,
            child: Box::new(child),
        }
    }

    pub fn filter(stages: Vec<String>, child: ScheduleTree) -> ScheduleTree {
        ScheduleTree::Filter {
            stages,
            child: Box::new(child),
        }
    }

    pub fn mark(id: impl Into<String>, child: ScheduleTree) -> ScheduleTree {
        ScheduleTree::Mark {
            id: id.into(),
            child: Box::new(child),
        }
    }

    /// Number of band nodes in the subtree (a structural test helper).
    pub fn band_count(&self) -> usize {
        match self {
            ScheduleTree::Domain { child, .. }
            | ScheduleTree::Filter { child, .. }
            | ScheduleTree::Mark { child, .. }
            | ScheduleTree::Context { child, .. }
            | ScheduleTree::Extension { child } => child.band_count(),
            ScheduleTree::Sequence { children } | ScheduleTree::SetNode { children } => {
                children.iter().map(ScheduleTree::band_count).sum()
            }
            ScheduleTree::Band(band) => 1 + band.child.band_count(),
            ScheduleTree::Leaf => 0,
        }
    }
}
