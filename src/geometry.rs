//! Problem sizes, block shapes and launch geometry
//!
//! The grid covers the output by ceiling division, so units past the
//! right and bottom edges exist but do nothing.

use std::fmt;

use blocktune_gpu::driver::LaunchConfig;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrialError};

/// GEMM extents: A is M×K, B is K×N, C is M×N
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProblemSize {
    /// Rows of A and C
    pub m: u32,
    /// Columns of B and C
    pub n: u32,
    /// Columns of A, rows of B
    pub k: u32,
}

impl Default for ProblemSize {
    fn default() -> Self {
        Self {
            m: 64,
            n: 64,
            k: 64,
        }
    }
}

impl ProblemSize {
    /// Validated problem size
    ///
    /// # Errors
    ///
    /// Returns `InvalidProblemSize` if any extent is zero or a buffer's byte
    /// size does not fit in `usize`.
    pub fn new(m: u32, n: u32, k: u32) -> Result<Self> {
        let size = Self { m, n, k };
        size.validate()?;
        Ok(size)
    }

    /// Square problem
    ///
    /// # Errors
    ///
    /// Same as [`ProblemSize::new`].
    pub fn square(dim: u32) -> Result<Self> {
        Self::new(dim, dim, dim)
    }

    /// Check extents and byte sizes
    ///
    /// # Errors
    ///
    /// Same as [`ProblemSize::new`].
    pub fn validate(&self) -> Result<()> {
        if self.m == 0 || self.n == 0 || self.k == 0 {
            return Err(self.invalid("every extent must be at least 1"));
        }
        for (rows, cols) in [(self.m, self.k), (self.k, self.n), (self.m, self.n)] {
            (rows as usize)
                .checked_mul(cols as usize)
                .and_then(|len| len.checked_mul(std::mem::size_of::<f32>()))
                .ok_or_else(|| self.invalid("buffer size overflows usize"))?;
        }
        Ok(())
    }

    fn invalid(&self, reason: &str) -> TrialError {
        TrialError::InvalidProblemSize {
            m: self.m,
            n: self.n,
            k: self.k,
            reason: reason.to_string(),
        }
    }

    /// Elements in A
    #[must_use]
    pub fn a_len(&self) -> usize {
        self.m as usize * self.k as usize
    }

    /// Elements in B
    #[must_use]
    pub fn b_len(&self) -> usize {
        self.k as usize * self.n as usize
    }

    /// Elements in C
    #[must_use]
    pub fn c_len(&self) -> usize {
        self.m as usize * self.n as usize
    }
}

impl fmt::Display for ProblemSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.m, self.n, self.k)
    }
}

/// 2-D thread-block extent; x runs along columns of C, y along rows
///
/// Deserializing goes through [`BlockShape::new`], so zero extents are
/// rejected there too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawBlockShape")]
pub struct BlockShape {
    /// Units per block along x
    pub x: u32,
    /// Units per block along y
    pub y: u32,
}

impl BlockShape {
    /// Block shape from caller-supplied signed extents
    ///
    /// # Errors
    ///
    /// Returns `InvalidBlockShape` if either extent is zero, negative or
    /// larger than `u32::MAX`. Values are never clamped.
    pub fn new(x: i64, y: i64) -> Result<Self> {
        match (u32::try_from(x), u32::try_from(y)) {
            (Ok(bx), Ok(by)) if bx > 0 && by > 0 => Ok(Self { x: bx, y: by }),
            _ => Err(TrialError::InvalidBlockShape { x, y }),
        }
    }

    /// Check a shape built from its public fields
    ///
    /// # Errors
    ///
    /// Returns `InvalidBlockShape` if either extent is zero.
    pub fn validate(&self) -> Result<()> {
        if self.x == 0 || self.y == 0 {
            return Err(TrialError::InvalidBlockShape {
                x: i64::from(self.x),
                y: i64::from(self.y),
            });
        }
        Ok(())
    }

    /// Units in one block
    #[must_use]
    pub fn threads(&self) -> u64 {
        u64::from(self.x) * u64::from(self.y)
    }
}

#[derive(Deserialize)]
struct RawBlockShape {
    x: i64,
    y: i64,
}

impl TryFrom<RawBlockShape> for BlockShape {
    type Error = TrialError;

    fn try_from(raw: RawBlockShape) -> Result<Self> {
        Self::new(raw.x, raw.y)
    }
}

impl fmt::Display for BlockShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.x, self.y)
    }
}

/// Grid extent in blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridShape {
    /// Blocks along x (columns)
    pub x: u32,
    /// Blocks along y (rows)
    pub y: u32,
}

/// Block shape plus the grid derived from it for one problem size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchGeometry {
    /// Block extent
    pub block: BlockShape,
    /// Grid extent
    pub grid: GridShape,
    /// Problem the grid covers
    pub problem: ProblemSize,
}

impl LaunchGeometry {
    /// `grid_x = ceil(N / block_x)`, `grid_y = ceil(M / block_y)`
    ///
    /// # Panics
    ///
    /// Panics if either block extent is zero; see [`BlockShape::validate`].
    #[must_use]
    pub fn derive(problem: ProblemSize, block: BlockShape) -> Self {
        let grid = GridShape {
            x: problem.n.div_ceil(block.x),
            y: problem.m.div_ceil(block.y),
        };
        Self {
            block,
            grid,
            problem,
        }
    }

    /// Units launched in total
    #[must_use]
    pub fn total_units(&self) -> u64 {
        u64::from(self.grid.x) * u64::from(self.grid.y) * self.block.threads()
    }

    /// Units whose coordinate lies inside C
    #[must_use]
    pub fn active_units(&self) -> u64 {
        self.problem.c_len() as u64
    }

    /// Over-provisioned units that perform no write
    #[must_use]
    pub fn idle_units(&self) -> u64 {
        self.total_units() - self.active_units()
    }

    /// Whether the grid reaches every row and column of C
    #[must_use]
    pub fn covers(&self) -> bool {
        u64::from(self.grid.x) * u64::from(self.block.x) >= u64::from(self.problem.n)
            && u64::from(self.grid.y) * u64::from(self.block.y) >= u64::from(self.problem.m)
    }

    /// Driver launch configuration
    #[must_use]
    pub fn to_launch_config(&self) -> LaunchConfig {
        LaunchConfig::grid_2d(self.grid.x, self.grid.y, self.block.x, self.block.y)
    }
}

impl fmt::Display for LaunchGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "grid {}x{} of block {}",
            self.grid.x, self.grid.y, self.block
        )
    }
}
