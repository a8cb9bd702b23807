//! CUDA Driver Types
//!
//! Type definitions shared by the driver wrappers. Available without the
//! `cuda` feature so launch geometry can be described on any host.

/// CUDA device ordinal
pub type DeviceOrdinal = i32;

/// Launch configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchConfig {
    /// Grid dimensions (blocks)
    pub grid: (u32, u32, u32),
    /// Block dimensions (threads)
    pub block: (u32, u32, u32),
    /// Shared memory per block (bytes)
    pub shared_mem: u32,
}

impl LaunchConfig {
    /// Create a 2D launch configuration
    #[must_use]
    pub const fn grid_2d(grid_x: u32, grid_y: u32, block_x: u32, block_y: u32) -> Self {
        Self {
            grid: (grid_x, grid_y, 1),
            block: (block_x, block_y, 1),
            shared_mem: 0,
        }
    }

    /// Threads per block
    #[must_use]
    pub const fn threads_per_block(&self) -> u64 {
        self.block.0 as u64 * self.block.1 as u64 * self.block.2 as u64
    }

    /// Total threads
    #[must_use]
    pub const fn total_threads(&self) -> u64 {
        let grid_total = self.grid.0 as u64 * self.grid.1 as u64 * self.grid.2 as u64;
        grid_total * self.threads_per_block()
    }
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self::grid_2d(1, 1, 16, 16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_config_2d() {
        let config = LaunchConfig::grid_2d(16, 16, 16, 16);
        assert_eq!(config.grid.2, 1);
        assert_eq!(config.block.2, 1);
        assert_eq!(config.threads_per_block(), 256);
        assert_eq!(config.total_threads(), 16 * 16 * 16 * 16);
    }

    #[test]
    fn test_launch_config_default() {
        let config = LaunchConfig::default();
        assert_eq!(config.grid, (1, 1, 1));
        assert_eq!(config.block, (16, 16, 1));
        assert_eq!(config.shared_mem, 0);
    }

    #[test]
    fn test_total_threads_does_not_overflow_u32() {
        let config = LaunchConfig::grid_2d(65_535, 65_535, 32, 32);
        assert_eq!(config.total_threads(), 65_535u64 * 65_535 * 1024);
    }
}
