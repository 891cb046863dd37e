//! Years × weeks occupancy grid behind the life chart.

/// Row-major grid: one row per year of the lifespan, one column per week.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifeGrid {
    rows: usize,
    columns: usize,
    cells: Vec<bool>,
}

impl LifeGrid {
    /// Marks the first `weeks_lived` cells in reading order.
    ///
    /// Weeks that fall past the last row are dropped, so a life longer than
    /// the assumed lifespan yields a completely filled grid.
    pub fn build(weeks_lived: u64, total_years: u32, weeks_per_year: u32) -> Self {
        let rows = total_years as usize;
        let columns = weeks_per_year as usize;
        let mut cells = vec![false; rows * columns];

        let filled = weeks_lived.min(cells.len() as u64) as usize;
        for cell in &mut cells[..filled] {
            *cell = true;
        }

        Self {
            rows,
            columns,
            cells,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Out-of-range coordinates read as empty.
    pub fn is_filled(&self, row: usize, col: usize) -> bool {
        if row >= self.rows || col >= self.columns {
            return false;
        }
        self.cells[row * self.columns + col]
    }

    pub fn filled_count(&self) -> usize {
        self.cells.iter().filter(|c| **c).count()
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[bool]> {
        // chunks() panics on zero
        self.cells.chunks(self.columns.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_lived_is_empty() {
        let grid = LifeGrid::build(0, 85, 52);
        assert_eq!(grid.rows(), 85);
        assert_eq!(grid.columns(), 52);
        assert_eq!(grid.filled_count(), 0);
    }

    #[test]
    fn whole_lifespan_fills_everything() {
        let grid = LifeGrid::build(85 * 52, 85, 52);
        assert_eq!(grid.filled_count(), 85 * 52);
        assert!(grid.is_filled(84, 51));
    }

    #[test]
    fn overflow_weeks_are_dropped() {
        let grid = LifeGrid::build(85 * 52 + 500, 85, 52);
        assert_eq!(grid.filled_count(), 85 * 52);
        assert_eq!(grid.iter_rows().count(), 85);
        assert!(grid.iter_rows().all(|row| row.iter().all(|c| *c)));
    }

    #[test]
    fn partial_year_wraps_rows() {
        let grid = LifeGrid::build(53, 85, 52);
        assert!(grid.is_filled(0, 51));
        assert!(grid.is_filled(1, 0));
        assert!(!grid.is_filled(1, 1));
        assert!(!grid.is_filled(200, 0));
        assert_eq!(grid.filled_count(), 53);
    }

    #[test]
    fn zero_sized_grid_is_harmless() {
        let grid = LifeGrid::build(10, 0, 52);
        assert_eq!(grid.filled_count(), 0);
        assert_eq!(grid.iter_rows().count(), 0);
    }
}
