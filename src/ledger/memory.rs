//! In-memory sheet backend for dry runs and tests.

use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use super::{SheetClient, SheetRow};

/// Row-major grid of cells; `grid[0]` is sheet row 1. Cheap locking is fine
/// here: no await point ever holds the mutex.
#[derive(Debug, Default)]
pub struct MemorySheet {
    grid: Mutex<Vec<Vec<String>>>,
    highlights: Mutex<Vec<(u32, u32)>>,
}

impl MemorySheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from literal rows, row 1 first.
    pub fn from_rows(rows: &[&[&str]]) -> Self {
        let grid = rows
            .iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect();
        Self {
            grid: Mutex::new(grid),
            highlights: Mutex::new(Vec::new()),
        }
    }

    pub fn snapshot(&self) -> Vec<Vec<String>> {
        self.grid.lock().expect("sheet lock").clone()
    }

    pub fn highlighted(&self) -> Vec<(u32, u32)> {
        self.highlights.lock().expect("sheet lock").clone()
    }

    pub fn cell(&self, row: u32, col: u32) -> String {
        let grid = self.grid.lock().expect("sheet lock");
        grid.get(row as usize - 1)
            .and_then(|r| r.get(col as usize - 1))
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl SheetClient for MemorySheet {
    async fn rows(&self) -> Result<Vec<SheetRow>> {
        let grid = self.grid.lock().expect("sheet lock");
        Ok(grid
            .iter()
            .enumerate()
            .skip(1) // row 1 is the header row
            .map(|(i, row)| SheetRow {
                index: i as u32 + 1,
                target: row.get(1).cloned().unwrap_or_default(),
                query: row.get(2).cloned().unwrap_or_default(),
            })
            .collect())
    }

    async fn header_row(&self) -> Result<Vec<String>> {
        let grid = self.grid.lock().expect("sheet lock");
        Ok(grid.first().cloned().unwrap_or_default())
    }

    async fn read_column(&self, col: u32) -> Result<Vec<String>> {
        let grid = self.grid.lock().expect("sheet lock");
        Ok(grid
            .iter()
            .map(|row| row.get(col as usize - 1).cloned().unwrap_or_default())
            .collect())
    }

    async fn insert_column(&self, col: u32) -> Result<()> {
        let mut grid = self.grid.lock().expect("sheet lock");
        let idx = col as usize - 1;
        for row in grid.iter_mut() {
            if row.len() < idx {
                row.resize(idx, String::new());
            }
            row.insert(idx, String::new());
        }
        Ok(())
    }

    async fn delete_column(&self, col: u32) -> Result<()> {
        let mut grid = self.grid.lock().expect("sheet lock");
        let idx = col as usize - 1;
        for row in grid.iter_mut() {
            if idx < row.len() {
                row.remove(idx);
            }
        }
        Ok(())
    }

    async fn write_cell(&self, row: u32, col: u32, value: &str) -> Result<()> {
        let mut grid = self.grid.lock().expect("sheet lock");
        let (r, c) = (row as usize - 1, col as usize - 1);
        if grid.len() <= r {
            grid.resize(r + 1, Vec::new());
        }
        if grid[r].len() <= c {
            grid[r].resize(c + 1, String::new());
        }
        grid[r][c] = value.to_string();
        Ok(())
    }

    async fn highlight_cell(&self, row: u32, col: u32) -> Result<()> {
        self.highlights.lock().expect("sheet lock").push((row, col));
        Ok(())
    }
}
