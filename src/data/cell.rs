// src/data/cell.rs

use serde::{Deserialize, Serialize};

/// Identity of a cell: `(sheet, row, col)`.
///
/// Rows and columns are zero-based data indices; the header row holding the
/// column names is not counted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellKey {
    pub sheet: String,
    pub row: usize,
    pub col: usize,
}

impl CellKey {
    pub fn new(sheet: impl Into<String>, row: usize, col: usize) -> Self {
        Self {
            sheet: sheet.into(),
            row,
            col,
        }
    }
}

/// Read-only view of one cell plus its metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub sheet: String,
    pub row: usize,
    pub col: usize,
    pub value: Option<String>,
    pub color: Option<String>,
    pub comment: Option<String>,
}

impl Cell {
    /// A value counts only if it contains something other than whitespace.
    pub fn has_value(&self) -> bool {
        is_present(self.value.as_deref())
    }

    pub fn has_color(&self) -> bool {
        is_present(self.color.as_deref())
    }

    pub fn has_comment(&self) -> bool {
        is_present(self.comment.as_deref())
    }

    /// The cell value, or `""` when empty.
    pub fn text(&self) -> &str {
        self.value.as_deref().unwrap_or("")
    }

    pub fn key(&self) -> CellKey {
        CellKey::new(self.sheet.clone(), self.row, self.col)
    }

    /// Case-insensitive colour comparison (`"Yellow"` matches `"yellow"`).
    pub fn color_is(&self, color: &str) -> bool {
        self.color
            .as_deref()
            .is_some_and(|c| c.trim().eq_ignore_ascii_case(color.trim()))
    }
}

/// Shared emptiness rule for values and metadata.
pub fn is_present(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}
