// src/data/state.rs

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::data::cell::{Cell, CellKey};
use crate::errors::{Result, SheetflowError};

/// One sheet: a header of column names plus a grid of optional values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sheet {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl Sheet {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn col_count(&self) -> usize {
        self.columns.len()
    }
}

/// Snapshot of a multi-sheet dataset with per-cell colour and comment maps.
///
/// Treat a `DataState` as immutable once it has been handed to a pipeline:
/// take a [`DataState::copy`] and edit the copy. `copy` is a deep clone, so
/// edits on the copy can never leak into the original.
///
/// All lookups and writes are bounds-checked against the owning sheet's
/// current dimensions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataState {
    sheets: Vec<Sheet>,
    #[serde(with = "cell_map")]
    colors: BTreeMap<CellKey, String>,
    #[serde(with = "cell_map")]
    comments: BTreeMap<CellKey, String>,
}

impl DataState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Independent deep snapshot of this state, metadata included.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    pub fn add_sheet<I, S>(&mut self, name: impl Into<String>, columns: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        if self.sheet(&name).is_some() {
            return Err(SheetflowError::DuplicateSheet(name));
        }
        self.sheets.push(Sheet {
            name,
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        });
        Ok(())
    }

    /// Append a data row. Short rows are padded with empty cells; rows wider
    /// than the header are rejected.
    pub fn push_row(&mut self, sheet: &str, mut values: Vec<Option<String>>) -> Result<usize> {
        let sheet_ref = self.sheet_mut(sheet)?;
        let cols = sheet_ref.col_count();
        if values.len() > cols {
            return Err(SheetflowError::CellOutOfBounds {
                sheet: sheet.to_string(),
                row: sheet_ref.row_count(),
                col: values.len() - 1,
                rows: sheet_ref.row_count(),
                cols,
            });
        }
        values.resize(cols, None);
        sheet_ref.rows.push(values);
        Ok(sheet_ref.row_count() - 1)
    }

    pub fn sheet_names(&self) -> impl Iterator<Item = &str> {
        self.sheets.iter().map(|s| s.name.as_str())
    }

    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }

    fn sheet_mut(&mut self, name: &str) -> Result<&mut Sheet> {
        self.sheets
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| SheetflowError::UnknownSheet(name.to_string()))
    }

    /// `(rows, cols)` of a sheet.
    pub fn dimensions(&self, sheet: &str) -> Result<(usize, usize)> {
        let s = self
            .sheet(sheet)
            .ok_or_else(|| SheetflowError::UnknownSheet(sheet.to_string()))?;
        Ok((s.row_count(), s.col_count()))
    }

    pub fn column_name(&self, sheet: &str, col: usize) -> Result<&str> {
        let s = self
            .sheet(sheet)
            .ok_or_else(|| SheetflowError::UnknownSheet(sheet.to_string()))?;
        s.columns
            .get(col)
            .map(|c| c.as_str())
            .ok_or_else(|| out_of_bounds(s, 0, col))
    }

    pub fn column_index(&self, sheet: &str, column: &str) -> Option<usize> {
        self.sheet(sheet)?
            .columns
            .iter()
            .position(|c| c == column)
    }

    pub fn get_cell_value(&self, sheet: &str, row: usize, col: usize) -> Result<Option<&str>> {
        let s = self.checked(sheet, row, col)?;
        Ok(s.rows[row][col].as_deref())
    }

    pub fn set_cell_value(
        &mut self,
        sheet: &str,
        row: usize,
        col: usize,
        value: impl Into<String>,
    ) -> Result<()> {
        self.checked(sheet, row, col)?;
        let s = self.sheet_mut(sheet)?;
        s.rows[row][col] = Some(value.into());
        Ok(())
    }

    pub fn clear_cell_value(&mut self, sheet: &str, row: usize, col: usize) -> Result<()> {
        self.checked(sheet, row, col)?;
        let s = self.sheet_mut(sheet)?;
        s.rows[row][col] = None;
        Ok(())
    }

    pub fn get_color(&self, sheet: &str, row: usize, col: usize) -> Result<Option<&str>> {
        self.checked(sheet, row, col)?;
        Ok(self
            .colors
            .get(&CellKey::new(sheet, row, col))
            .map(|c| c.as_str()))
    }

    pub fn set_color(
        &mut self,
        sheet: &str,
        row: usize,
        col: usize,
        color: Option<String>,
    ) -> Result<()> {
        self.checked(sheet, row, col)?;
        let key = CellKey::new(sheet, row, col);
        match color {
            Some(c) => self.colors.insert(key, c),
            None => self.colors.remove(&key),
        };
        Ok(())
    }

    pub fn get_comment(&self, sheet: &str, row: usize, col: usize) -> Result<Option<&str>> {
        self.checked(sheet, row, col)?;
        Ok(self
            .comments
            .get(&CellKey::new(sheet, row, col))
            .map(|c| c.as_str()))
    }

    pub fn set_comment(
        &mut self,
        sheet: &str,
        row: usize,
        col: usize,
        comment: Option<String>,
    ) -> Result<()> {
        self.checked(sheet, row, col)?;
        let key = CellKey::new(sheet, row, col);
        match comment {
            Some(c) => self.comments.insert(key, c),
            None => self.comments.remove(&key),
        };
        Ok(())
    }

    pub fn get_cell(&self, sheet: &str, row: usize, col: usize) -> Result<Cell> {
        let s = self.checked(sheet, row, col)?;
        let key = CellKey::new(sheet, row, col);
        Ok(Cell {
            sheet: s.name.clone(),
            row,
            col,
            value: s.rows[row][col].clone(),
            color: self.colors.get(&key).cloned(),
            comment: self.comments.get(&key).cloned(),
        })
    }

    /// All `(column name, value)` pairs of a row, in column order.
    pub fn row_values(&self, sheet: &str, row: usize) -> Result<Vec<(String, Option<String>)>> {
        let s = self
            .sheet(sheet)
            .ok_or_else(|| SheetflowError::UnknownSheet(sheet.to_string()))?;
        let values = s.rows.get(row).ok_or_else(|| out_of_bounds(s, row, 0))?;
        Ok(s.columns.iter().cloned().zip(values.iter().cloned()).collect())
    }

    /// Row-major iterator over every cell of a sheet.
    pub fn cells<'a>(&'a self, sheet: &str) -> Result<impl Iterator<Item = Cell> + 'a> {
        let s = self
            .sheet(sheet)
            .ok_or_else(|| SheetflowError::UnknownSheet(sheet.to_string()))?;
        let cols = s.col_count();
        Ok((0..s.row_count()).flat_map(move |row| {
            (0..cols).map(move |col| {
                let key = CellKey::new(s.name.as_str(), row, col);
                Cell {
                    sheet: s.name.clone(),
                    row,
                    col,
                    value: s.rows[row][col].clone(),
                    color: self.colors.get(&key).cloned(),
                    comment: self.comments.get(&key).cloned(),
                }
            })
        }))
    }

    /// Total number of cells across all sheets.
    pub fn cell_count(&self) -> usize {
        self.sheets
            .iter()
            .map(|s| s.row_count() * s.col_count())
            .sum()
    }

    fn checked(&self, sheet: &str, row: usize, col: usize) -> Result<&Sheet> {
        let s = self
            .sheet(sheet)
            .ok_or_else(|| SheetflowError::UnknownSheet(sheet.to_string()))?;
        if row >= s.row_count() || col >= s.col_count() {
            return Err(out_of_bounds(s, row, col));
        }
        Ok(s)
    }
}

fn out_of_bounds(s: &Sheet, row: usize, col: usize) -> SheetflowError {
    SheetflowError::CellOutOfBounds {
        sheet: s.name.clone(),
        row,
        col,
        rows: s.row_count(),
        cols: s.col_count(),
    }
}

/// JSON object keys must be strings, so cell-keyed maps are stored as a list
/// of `[key, value]` entries.
mod cell_map {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serializer};

    use crate::data::cell::CellKey;

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<CellKey, String>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(map.iter())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<CellKey, String>, D::Error> {
        let entries: Vec<(CellKey, String)> = Vec::deserialize(deserializer)?;
        Ok(entries.into_iter().collect())
    }
}
