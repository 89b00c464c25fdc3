//! Live-stream rows as returned by the Helix streams endpoint.
//!
//! Rows are passed through opaquely. The table only tracks which columns have
//! been seen, in first-seen order, so pages with slightly different fields
//! can be concatenated by column name.

use serde_json::{Map, Value};

/// One live channel at capture time: the raw JSON object from the platform.
pub type StreamRecord = Map<String, Value>;

/// Ordered rows plus the union of their columns.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StreamTable {
    columns: Vec<String>,
    rows: Vec<StreamRecord>,
}

impl StreamTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one page of rows, keeping their order.
    pub fn append_page(&mut self, page: impl IntoIterator<Item = StreamRecord>) {
        for row in page {
            for key in row.keys() {
                if !self.columns.iter().any(|c| c == key) {
                    self.columns.push(key.clone());
                }
            }
            self.rows.push(row);
        }
    }

    /// Renames a column in every row.
    ///
    /// An existing column named `to` is replaced by the renamed one. Renaming
    /// a column that was never seen is a no-op.
    pub fn rename_column(&mut self, from: &str, to: &str) {
        let Some(position) = self.columns.iter().position(|c| c == from) else {
            return;
        };
        if from == to {
            return;
        }

        self.columns[position] = to.to_string();
        if let Some(duplicate) = self
            .columns
            .iter()
            .enumerate()
            .position(|(i, c)| i != position && c == to)
        {
            self.columns.remove(duplicate);
        }

        for row in &mut self.rows {
            row.remove(to);
            if let Some(value) = row.remove(from) {
                row.insert(to.to_string(), value);
            }
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[StreamRecord] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterates one column top to bottom; missing fields read as `None`.
    pub fn column<'a>(&'a self, name: &'a str) -> impl Iterator<Item = Option<&'a Value>> + 'a {
        self.rows
            .iter()
            .map(move |row| row.get(name).filter(|v| !v.is_null()))
    }
}
