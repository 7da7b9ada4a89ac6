//! Randomized SQL synthesis.
//!
//! Given a table's column metadata, [`QueryBuilder`] resolves each
//! placeholder a template declares to concrete SQL text: single columns are
//! drawn uniformly from the character or numeric partition, `{columns}` is a
//! random-size sample of the character partition, and `{row}` is a random
//! bound in `[1, max_rows]`. The random source is injected so tests can seed
//! it; production workers draw from entropy.

use std::collections::HashMap;

use itertools::Itertools;
use rand::seq::SliceRandom;
use rand::Rng;
use thiserror::Error;

use crate::template::Placeholder;

/// Type names treated as numeric, unioned across the supported dialects
/// (Oracle, SQL Server, HANA, MySQL, PostgreSQL). Matched case-insensitively;
/// everything else counts as a character column.
const NUMERIC_TYPE_NAMES: &[&str] = &[
    "number",
    "float",
    "integer",
    "int",
    "tinyint",
    "smallint",
    "bigint",
    "decimal",
    "numeric",
    "real",
    "double",
    "smalldecimal",
    "smallmoney",
    "money",
];

/// One column of a table under benchmark, as reported by the dialect's
/// introspection query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMetadata {
    pub column_name: String,
    pub data_type: String,
}

impl ColumnMetadata {
    pub fn new(column_name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            column_name: column_name.into(),
            data_type: data_type.into(),
        }
    }

    pub fn is_numeric(&self) -> bool {
        let data_type = self.data_type.trim().to_lowercase();
        NUMERIC_TYPE_NAMES.contains(&data_type.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuilderError {
    #[error("table \"{table}\" has no character columns to satisfy {{{placeholder}}}")]
    NoCharacterColumns {
        table: String,
        placeholder: Placeholder,
    },

    #[error("table \"{table}\" has no numeric columns to satisfy {{{placeholder}}}")]
    NoNumericColumns {
        table: String,
        placeholder: Placeholder,
    },
}

/// Wraps an identifier in double quotes, the portable spelling for
/// case-sensitive identifiers across the supported dialects.
pub fn quote_ident(name: &str) -> String {
    format!("\"{name}\"")
}

/// Resolves template placeholders against one table's columns. Construction
/// partitions the columns once; `build` may then be called per query.
#[derive(Debug)]
pub struct QueryBuilder {
    table_name: String,
    character: Vec<String>,
    numeric: Vec<String>,
    max_rows: u64,
}

impl QueryBuilder {
    pub fn new(table_name: &str, columns: &[ColumnMetadata], max_rows: u64) -> Self {
        let (numeric, character): (Vec<_>, Vec<_>) =
            columns.iter().partition(|column| column.is_numeric());
        Self {
            table_name: table_name.to_owned(),
            character: character
                .into_iter()
                .map(|column| column.column_name.clone())
                .collect(),
            numeric: numeric
                .into_iter()
                .map(|column| column.column_name.clone())
                .collect(),
            // The row bound is 1-based.
            max_rows: max_rows.max(1),
        }
    }

    /// Resolves every placeholder in `placeholders` to concrete SQL text.
    /// Each call draws fresh random samples; queries vary across iterations
    /// by design.
    pub fn build<R: Rng + ?Sized>(
        &self,
        placeholders: &[Placeholder],
        rng: &mut R,
    ) -> Result<HashMap<Placeholder, String>, BuilderError> {
        placeholders
            .iter()
            .map(|&placeholder| Ok((placeholder, self.resolve(placeholder, rng)?)))
            .collect()
    }

    fn resolve<R: Rng + ?Sized>(
        &self,
        placeholder: Placeholder,
        rng: &mut R,
    ) -> Result<String, BuilderError> {
        use Placeholder::*;
        Ok(match placeholder {
            Table | Table1 | Table2 => quote_ident(&self.table_name),
            Column | Column1 | Column2 | OrderColumn => {
                quote_ident(self.character_column(placeholder, rng)?)
            }
            NumericColumn | AggColumn | AnalyticColumn => {
                quote_ident(self.numeric_column(placeholder, rng)?)
            }
            Columns => {
                if self.character.is_empty() {
                    return Err(self.no_character_columns(placeholder));
                }
                let k = rng.gen_range(1..=self.character.len());
                self.character
                    .choose_multiple(rng, k)
                    .map(|column| quote_ident(column))
                    .join(", ")
            }
            Row => rng.gen_range(1..=self.max_rows).to_string(),
        })
    }

    fn character_column<R: Rng + ?Sized>(
        &self,
        placeholder: Placeholder,
        rng: &mut R,
    ) -> Result<&str, BuilderError> {
        self.character
            .choose(rng)
            .map(String::as_str)
            .ok_or_else(|| self.no_character_columns(placeholder))
    }

    fn numeric_column<R: Rng + ?Sized>(
        &self,
        placeholder: Placeholder,
        rng: &mut R,
    ) -> Result<&str, BuilderError> {
        self.numeric
            .choose(rng)
            .map(String::as_str)
            .ok_or_else(|| BuilderError::NoNumericColumns {
                table: self.table_name.clone(),
                placeholder,
            })
    }

    fn no_character_columns(&self, placeholder: Placeholder) -> BuilderError {
        BuilderError::NoCharacterColumns {
            table: self.table_name.clone(),
            placeholder,
        }
    }
}
