//! Query templates and their placeholder vocabulary.
//!
//! Templates are loaded from a CSV file with the columns
//! `database,query_id,name,query_template`. Placeholder names are parsed into
//! the closed [`Placeholder`] set at load time, so a typo in a template fails
//! the run before any query executes rather than mid-benchmark.

use std::collections::HashMap;
use std::fmt::{self, Display};
use std::io;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

/// A named slot in a query template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placeholder {
    Table,
    Table1,
    Table2,
    Column,
    Column1,
    Column2,
    Columns,
    OrderColumn,
    Row,
    NumericColumn,
    AggColumn,
    AnalyticColumn,
}

impl Placeholder {
    pub fn as_str(&self) -> &'static str {
        match self {
            Placeholder::Table => "table",
            Placeholder::Table1 => "table1",
            Placeholder::Table2 => "table2",
            Placeholder::Column => "column",
            Placeholder::Column1 => "column_1",
            Placeholder::Column2 => "column_2",
            Placeholder::Columns => "columns",
            Placeholder::OrderColumn => "order_column",
            Placeholder::Row => "row",
            Placeholder::NumericColumn => "numeric_column",
            Placeholder::AggColumn => "agg_column",
            Placeholder::AnalyticColumn => "analytic_column",
        }
    }
}

impl Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Placeholder {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "table" => Ok(Placeholder::Table),
            "table1" => Ok(Placeholder::Table1),
            "table2" => Ok(Placeholder::Table2),
            "column" => Ok(Placeholder::Column),
            "column_1" => Ok(Placeholder::Column1),
            "column_2" => Ok(Placeholder::Column2),
            "columns" => Ok(Placeholder::Columns),
            "order_column" => Ok(Placeholder::OrderColumn),
            "row" => Ok(Placeholder::Row),
            "numeric_column" => Ok(Placeholder::NumericColumn),
            "agg_column" => Ok(Placeholder::AggColumn),
            "analytic_column" => Ok(Placeholder::AnalyticColumn),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("query {query_id}: unknown placeholder {{{name}}}")]
    UnknownPlaceholder { query_id: u32, name: String },

    #[error("query {query_id}: unbalanced braces in template")]
    UnbalancedBraces { query_id: u32 },

    #[error("query {query_id}: no value supplied for {{{placeholder}}}")]
    Unresolved {
        query_id: u32,
        placeholder: Placeholder,
    },

    #[error("failed to read query templates: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Slot(Placeholder),
}

/// A parameterized SQL statement targeting one database dialect. Immutable
/// once loaded.
#[derive(Debug, Clone)]
pub struct QueryTemplate {
    pub database: String,
    pub query_id: u32,
    pub name: String,
    segments: Vec<Segment>,
    placeholders: Vec<Placeholder>,
}

#[derive(Debug, Deserialize)]
struct TemplateRow {
    database: String,
    query_id: u32,
    name: String,
    query_template: String,
}

impl QueryTemplate {
    pub fn parse(
        database: impl Into<String>,
        query_id: u32,
        name: impl Into<String>,
        template: &str,
    ) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut placeholders = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars();
        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    let mut slot = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(c) => slot.push(c),
                            None => return Err(TemplateError::UnbalancedBraces { query_id }),
                        }
                    }
                    let placeholder = slot.parse::<Placeholder>().map_err(|()| {
                        TemplateError::UnknownPlaceholder {
                            query_id,
                            name: slot,
                        }
                    })?;
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Slot(placeholder));
                    if !placeholders.contains(&placeholder) {
                        placeholders.push(placeholder);
                    }
                }
                '}' => return Err(TemplateError::UnbalancedBraces { query_id }),
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(Self {
            database: database.into(),
            query_id,
            name: name.into(),
            segments,
            placeholders,
        })
    }

    /// The distinct placeholders this template uses, in order of first
    /// appearance.
    pub fn placeholders(&self) -> &[Placeholder] {
        &self.placeholders
    }

    /// Substitutes `values` into the template, producing executable SQL.
    pub fn render(&self, values: &HashMap<Placeholder, String>) -> Result<String, TemplateError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Slot(placeholder) => {
                    out.push_str(values.get(placeholder).ok_or(TemplateError::Unresolved {
                        query_id: self.query_id,
                        placeholder: *placeholder,
                    })?)
                }
            }
        }
        Ok(out)
    }

    pub fn load_csv(path: &Path) -> Result<Vec<QueryTemplate>, TemplateError> {
        Self::load(csv::Reader::from_path(path)?)
    }

    fn load<R: io::Read>(mut reader: csv::Reader<R>) -> Result<Vec<QueryTemplate>, TemplateError> {
        let mut templates = Vec::new();
        for row in reader.deserialize::<TemplateRow>() {
            let row = row?;
            templates.push(QueryTemplate::parse(
                row.database,
                row.query_id,
                row.name,
                &row.query_template,
            )?);
        }
        Ok(templates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_renders() {
        let template = QueryTemplate::parse(
            "oracle",
            1,
            "row limit",
            "SELECT {column} FROM {table} WHERE ROWNUM <= {row}",
        )
        .unwrap();
        assert_eq!(
            template.placeholders(),
            &[Placeholder::Column, Placeholder::Table, Placeholder::Row]
        );

        let values = HashMap::from([
            (Placeholder::Column, "\"name\"".to_owned()),
            (Placeholder::Table, "\"orders\"".to_owned()),
            (Placeholder::Row, "5000".to_owned()),
        ]);
        assert_eq!(
            template.render(&values).unwrap(),
            "SELECT \"name\" FROM \"orders\" WHERE ROWNUM <= 5000"
        );
    }

    #[test]
    fn deduplicates_repeated_placeholders() {
        let template =
            QueryTemplate::parse("hana", 2, "self join", "SELECT * FROM {table}, {table}").unwrap();
        assert_eq!(template.placeholders(), &[Placeholder::Table]);
    }

    #[test]
    fn template_without_placeholders_renders_verbatim() {
        let template = QueryTemplate::parse("mysql", 3, "ping", "SELECT 1").unwrap();
        assert!(template.placeholders().is_empty());
        assert_eq!(template.render(&HashMap::new()).unwrap(), "SELECT 1");
    }

    #[test]
    fn rejects_unknown_placeholder() {
        let err = QueryTemplate::parse("oracle", 4, "typo", "SELECT {colunm} FROM t").unwrap_err();
        assert!(
            matches!(err, TemplateError::UnknownPlaceholder { query_id: 4, ref name } if name == "colunm")
        );
    }

    #[test]
    fn rejects_unbalanced_braces() {
        assert!(matches!(
            QueryTemplate::parse("oracle", 5, "open", "SELECT {column FROM t").unwrap_err(),
            TemplateError::UnbalancedBraces { query_id: 5 }
        ));
        assert!(matches!(
            QueryTemplate::parse("oracle", 6, "close", "SELECT column} FROM t").unwrap_err(),
            TemplateError::UnbalancedBraces { query_id: 6 }
        ));
    }

    #[test]
    fn render_fails_on_missing_value() {
        let template = QueryTemplate::parse("oracle", 7, "count", "SELECT COUNT(*) FROM {table}")
            .unwrap();
        let err = template.render(&HashMap::new()).unwrap_err();
        assert!(matches!(
            err,
            TemplateError::Unresolved {
                query_id: 7,
                placeholder: Placeholder::Table
            }
        ));
    }

    #[test]
    fn loads_templates_from_csv() {
        let csv = "\
database,query_id,name,query_template
oracle,1,select star,\"SELECT * FROM {table} WHERE ROWNUM <= {row}\"
hana,2,aggregate,\"SELECT SUM({agg_column}) FROM {table}\"
";
        let templates = QueryTemplate::load(csv::Reader::from_reader(csv.as_bytes())).unwrap();
        assert_eq!(templates.len(), 2);
        assert_eq!(templates[0].database, "oracle");
        assert_eq!(templates[0].query_id, 1);
        assert_eq!(templates[1].name, "aggregate");
        assert_eq!(
            templates[1].placeholders(),
            &[Placeholder::AggColumn, Placeholder::Table]
        );
    }

    #[test]
    fn csv_with_bad_placeholder_fails_at_load() {
        let csv = "\
database,query_id,name,query_template
oracle,9,typo,\"SELECT {colunm} FROM {table}\"
";
        let err = QueryTemplate::load(csv::Reader::from_reader(csv.as_bytes())).unwrap_err();
        assert!(matches!(err, TemplateError::UnknownPlaceholder { .. }));
    }
}
