use crate::{bag::MultiKeyBag, error::BagError, KeyPattern, Result};
use qu::ick_use::*;
use std::{fs, io, path::Path};

/// Converts a not found error to Ok(false)
pub fn path_exists(path: &Path) -> io::Result<bool> {
    match fs::metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if matches!(e.kind(), io::ErrorKind::NotFound) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Read a definition file into lines.
pub fn read_lines(path: impl AsRef<Path>) -> Result<Vec<String>> {
    fn inner(path: &Path) -> Result<Vec<String>> {
        ensure!(path_exists(path)?, "file not found");
        Ok(fs::read_to_string(path)?
            .lines()
            .map(str::to_string)
            .collect())
    }
    let path = path.as_ref();
    inner(path).with_context(|| format!("reading definitions from \"{}\"", path.display()))
}

// error printing helper.
//
pub trait ResultExt {
    fn print_error(self) -> Self;
}

impl<T> ResultExt for Result<T, anyhow::Error> {
    fn print_error(self) -> Self {
        match self {
            Ok(v) => Ok(v),
            Err(error) => {
                println!("error: {}", error);
                let mut err: &dyn std::error::Error = error.as_ref();
                while let Some(cause) = err.source() {
                    println!("caused by: {}", cause);
                    err = cause;
                }
                Err(error)
            }
        }
    }
}

pub fn header(header: &str) {
    let len = header.len();
    print!("\n{}\n", header);
    for _ in 0..len {
        print!("=");
    }
    println!("\n")
}

/// A table with a row of summary statistics for each histogram of `bag` selected by `patterns`.
pub fn statistics_table(
    bag: &MultiKeyBag,
    patterns: &[KeyPattern],
    percentiles: &[f64],
) -> Result<term_data_table::Table<'static>, BagError> {
    use term_data_table::{Cell, Row, Table};
    let heading = percentiles.iter().fold(
        Row::new()
            .with_cell(Cell::from("Key"))
            .with_cell(Cell::from("n"))
            .with_cell(Cell::from("Mean"))
            .with_cell(Cell::from("SD"))
            .with_cell(Cell::from("Min"))
            .with_cell(Cell::from("Max")),
        |row, p| row.with_cell(Cell::from(format!("P{}", p))),
    );
    let mut table = Table::new().with_row(heading);
    for pattern in patterns {
        let stats = bag.statistics(pattern)?;
        let row = stats.percentiles(percentiles).into_iter().fold(
            Row::new()
                .with_cell(Cell::from(pattern.to_string()))
                .with_cell(Cell::from(stats.count.to_string()))
                .with_cell(Cell::from(format!("{:.2}", stats.mean)))
                .with_cell(Cell::from(format!("{:.2}", stats.std_dev)))
                .with_cell(Cell::from(stats.min.to_string()))
                .with_cell(Cell::from(stats.max.to_string())),
            |row, value| row.with_cell(Cell::from(value.to_string())),
        );
        table.add_row(row);
    }
    Ok(table)
}
