use crate::common_io::{read_lines_of_types, write_lines, Delimiter};
use crate::traits::*;
pub use nalgebra::{DMatrix, DVector};

use std::fmt::{Debug, Display};
use std::str::FromStr;

impl<T> IoOps for DMatrix<T>
where
    T: nalgebra::Scalar + Send + FromStr + Display + Copy,
    <T as FromStr>::Err: Debug,
{
    type Scalar = T;
    type Mat = Self;

    fn read_file_delim(
        tsv_file: &str,
        delim: impl Into<Delimiter>,
        skip: Option<usize>,
    ) -> anyhow::Result<Self::Mat> {
        let hdr_line = match skip {
            Some(skip) => skip as i64,
            None => -1, // no skipping
        };

        let data = read_lines_of_types::<T>(tsv_file, delim, hdr_line)?.lines;

        if data.is_empty() {
            return Err(anyhow::anyhow!("No data in file {}", tsv_file));
        }

        let ncols = data[0].len();
        let nrows = data.len();

        if let Some((i, row)) = data.iter().enumerate().find(|(_, x)| x.len() != ncols) {
            return Err(anyhow::anyhow!(
                "{}: row {} has {} fields, expected {}",
                tsv_file,
                i + 1,
                row.len(),
                ncols
            ));
        }

        let data = data.into_iter().flatten().collect::<Vec<_>>();

        Ok(DMatrix::<T>::from_row_iterator(nrows, ncols, data))
    }

    fn write_file_delim(&self, tsv_file: &str, delim: &str) -> anyhow::Result<()> {
        let lines = self
            .row_iter()
            .map(|row| {
                row.iter()
                    .map(|x| format!("{}", *x))
                    .collect::<Vec<String>>()
                    .join(delim)
                    .into_boxed_str()
            })
            .collect::<Vec<_>>();

        write_lines(&lines, tsv_file)?;
        Ok(())
    }

    fn write_file_delim_with_names(
        &self,
        file: &str,
        delim: &str,
        row_names: Option<&[Box<str>]>,
        column_names: &[Box<str>],
    ) -> anyhow::Result<()> {
        if column_names.len() != self.ncols() {
            return Err(anyhow::anyhow!(
                "{} column names for {} columns",
                column_names.len(),
                self.ncols()
            ));
        }

        if let Some(rows) = row_names {
            if rows.len() != self.nrows() {
                return Err(anyhow::anyhow!(
                    "{} row names for {} rows",
                    rows.len(),
                    self.nrows()
                ));
            }
        }

        let mut header: Vec<&str> = Vec::with_capacity(self.ncols() + 1);
        if row_names.is_some() {
            header.push("row");
        }
        header.extend(column_names.iter().map(|x| x.as_ref()));

        let mut lines = Vec::with_capacity(self.nrows() + 1);
        lines.push(header.join(delim).into_boxed_str());

        for (i, row) in self.row_iter().enumerate() {
            let values = row.iter().map(|x| format!("{}", *x));
            let line = match row_names {
                Some(rows) => std::iter::once(rows[i].to_string())
                    .chain(values)
                    .collect::<Vec<_>>(),
                None => values.collect::<Vec<_>>(),
            };
            lines.push(line.join(delim).into_boxed_str());
        }

        write_lines(&lines, file)
    }
}
