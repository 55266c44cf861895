use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::{Error, Result, Value, SYSTEMS};

/// One matched set of simultaneous measurements `x0 x1 x2` of the same quantity by the three
/// systems.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Collocation<E>(pub [E; SYSTEMS]);

impl<E> From<[E; SYSTEMS]> for Collocation<E> {
    fn from(values: [E; SYSTEMS]) -> Self {
        Self(values)
    }
}

/// An ordered collection of collocations which can be traversed any number of times
///
/// Every pass of the engine calls [`CollocationSource::visit`] once and sees every collocation
/// in the same order. Nothing is shared between passes.
pub trait CollocationSource<E> {
    /// Call `visitor` on each collocation in order
    ///
    /// # Errors
    /// Returns an error if the underlying storage cannot be read or holds a malformed entry.
    fn visit<F>(&self, visitor: F) -> Result<()>
    where
        F: FnMut(&Collocation<E>);
}

impl<E> CollocationSource<E> for [Collocation<E>] {
    fn visit<F>(&self, mut visitor: F) -> Result<()>
    where
        F: FnMut(&Collocation<E>),
    {
        self.iter().for_each(|collocation| visitor(collocation));
        Ok(())
    }
}

impl<E> CollocationSource<E> for Vec<Collocation<E>> {
    fn visit<F>(&self, visitor: F) -> Result<()>
    where
        F: FnMut(&Collocation<E>),
    {
        self.as_slice().visit(visitor)
    }
}

/// On-disk layout of a collocation file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    /// At least three whitespace separated numbers per line, extra fields ignored. Every line is
    /// a collocation, so blank lines and comments are malformed.
    Whitespace,
    /// Comma separated records without a header, extra fields ignored. The reader drops empty
    /// lines.
    Csv,
}

impl Format {
    /// Files with a `csv` extension are comma separated, anything else is whitespace separated
    pub fn from_path(path: &Path) -> Self {
        if path.extension().map_or(false, |ext| ext.eq_ignore_ascii_case("csv")) {
            Self::Csv
        } else {
            Self::Whitespace
        }
    }
}

/// A collocation file, re-read from disk on every pass
#[derive(Clone, Debug)]
pub struct CollocationFile {
    path: PathBuf,
    format: Format,
    skip_malformed: bool,
}

impl CollocationFile {
    /// # Errors
    /// Returns [`Error::MissingInput`] if nothing exists at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            return Err(Error::MissingInput { path });
        }
        let format = Format::from_path(&path);
        Ok(Self {
            path,
            format,
            skip_malformed: false,
        })
    }

    #[must_use]
    pub const fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Skip malformed lines with a warning rather than failing the pass
    #[must_use]
    pub const fn skip_malformed(mut self, skip: bool) -> Self {
        self.skip_malformed = skip;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub const fn format(&self) -> Format {
        self.format
    }

    /// Read every collocation into memory
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or a line is malformed.
    pub fn load<E: Value>(&self) -> Result<Vec<Collocation<E>>> {
        let mut collocations = vec![];
        self.visit(|collocation: &Collocation<E>| collocations.push(*collocation))?;
        Ok(collocations)
    }

    fn source_name(&self) -> String {
        self.path.display().to_string()
    }

    /// Either hand the parsed collocation on, or deal with the malformed line as configured.
    fn dispatch<E, F>(
        &self,
        parsed: std::result::Result<Collocation<E>, String>,
        line: usize,
        content: &str,
        visitor: &mut F,
    ) -> Result<()>
    where
        F: FnMut(&Collocation<E>),
    {
        match parsed {
            Ok(collocation) => {
                visitor(&collocation);
                Ok(())
            }
            Err(reason) if self.skip_malformed => {
                warn!(source = %self.path.display(), line, %reason, "skipping malformed collocation");
                Ok(())
            }
            Err(reason) => Err(Error::MalformedLine {
                source_name: self.source_name(),
                line,
                content: content.to_owned(),
                reason,
            }),
        }
    }
}

impl<E: Value> CollocationSource<E> for CollocationFile {
    fn visit<F>(&self, mut visitor: F) -> Result<()>
    where
        F: FnMut(&Collocation<E>),
    {
        match self.format {
            Format::Whitespace => {
                let mut reader = BufReader::new(File::open(&self.path)?);
                let mut buffer = vec![];
                let mut line = 0;
                while reader.read_until(b'\n', &mut buffer)? > 0 {
                    line += 1;
                    match std::str::from_utf8(&buffer) {
                        Ok(text) => {
                            let text = text.trim_end_matches(|c: char| c == '\n' || c == '\r');
                            let parsed = parse_fields(text.split_whitespace());
                            self.dispatch(parsed, line, text, &mut visitor)?;
                        }
                        Err(e) => {
                            let content = String::from_utf8_lossy(&buffer);
                            let parsed =
                                Err::<Collocation<E>, _>(format!("not valid UTF-8: {e}"));
                            self.dispatch(parsed, line, content.trim_end(), &mut visitor)?;
                        }
                    }
                    buffer.clear();
                }
            }
            Format::Csv => {
                let mut reader = csv::ReaderBuilder::new()
                    .has_headers(false)
                    .flexible(true)
                    .trim(csv::Trim::All)
                    .from_path(&self.path)?;
                for (ii, record) in reader.byte_records().enumerate() {
                    let record = record?;
                    let line = record
                        .position()
                        .and_then(|position| usize::try_from(position.line()).ok())
                        .unwrap_or(ii + 1);
                    let content = record
                        .iter()
                        .map(String::from_utf8_lossy)
                        .collect::<Vec<_>>()
                        .join(",");
                    let parsed = match record
                        .iter()
                        .map(std::str::from_utf8)
                        .collect::<std::result::Result<Vec<_>, _>>()
                    {
                        Ok(fields) => parse_fields(fields.into_iter()),
                        Err(e) => Err(format!("not valid UTF-8: {e}")),
                    };
                    self.dispatch(parsed, line, &content, &mut visitor)?;
                }
            }
        }
        Ok(())
    }
}

/// Parse the first three fields of a record, ignoring any further fields
fn parse_fields<'a, E: Value>(
    mut fields: impl Iterator<Item = &'a str>,
) -> std::result::Result<Collocation<E>, String> {
    let mut values = [E::zero(); SYSTEMS];
    for (ii, value) in values.iter_mut().enumerate() {
        let field = fields
            .next()
            .ok_or_else(|| format!("expected {SYSTEMS} fields, found {ii}"))?;
        let parsed = field
            .parse::<E>()
            .map_err(|_| format!("field {} (`{field}`) is not a number", ii + 1))?;
        if !parsed.is_finite() {
            return Err(format!("field {} (`{field}`) is not finite", ii + 1));
        }
        *value = parsed;
    }
    Ok(Collocation(values))
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::{parse_fields, Collocation, CollocationFile, CollocationSource, Format};
    use crate::{Error, Result};

    fn write_file(dir: &TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn extra_fields_are_ignored() {
        let parsed: Collocation<f64> = parse_fields("1.0 2.5 -3e-1 17 foo".split_whitespace())
            .expect("first three fields are numbers");
        assert_eq!(parsed, Collocation([1.0, 2.5, -0.3]));
    }

    #[test]
    fn short_and_non_numeric_records_are_malformed() {
        assert!(parse_fields::<f64>("1.0 2.0".split_whitespace()).is_err());
        assert!(parse_fields::<f64>("1.0 abc 2.0".split_whitespace()).is_err());
        assert!(parse_fields::<f64>("1.0 NaN 2.0".split_whitespace()).is_err());
    }

    #[test]
    fn whitespace_files_are_read_in_order() -> Result<()> {
        let tmp_dir = TempDir::new("whitespace_files_are_read_in_order").unwrap();
        let path = write_file(
            &tmp_dir,
            "collocations.txt",
            "1.0  2.0\t3.0\r\n4.0 5.0 6.0 99.0\n",
        );

        let file = CollocationFile::open(&path)?;
        assert_eq!(file.format(), Format::Whitespace);

        let collocations: Vec<Collocation<f64>> = file.load()?;
        assert_eq!(
            collocations,
            vec![Collocation([1.0, 2.0, 3.0]), Collocation([4.0, 5.0, 6.0])]
        );
        Ok(())
    }

    #[test]
    fn csv_files_are_detected_by_extension() -> Result<()> {
        let tmp_dir = TempDir::new("csv_files_are_detected_by_extension").unwrap();
        let path = write_file(&tmp_dir, "collocations.csv", "1.0,2.0,3.0\n4.0, 5.0 ,6.0,7.0\n");

        let file = CollocationFile::open(&path)?;
        assert_eq!(file.format(), Format::Csv);

        let collocations: Vec<Collocation<f64>> = file.load()?;
        assert_eq!(
            collocations,
            vec![Collocation([1.0, 2.0, 3.0]), Collocation([4.0, 5.0, 6.0])]
        );
        Ok(())
    }

    #[test]
    fn malformed_lines_report_their_position() {
        let tmp_dir = TempDir::new("malformed_lines_report_their_position").unwrap();
        let path = write_file(&tmp_dir, "collocations.txt", "1.0 2.0 3.0\n4.0 five 6.0\n");

        let file = CollocationFile::open(&path).unwrap();
        let result: Result<Vec<Collocation<f64>>> = file.load();

        match result {
            Err(Error::MalformedLine { line, content, .. }) => {
                assert_eq!(line, 2);
                assert_eq!(content, "4.0 five 6.0");
            }
            other => panic!("expected a malformed line error, got {other:?}"),
        }
    }

    #[test]
    fn blank_and_comment_lines_are_malformed() {
        let tmp_dir = TempDir::new("blank_and_comment_lines_are_malformed").unwrap();
        for (contents, expected) in [
            ("1.0 2.0 3.0\n\n4.0 5.0 6.0\n", 2),
            ("1.0 2.0 3.0\n4.0 5.0 6.0\n# note\n", 3),
        ] {
            let path = write_file(&tmp_dir, "collocations.txt", contents);
            let result: Result<Vec<Collocation<f64>>> = CollocationFile::open(&path).unwrap().load();
            assert!(matches!(
                result,
                Err(Error::MalformedLine { line, .. }) if line == expected
            ));
        }
    }

    #[test]
    fn invalid_utf8_is_a_malformed_line() -> Result<()> {
        let tmp_dir = TempDir::new("invalid_utf8_is_a_malformed_line").unwrap();
        let path = tmp_dir.path().join("collocations.txt");
        std::fs::write(&path, b"1.0 2.0 3.0\n4.0 \xff 6.0\n7.0 8.0 9.0\n").unwrap();

        let result: Result<Vec<Collocation<f64>>> = CollocationFile::open(&path)?.load();
        assert!(matches!(result, Err(Error::MalformedLine { line: 2, .. })));

        let collocations: Vec<Collocation<f64>> =
            CollocationFile::open(&path)?.skip_malformed(true).load()?;
        assert_eq!(
            collocations,
            vec![Collocation([1.0, 2.0, 3.0]), Collocation([7.0, 8.0, 9.0])]
        );
        Ok(())
    }

    #[test]
    fn format_can_be_forced_regardless_of_extension() -> Result<()> {
        let tmp_dir = TempDir::new("format_can_be_forced_regardless_of_extension").unwrap();
        let path = write_file(&tmp_dir, "collocations.csv", "1.0 2.0 3.0\n4.0 5.0 6.0\n");

        let detected: Result<Vec<Collocation<f64>>> = CollocationFile::open(&path)?.load();
        assert!(matches!(detected, Err(Error::MalformedLine { line: 1, .. })));

        let file = CollocationFile::open(&path)?.with_format(Format::Whitespace);
        let collocations: Vec<Collocation<f64>> = file.load()?;
        assert_eq!(
            collocations,
            vec![Collocation([1.0, 2.0, 3.0]), Collocation([4.0, 5.0, 6.0])]
        );
        Ok(())
    }

    #[test]
    fn malformed_lines_can_be_skipped() -> Result<()> {
        let tmp_dir = TempDir::new("malformed_lines_can_be_skipped").unwrap();
        let path = write_file(&tmp_dir, "collocations.txt", "1.0 2.0 3.0\n4.0 6.0\n7.0 8.0 9.0\n");

        let file = CollocationFile::open(&path)?.skip_malformed(true);
        let collocations: Vec<Collocation<f64>> = file.load()?;
        assert_eq!(collocations.len(), 2);
        Ok(())
    }

    #[test]
    fn missing_files_are_reported() {
        let tmp_dir = TempDir::new("missing_files_are_reported").unwrap();
        let result = CollocationFile::open(tmp_dir.path().join("absent.txt"));
        assert!(matches!(result, Err(Error::MissingInput { .. })));
    }

    #[test]
    fn in_memory_sources_can_be_visited_repeatedly() -> Result<()> {
        let source = vec![Collocation([1.0, 2.0, 3.0]), Collocation([4.0, 5.0, 6.0])];
        for _ in 0..2 {
            let mut seen = vec![];
            source.visit(|collocation| seen.push(collocation.0[1]))?;
            assert_eq!(seen, vec![2.0, 5.0]);
        }
        Ok(())
    }
}
