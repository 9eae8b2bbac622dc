// Shot files are plain text, one shot per line:
//
// i0,bin0,bin1,...,binN
//
// Lines starting with # are comments, blank lines are skipped. Every shot must carry the
// same number of azimuthal bins.
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use ndarray::{Array2, ArrayView1, Axis};

use super::error::ShotFileError;

const COMMENT_MARKER: char = '#';

/// A batch of historical shots: one I0 value and one azimuthal average per shot.
///
/// `azav` has shape (shots, bins).
#[derive(Debug, Clone, PartialEq)]
pub struct ShotRecords {
    pub i0: Vec<f64>,
    pub azav: Array2<f64>,
}

impl ShotRecords {
    /// Build the records from per-shot profiles. All profiles must have the same length.
    pub fn from_profiles(i0: Vec<f64>, profiles: &[Vec<f64>]) -> Result<Self, ShotFileError> {
        let n_bins = profiles.first().map(|p| p.len()).unwrap_or(0);
        let mut flat = Vec::with_capacity(profiles.len() * n_bins);
        for (row, profile) in profiles.iter().enumerate() {
            if profile.len() != n_bins {
                return Err(ShotFileError::BadBinCount(row + 1, profile.len(), n_bins));
            }
            flat.extend_from_slice(profile);
        }
        let azav = Array2::from_shape_vec((profiles.len(), n_bins), flat)?;
        Ok(Self { i0, azav })
    }

    pub fn n_shots(&self) -> usize {
        self.i0.len()
    }

    pub fn n_bins(&self) -> usize {
        self.azav.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.i0.is_empty()
    }

    pub fn profile(&self, shot: usize) -> ArrayView1<'_, f64> {
        self.azav.index_axis(Axis(0), shot)
    }

    /// Read a shot file
    pub fn read(path: &Path) -> Result<Self, ShotFileError> {
        if !path.exists() {
            return Err(ShotFileError::BadFilePath(path.to_path_buf()));
        }
        let mut contents = String::new();
        File::open(path)?.read_to_string(&mut contents)?;
        Self::parse(&contents)
    }

    /// Parse shot file contents
    pub fn parse(contents: &str) -> Result<Self, ShotFileError> {
        let mut i0 = Vec::new();
        let mut flat: Vec<f64> = Vec::new();
        let mut n_bins: Option<usize> = None;

        for (idx, line) in contents.lines().enumerate() {
            let line_number = idx + 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with(COMMENT_MARKER) {
                continue;
            }

            let mut entries = line.split(',').map(|e| e.trim());
            let shot_i0 = match entries.next() {
                Some(entry) => entry
                    .parse::<f64>()
                    .map_err(|e| ShotFileError::ParsingError(line_number, e))?,
                None => continue,
            };
            let start = flat.len();
            for entry in entries {
                let value = entry
                    .parse::<f64>()
                    .map_err(|e| ShotFileError::ParsingError(line_number, e))?;
                flat.push(value);
            }
            let row_bins = flat.len() - start;
            if row_bins == 0 {
                return Err(ShotFileError::MissingBins(line_number));
            }
            match n_bins {
                Some(expected) if expected != row_bins => {
                    return Err(ShotFileError::BadBinCount(line_number, row_bins, expected))
                }
                Some(_) => (),
                None => n_bins = Some(row_bins),
            }
            i0.push(shot_i0);
        }

        let n_bins = n_bins.ok_or(ShotFileError::Empty)?;
        let azav = Array2::from_shape_vec((i0.len(), n_bins), flat)?;
        Ok(Self { i0, azav })
    }

    /// Write the records in the shot file format
    pub fn write(&self, path: &Path) -> Result<(), ShotFileError> {
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(
            writer,
            "{COMMENT_MARKER} i0, then {} azimuthal bins per shot",
            self.n_bins()
        )?;
        for (shot_i0, profile) in self.i0.iter().zip(self.azav.outer_iter()) {
            write!(writer, "{shot_i0}")?;
            for value in profile.iter() {
                write!(writer, ",{value}")?;
            }
            writeln!(writer)?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_skips_comments() {
        let contents = "# header\n\n1.5,0,1,2\n  # indented comment\n2.5, 3, 4, 5\n";
        let records = ShotRecords::parse(contents).unwrap();
        assert_eq!(records.i0, vec![1.5, 2.5]);
        assert_eq!(records.n_bins(), 3);
        assert_eq!(records.profile(1).to_vec(), vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_parse_errors_name_the_line() {
        match ShotRecords::parse("1,2,3\n1,2\n") {
            Err(ShotFileError::BadBinCount(line, got, expected)) => {
                assert_eq!((line, got, expected), (2, 1, 2))
            }
            other => panic!("unexpected parse result {other:?}"),
        }
        assert!(matches!(
            ShotRecords::parse("# only\n1,a,3\n"),
            Err(ShotFileError::ParsingError(2, _))
        ));
        assert!(matches!(
            ShotRecords::parse("4.0\n"),
            Err(ShotFileError::MissingBins(1))
        ));
        assert!(matches!(
            ShotRecords::parse("# nothing\n"),
            Err(ShotFileError::Empty)
        ));
    }

    #[test]
    fn test_from_profiles_checks_lengths() {
        let ok = ShotRecords::from_profiles(vec![1.0, 2.0], &[vec![1.0, 2.0], vec![3.0, 4.0]]);
        assert_eq!(ok.unwrap().azav.shape(), &[2, 2]);
        let bad = ShotRecords::from_profiles(vec![1.0, 2.0], &[vec![1.0, 2.0], vec![3.0]]);
        assert!(matches!(bad, Err(ShotFileError::BadBinCount(2, 1, 2))));
    }

    #[test]
    fn test_write_then_read_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shots.txt");
        let records =
            ShotRecords::from_profiles(vec![0.25, 0.75], &[vec![1.0, 2.5], vec![-3.0, 4.0]])
                .unwrap();
        records.write(&path).unwrap();
        assert_eq!(ShotRecords::read(&path).unwrap(), records);
        assert!(matches!(
            ShotRecords::read(&dir.path().join("missing.txt")),
            Err(ShotFileError::BadFilePath(_))
        ));
    }
}
