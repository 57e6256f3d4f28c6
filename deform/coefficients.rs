use super::harmonics::basis_size;
use ndarray::{Array2, ArrayView2, s};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoefficientError {
    #[error("Failed to read or write coefficient file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML coefficient file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize coefficients to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Line {line} of the coefficient file is malformed: '{content}'")]
    Malformed { line: usize, content: String },
    #[error(
        "Coefficient file declares degree {degree}, which needs {expected} rows, but {found} were found."
    )]
    RowCountMismatch {
        degree: usize,
        expected: usize,
        found: usize,
    },
    #[error("The coefficient matrix must have 3 rows and {expected} columns, found {rows}x{cols}.")]
    BadShape {
        expected: usize,
        rows: usize,
        cols: usize,
    },
}

/// Spherical harmonic coefficients of one subject.
///
/// Row `k` of `coefficients` is the expansion of the `k`-th world axis of the
/// displacement field; column `l*l + l + m` holds the weight of `Y_l^m`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpharmCoefficients {
    pub degree: usize,
    pub pole: [f64; 3],
    pub coefficients: Array2<f64>,
}

impl SpharmCoefficients {
    pub fn zeros(degree: usize, pole: [f64; 3]) -> Self {
        Self {
            degree,
            pole,
            coefficients: Array2::zeros((3, basis_size(degree))),
        }
    }

    pub fn from_matrix(
        degree: usize,
        pole: [f64; 3],
        matrix: ArrayView2<f64>,
    ) -> Result<Self, CoefficientError> {
        let expected = basis_size(degree);
        if matrix.nrows() != 3 || matrix.ncols() != expected {
            return Err(CoefficientError::BadShape {
                expected,
                rows: matrix.nrows(),
                cols: matrix.ncols(),
            });
        }
        Ok(Self {
            degree,
            pole,
            coefficients: matrix.to_owned(),
        })
    }

    /// Truncates or zero-extends to `degree`. Lower-degree columns are a prefix
    /// of higher-degree ones, so the overlapping weights keep their meaning.
    pub fn resized(&self, degree: usize) -> Self {
        let mut out = Self::zeros(degree, self.pole);
        let n = basis_size(degree.min(self.degree));
        out.coefficients
            .slice_mut(s![.., ..n])
            .assign(&self.coefficients.slice(s![.., ..n]));
        out
    }

    /// Saves to `path`. A `.toml` extension selects the TOML layout; anything
    /// else uses the plain-text layout of [`SpharmCoefficients::to_text`].
    pub fn save(&self, path: &Path) -> Result<(), CoefficientError> {
        let content = if is_toml(path) {
            toml::to_string_pretty(self)?
        } else {
            self.to_text()
        };
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(content.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, CoefficientError> {
        let content = fs::read_to_string(path)?;
        let loaded: Self = if is_toml(path) {
            toml::from_str(&content)?
        } else {
            Self::from_text(&content)?
        };
        let expected = basis_size(loaded.degree);
        let (rows, cols) = loaded.coefficients.dim();
        if rows != 3 || cols != expected {
            return Err(CoefficientError::BadShape {
                expected,
                rows,
                cols,
            });
        }
        Ok(loaded)
    }

    /// Plain-text layout: the degree on the first line, then one line per
    /// basis function with its x, y and z weights. The pole is implied to be +z
    /// unless a `# pole x y z` comment precedes the rows.
    pub fn to_text(&self) -> String {
        let mut buffer = ryu::Buffer::new();
        let mut out = format!("{}\n", self.degree);
        if self.pole != [0.0, 0.0, 1.0] {
            out.push_str("# pole");
            for c in self.pole {
                out.push(' ');
                out.push_str(buffer.format(c));
            }
            out.push('\n');
        }
        for column in self.coefficients.columns() {
            let mut first = true;
            for &c in column.iter() {
                if !first {
                    out.push(' ');
                }
                out.push_str(buffer.format(c));
                first = false;
            }
            out.push('\n');
        }
        out
    }

    pub fn from_text(content: &str) -> Result<Self, CoefficientError> {
        let mut lines = content
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l.trim()))
            .filter(|(_, l)| !l.is_empty());

        let (line, header) = lines.next().ok_or(CoefficientError::Malformed {
            line: 1,
            content: String::new(),
        })?;
        let degree: usize = header.parse().map_err(|_| CoefficientError::Malformed {
            line,
            content: header.to_string(),
        })?;

        let mut pole = [0.0, 0.0, 1.0];
        let mut rows: Vec<[f64; 3]> = Vec::with_capacity(basis_size(degree));
        for (line, text) in lines {
            if let Some(rest) = text.strip_prefix('#') {
                let rest = rest.trim();
                if let Some(values) = rest.strip_prefix("pole") {
                    pole = parse_triplet(values, line, text)?;
                }
                continue;
            }
            rows.push(parse_triplet(text, line, text)?);
        }

        let expected = basis_size(degree);
        if rows.len() != expected {
            return Err(CoefficientError::RowCountMismatch {
                degree,
                expected,
                found: rows.len(),
            });
        }
        let coefficients = Array2::from_shape_fn((3, expected), |(axis, i)| rows[i][axis]);
        Ok(Self {
            degree,
            pole,
            coefficients,
        })
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"))
}

fn parse_triplet(values: &str, line: usize, text: &str) -> Result<[f64; 3], CoefficientError> {
    let malformed = || CoefficientError::Malformed {
        line,
        content: text.to_string(),
    };
    let parsed: Vec<f64> = values
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<f64>().map_err(|_| malformed()))
        .collect::<Result<_, _>>()?;
    match parsed.as_slice() {
        [x, y, z] => Ok([*x, *y, *z]),
        _ => Err(malformed()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> SpharmCoefficients {
        let mut c = SpharmCoefficients::zeros(2, [0.0, 0.0, 1.0]);
        for (i, v) in c.coefficients.iter_mut().enumerate() {
            *v = (i as f64) * 0.125 - 1.0;
        }
        c
    }

    #[test]
    fn test_text_file_is_loadable_as_initial_coefficients() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("subject.coeff");
        let original = sample();
        original.save(&path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("2\n"));
        assert_eq!(text.lines().count(), 1 + 9);
        assert_eq!(SpharmCoefficients::load(&path).unwrap(), original);
    }

    #[test]
    fn test_toml_keeps_the_pole() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("subject.toml");
        let mut original = sample();
        original.pole = [1.0, 0.0, 0.0];
        original.save(&path).unwrap();
        assert_eq!(SpharmCoefficients::load(&path).unwrap(), original);
    }

    #[test]
    fn test_text_pole_comment() {
        let mut original = sample();
        original.pole = [0.0, 1.0, 0.0];
        let parsed = SpharmCoefficients::from_text(&original.to_text()).unwrap();
        assert_eq!(parsed.pole, [0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_row_count_must_match_degree() {
        let err = SpharmCoefficients::from_text("1\n0 0 0\n0 0 0\n").unwrap_err();
        assert!(matches!(
            err,
            CoefficientError::RowCountMismatch {
                degree: 1,
                expected: 4,
                found: 2
            }
        ));
    }

    #[test]
    fn test_malformed_row_reports_line() {
        let err = SpharmCoefficients::from_text("0\n1.0 abc 2.0\n").unwrap_err();
        assert!(matches!(err, CoefficientError::Malformed { line: 2, .. }));
    }

    #[test]
    fn test_resize_keeps_prefix() {
        let original = sample();
        let up = original.resized(3);
        assert_eq!(up.coefficients.dim(), (3, 16));
        assert_eq!(
            up.coefficients.slice(s![.., ..9]),
            original.coefficients.view()
        );
        assert!(up.coefficients.slice(s![.., 9..]).iter().all(|&v| v == 0.0));

        let down = original.resized(1);
        assert_eq!(
            down.coefficients.view(),
            original.coefficients.slice(s![.., ..4])
        );
    }
}
