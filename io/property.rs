use super::vtk::VtkPolyData;
use super::{InputError, tokens};
use ndarray::Array2;
use std::fs;
use std::path::Path;

/// Reads one scalar per vertex from a text file.
///
/// The first `header_lines` lines are skipped; the remaining values may be
/// separated by any mix of whitespace, commas and line breaks.
pub fn read_property(
    path: &Path,
    header_lines: usize,
    vertex_count: usize,
) -> Result<Vec<f64>, InputError> {
    let content = fs::read_to_string(path).map_err(|e| InputError::io(path, e))?;
    parse_property(path, &content, header_lines, vertex_count)
}

pub fn parse_property(
    path: &Path,
    content: &str,
    header_lines: usize,
    vertex_count: usize,
) -> Result<Vec<f64>, InputError> {
    let mut values = Vec::with_capacity(vertex_count);
    for (i, line) in content.lines().enumerate().skip(header_lines) {
        for token in tokens(line) {
            let value: f64 = token.parse().map_err(|_| {
                InputError::parse(path, i + 1, format!("expected a number, found '{token}'"))
            })?;
            values.push(value);
        }
    }
    if values.len() != vertex_count {
        return Err(InputError::ValueCount {
            path: path.to_path_buf(),
            expected: vertex_count,
            found: values.len(),
        });
    }
    Ok(values)
}

/// Reads several property files into a `vertices x properties` matrix.
pub fn load_properties<P: AsRef<Path>>(
    paths: &[P],
    header_lines: usize,
    vertex_count: usize,
) -> Result<Array2<f64>, InputError> {
    let columns = paths
        .iter()
        .map(|p| read_property(p.as_ref(), header_lines, vertex_count))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(stack_columns(&columns, vertex_count))
}

/// Takes properties from the point data of a VTK surface by array name.
pub fn properties_from_point_data(
    path: &Path,
    data: &VtkPolyData,
    names: &[String],
) -> Result<Array2<f64>, InputError> {
    let vertex_count = data.mesh.vertex_count();
    let columns = names
        .iter()
        .map(|name| {
            let array = data.array(name).ok_or_else(|| InputError::MissingArray {
                path: path.to_path_buf(),
                name: name.clone(),
            })?;
            let values = array.first_component();
            if values.len() != vertex_count {
                return Err(InputError::ValueCount {
                    path: path.to_path_buf(),
                    expected: vertex_count,
                    found: values.len(),
                });
            }
            Ok(values)
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(stack_columns(&columns, vertex_count))
}

fn stack_columns(columns: &[Vec<f64>], rows: usize) -> Array2<f64> {
    Array2::from_shape_fn((rows, columns.len()), |(v, p)| columns[p][v])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::vtk::parse_vtk;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_header_lines_are_skipped() {
        let text = "NUMBER_OF_POINTS=3\nDIMENSION=1\n1.5\n-2\n3e-1\n";
        let values = parse_property(Path::new("p.txt"), text, 2, 3).unwrap();
        assert_eq!(values, vec![1.5, -2.0, 0.3]);
    }

    #[test]
    fn test_value_count_must_match_vertices() {
        let err = parse_property(Path::new("p.txt"), "1 2 3 4", 0, 3).unwrap_err();
        assert!(matches!(
            err,
            InputError::ValueCount {
                expected: 3,
                found: 4,
                ..
            }
        ));
    }

    #[test]
    fn test_garbage_reports_its_line() {
        let err = parse_property(Path::new("p.txt"), "header\n1\nabc\n", 1, 2).unwrap_err();
        assert!(matches!(err, InputError::Parse { line: 3, .. }));
    }

    #[test]
    fn test_files_stack_into_columns() {
        let mut a = NamedTempFile::new().unwrap();
        writeln!(a, "1\n2\n3").unwrap();
        let mut b = NamedTempFile::new().unwrap();
        writeln!(b, "10, 20, 30").unwrap();
        let matrix = load_properties(&[a.path(), b.path()], 0, 3).unwrap();
        assert_eq!(matrix.dim(), (3, 2));
        assert_eq!(matrix[[1, 0]], 2.0);
        assert_eq!(matrix[[2, 1]], 30.0);
    }

    #[test]
    fn test_point_data_arrays_by_name() {
        let text = "# vtk DataFile Version 3.0\nt\nASCII\nDATASET POLYDATA\nPOINTS 3 float\n1 0 0 0 1 0 0 0 1\nPOLYGONS 1 4\n3 0 1 2\nPOINT_DATA 3\nSCALARS C float 1\nLOOKUP_TABLE default\n0.5 0.6 0.7\n";
        let path = Path::new("t.vtk");
        let data = parse_vtk(path, text).unwrap();
        let matrix = properties_from_point_data(path, &data, &["C".to_string()]).unwrap();
        assert_eq!(matrix.column(0).to_vec(), vec![0.5, 0.6, 0.7]);
        let err = properties_from_point_data(path, &data, &["H".to_string()]).unwrap_err();
        assert!(matches!(err, InputError::MissingArray { .. }));
    }
}
