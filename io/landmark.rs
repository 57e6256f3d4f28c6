use super::vtk::VtkPolyData;
use super::{InputError, tokens};
use crate::register::subject::LandmarkSpec;
use itertools::Itertools;
use std::fs;
use std::path::Path;

/// Name of the point-data array that marks landmark vertices on a surface.
pub const LANDMARK_ARRAY: &str = "Landmarks";

/// Reads a landmark file.
///
/// `.fcsv` files are Slicer markup tables: `#` lines are comments and every
/// row holds a label followed by the x, y and z coordinates. Any other file
/// holds one landmark per line, either a vertex index or three coordinates.
pub fn read_landmarks(path: &Path) -> Result<Vec<LandmarkSpec>, InputError> {
    let is_fcsv = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("fcsv"));
    if is_fcsv {
        read_fcsv(path)
    } else {
        let content = fs::read_to_string(path).map_err(|e| InputError::io(path, e))?;
        parse_landmark_text(path, &content)
    }
}

fn read_fcsv(path: &Path) -> Result<Vec<LandmarkSpec>, InputError> {
    let csv_error = |source: csv::Error| InputError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(csv_error)?;

    let mut landmarks = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_error)?;
        let line = record.position().map_or(0, |p| p.line() as usize);
        let coord = |k: usize| -> Result<f64, InputError> {
            record
                .get(k)
                .and_then(|t| t.parse().ok())
                .ok_or_else(|| {
                    let message = format!("missing coordinate in column {}", k + 1);
                    InputError::parse(path, line, message)
                })
        };
        landmarks.push(LandmarkSpec::Point([coord(1)?, coord(2)?, coord(3)?]));
    }
    Ok(landmarks)
}

pub fn parse_landmark_text(path: &Path, content: &str) -> Result<Vec<LandmarkSpec>, InputError> {
    let mut landmarks = Vec::new();
    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = tokens(line).collect();
        let bad = || {
            let message = format!("expected a vertex index or 'x y z', found '{line}'");
            InputError::parse(path, i + 1, message)
        };
        let spec = match fields.as_slice() {
            [index] => LandmarkSpec::Vertex(index.parse().map_err(|_| bad())?),
            [x, y, z] => {
                let parse = |t: &str| t.parse::<f64>().map_err(|_| bad());
                LandmarkSpec::Point([parse(x)?, parse(y)?, parse(z)?])
            }
            _ => return Err(bad()),
        };
        landmarks.push(spec);
    }
    Ok(landmarks)
}

/// Landmarks marked on a surface: vertex `v` is landmark `k` when the
/// [`LANDMARK_ARRAY`] value at `v` rounds to `k > 0`. Landmarks come back
/// ordered by `k`.
pub fn landmarks_from_point_data(
    path: &Path,
    data: &VtkPolyData,
) -> Result<Vec<LandmarkSpec>, InputError> {
    let array = data
        .array(LANDMARK_ARRAY)
        .ok_or_else(|| InputError::MissingArray {
            path: path.to_path_buf(),
            name: LANDMARK_ARRAY.to_string(),
        })?;
    Ok(array
        .first_component()
        .into_iter()
        .enumerate()
        .filter_map(|(v, value)| {
            let k = value.round() as i64;
            (k > 0).then_some((k, v))
        })
        .sorted_unstable()
        .map(|(_, v)| LandmarkSpec::Vertex(v))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::vtk::parse_vtk;
    use std::io::Write;
    use tempfile::Builder;

    #[test]
    fn test_fcsv_rows_become_points() {
        let mut file = Builder::new().suffix(".fcsv").tempfile().unwrap();
        write!(
            file,
            "# Markups fiducial file version = 4.10\n# CoordinateSystem = 0\n# columns = id,x,y,z,ow,ox,oy,oz,vis,sel,lock,label,desc,associatedNodeID\nvtkMRMLMarkupsFiducialNode_0,-1.5,2,3.25,0,0,0,1,1,1,0,F-1,,\nvtkMRMLMarkupsFiducialNode_1,4,5,6,0,0,0,1,1,1,0,F-2,,\n"
        )
        .unwrap();
        let landmarks = read_landmarks(file.path()).unwrap();
        assert_eq!(
            landmarks,
            vec![
                LandmarkSpec::Point([-1.5, 2.0, 3.25]),
                LandmarkSpec::Point([4.0, 5.0, 6.0])
            ]
        );
    }

    #[test]
    fn test_text_mixes_indices_and_points() {
        let landmarks =
            parse_landmark_text(Path::new("l.txt"), "# anchors\n12\n0.5 0.5 0.7\n\n3\n").unwrap();
        assert_eq!(
            landmarks,
            vec![
                LandmarkSpec::Vertex(12),
                LandmarkSpec::Point([0.5, 0.5, 0.7]),
                LandmarkSpec::Vertex(3)
            ]
        );
    }

    #[test]
    fn test_two_numbers_are_rejected() {
        let err = parse_landmark_text(Path::new("l.txt"), "1 2\n").unwrap_err();
        assert!(matches!(err, InputError::Parse { line: 1, .. }));
    }

    #[test]
    fn test_surface_array_orders_by_label() {
        let text = "# vtk DataFile Version 3.0\nt\nASCII\nDATASET POLYDATA\nPOINTS 4 float\n1 0 0 0 1 0 0 0 1 -1 0 0\nPOLYGONS 2 8\n3 0 1 2\n3 0 2 3\nPOINT_DATA 4\nSCALARS Landmarks int 1\nLOOKUP_TABLE default\n2 0 1 3\n";
        let path = Path::new("t.vtk");
        let data = parse_vtk(path, text).unwrap();
        assert_eq!(
            landmarks_from_point_data(path, &data).unwrap(),
            vec![
                LandmarkSpec::Vertex(2),
                LandmarkSpec::Vertex(0),
                LandmarkSpec::Vertex(3)
            ]
        );
    }
}
