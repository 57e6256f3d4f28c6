use super::InputError;
use crate::sphere::{TriangleMesh, Vec3};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

/// A named per-point array of a legacy VTK file.
#[derive(Debug, Clone, PartialEq)]
pub struct PointArray {
    pub name: String,
    pub components: usize,
    /// Point-major values, `components` per point.
    pub values: Vec<f64>,
}

impl PointArray {
    /// First component of every point.
    pub fn first_component(&self) -> Vec<f64> {
        self.values
            .iter()
            .step_by(self.components.max(1))
            .copied()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VtkPolyData {
    pub mesh: TriangleMesh,
    pub point_data: Vec<PointArray>,
}

impl VtkPolyData {
    pub fn array(&self, name: &str) -> Option<&PointArray> {
        self.point_data.iter().find(|a| a.name == name)
    }
}

// Token cursor over the body of a legacy VTK file, keeping line numbers for
// error messages.
struct Cursor<'a> {
    path: &'a Path,
    tokens: Vec<(usize, &'a str)>,
    pos: usize,
    line: usize,
}

impl<'a> Cursor<'a> {
    fn new(path: &'a Path, body: impl Iterator<Item = (usize, &'a str)>) -> Self {
        let tokens = body
            .flat_map(|(line, text)| text.split_whitespace().map(move |t| (line, t)))
            .collect();
        Self {
            path,
            tokens,
            pos: 0,
            line: 0,
        }
    }

    fn next(&mut self) -> Option<&'a str> {
        let (line, token) = *self.tokens.get(self.pos)?;
        self.pos += 1;
        self.line = line;
        Some(token)
    }

    fn peek(&self) -> Option<&'a str> {
        self.tokens.get(self.pos).map(|(_, t)| *t)
    }

    fn error(&self, message: impl Into<String>) -> InputError {
        InputError::parse(self.path, self.line, message)
    }

    fn word(&mut self, what: &str) -> Result<&'a str, InputError> {
        self.next()
            .ok_or_else(|| self.error(format!("unexpected end of file, expected {what}")))
    }

    fn usize(&mut self, what: &str) -> Result<usize, InputError> {
        let token = self.word(what)?;
        token
            .parse()
            .map_err(|_| self.error(format!("expected {what}, found '{token}'")))
    }

    fn f64(&mut self) -> Result<f64, InputError> {
        let token = self.word("a number")?;
        token
            .parse()
            .map_err(|_| self.error(format!("expected a number, found '{token}'")))
    }

    fn floats(&mut self, count: usize) -> Result<Vec<f64>, InputError> {
        (0..count).map(|_| self.f64()).collect()
    }

    fn skip(&mut self, count: usize) {
        for _ in 0..count {
            self.next();
        }
    }

    fn indices(&mut self, count: usize, what: &str) -> Result<Vec<usize>, InputError> {
        (0..count).map(|_| self.usize(what)).collect()
    }

    /// Reads the cell list that follows a `POLYGONS`-style keyword.
    ///
    /// Legacy files give `<cells> <size>` and then one `n id...` row per cell.
    /// Version 5.1 files give `<offsets> <connectivity>` followed by an
    /// `OFFSETS` and a `CONNECTIVITY` block.
    fn cells(&mut self) -> Result<Vec<Vec<usize>>, InputError> {
        let first = self.usize("the cell count")?;
        let second = self.usize("the cell list size")?;
        if self
            .peek()
            .is_some_and(|t| t.eq_ignore_ascii_case("OFFSETS"))
        {
            self.next();
            self.word("the offset type")?;
            let offsets = self.indices(first, "an offset")?;
            let keyword = self.word("CONNECTIVITY")?;
            if !keyword.eq_ignore_ascii_case("CONNECTIVITY") {
                return Err(self.error(format!("expected CONNECTIVITY, found '{keyword}'")));
            }
            self.word("the connectivity type")?;
            let connectivity = self.indices(second, "a point index")?;
            return offsets
                .windows(2)
                .map(|w| {
                    connectivity
                        .get(w[0]..w[1])
                        .map(<[usize]>::to_vec)
                        .ok_or_else(|| {
                            self.error(format!(
                                "cell offsets {}..{} exceed the {} connectivity entries",
                                w[0],
                                w[1],
                                connectivity.len()
                            ))
                        })
                })
                .collect();
        }
        (0..first)
            .map(|_| {
                let size = self.usize("the cell size")?;
                self.indices(size, "a point index")
            })
            .collect()
    }

    /// Skips the body of a `METADATA` block whose keyword was just read.
    ///
    /// The block ends at the first blank line, or at a section keyword that
    /// opens a line when the writer left the blank line out.
    fn skip_metadata(&mut self) {
        let mut line = self.line;
        while let Some(&(next_line, token)) = self.tokens.get(self.pos) {
            if next_line > line + 1 || (next_line != line && is_section(token)) {
                break;
            }
            line = next_line;
            self.next();
        }
    }

    /// Skips a `METADATA` block if one comes next.
    fn skip_trailing_metadata(&mut self) {
        if self
            .peek()
            .is_some_and(|t| t.eq_ignore_ascii_case("METADATA"))
        {
            self.next();
            self.skip_metadata();
        }
    }
}

fn is_section(token: &str) -> bool {
    const SECTIONS: &[&str] = &[
        "POINTS",
        "VERTICES",
        "LINES",
        "POLYGONS",
        "TRIANGLE_STRIPS",
        "POINT_DATA",
        "CELL_DATA",
        "SCALARS",
        "COLOR_SCALARS",
        "VECTORS",
        "NORMALS",
        "TEXTURE_COORDINATES",
        "TENSORS",
        "LOOKUP_TABLE",
        "FIELD",
        "METADATA",
    ];
    SECTIONS.iter().any(|s| s.eq_ignore_ascii_case(token))
}

/// Reads an ASCII legacy VTK `POLYDATA` file.
///
/// Both the legacy cell layout and the `OFFSETS`/`CONNECTIVITY` layout of
/// version 5.1 files are read. Polygons with more than three corners are
/// split into fans. Point data arrays given as `SCALARS`, `VECTORS`,
/// `NORMALS` or `FIELD` are kept; cell data, texture coordinates, tensors
/// and `METADATA` blocks are skipped.
pub fn read_vtk(path: &Path) -> Result<VtkPolyData, InputError> {
    let content = fs::read_to_string(path).map_err(|e| InputError::io(path, e))?;
    parse_vtk(path, &content)
}

pub fn parse_vtk(path: &Path, content: &str) -> Result<VtkPolyData, InputError> {
    let mut lines = content.lines().enumerate().map(|(i, l)| (i + 1, l));
    match lines.next() {
        Some((_, first)) if first.trim_start().starts_with("# vtk") => {}
        _ => return Err(InputError::parse(path, 1, "missing '# vtk DataFile' header")),
    }
    // Title line.
    lines.next();
    let mut cursor = Cursor::new(path, lines);

    let mut vertices: Vec<Vec3> = Vec::new();
    let mut triangles: Vec<[usize; 3]> = Vec::new();
    let mut point_data: Vec<PointArray> = Vec::new();
    let mut in_cell_data = false;
    let mut data_count = 0;

    while let Some(keyword) = cursor.next() {
        match keyword.to_ascii_uppercase().as_str() {
            "ASCII" => {}
            "BINARY" => return Err(cursor.error("binary VTK files are not supported")),
            "DATASET" => {
                let kind = cursor.word("a dataset type")?;
                if !kind.eq_ignore_ascii_case("POLYDATA") {
                    return Err(cursor.error(format!("unsupported dataset type '{kind}'")));
                }
            }
            "POINTS" => {
                let n = cursor.usize("the point count")?;
                cursor.word("the point data type")?;
                let coords = cursor.floats(3 * n)?;
                vertices = coords
                    .chunks_exact(3)
                    .map(|c| Vec3::new(c[0], c[1], c[2]))
                    .collect();
                cursor.skip_trailing_metadata();
            }
            "POLYGONS" | "TRIANGLE_STRIPS" => {
                let strips = keyword.eq_ignore_ascii_case("TRIANGLE_STRIPS");
                for ids in cursor.cells()? {
                    if strips {
                        for k in 2..ids.len() {
                            if k % 2 == 0 {
                                triangles.push([ids[k - 2], ids[k - 1], ids[k]]);
                            } else {
                                triangles.push([ids[k - 1], ids[k - 2], ids[k]]);
                            }
                        }
                    } else {
                        for k in 2..ids.len() {
                            triangles.push([ids[0], ids[k - 1], ids[k]]);
                        }
                    }
                }
            }
            "VERTICES" | "LINES" => {
                cursor.cells()?;
            }
            "POINT_DATA" => {
                data_count = cursor.usize("the point count")?;
                in_cell_data = false;
            }
            "CELL_DATA" => {
                data_count = cursor.usize("the cell count")?;
                in_cell_data = true;
            }
            "SCALARS" => {
                let name = cursor.word("an array name")?.to_string();
                cursor.word("the array type")?;
                let mut components = 1;
                if let Some(next) = cursor.peek() {
                    if let Ok(c) = next.parse::<usize>() {
                        components = c;
                        cursor.next();
                    }
                }
                if cursor
                    .peek()
                    .is_some_and(|t| t.eq_ignore_ascii_case("LOOKUP_TABLE"))
                {
                    cursor.skip(2);
                }
                let values = cursor.floats(components * data_count)?;
                cursor.skip_trailing_metadata();
                if !in_cell_data {
                    point_data.push(PointArray {
                        name,
                        components,
                        values,
                    });
                }
            }
            "VECTORS" | "NORMALS" => {
                let name = cursor.word("an array name")?.to_string();
                cursor.word("the array type")?;
                let values = cursor.floats(3 * data_count)?;
                cursor.skip_trailing_metadata();
                if !in_cell_data {
                    point_data.push(PointArray {
                        name,
                        components: 3,
                        values,
                    });
                }
            }
            "TEXTURE_COORDINATES" => {
                cursor.word("an array name")?;
                let dim = cursor.usize("the coordinate dimension")?;
                cursor.word("the array type")?;
                cursor.floats(dim * data_count)?;
                cursor.skip_trailing_metadata();
            }
            "TENSORS" => {
                cursor.word("an array name")?;
                cursor.word("the array type")?;
                cursor.floats(9 * data_count)?;
                cursor.skip_trailing_metadata();
            }
            "COLOR_SCALARS" => {
                cursor.word("an array name")?;
                let components = cursor.usize("the component count")?;
                cursor.floats(components * data_count)?;
            }
            "LOOKUP_TABLE" => {
                cursor.word("a table name")?;
                let n = cursor.usize("the table size")?;
                cursor.skip(4 * n);
            }
            "FIELD" => {
                cursor.word("a field name")?;
                let arrays = cursor.usize("the array count")?;
                for _ in 0..arrays {
                    let name = cursor.word("an array name")?.to_string();
                    let components = cursor.usize("the component count")?;
                    let tuples = cursor.usize("the tuple count")?;
                    cursor.word("the array type")?;
                    let values = cursor.floats(components * tuples)?;
                    cursor.skip_trailing_metadata();
                    if !in_cell_data {
                        point_data.push(PointArray {
                            name,
                            components,
                            values,
                        });
                    }
                }
            }
            "METADATA" => cursor.skip_metadata(),
            other => return Err(cursor.error(format!("unexpected keyword '{other}'"))),
        }
    }

    let mesh = TriangleMesh::new(vertices, triangles).map_err(|source| InputError::Mesh {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(VtkPolyData { mesh, point_data })
}

/// Writes an ASCII legacy VTK file with optional scalar point data.
pub fn write_vtk(
    path: &Path,
    mesh: &TriangleMesh,
    scalars: &[(&str, &[f64])],
) -> Result<(), InputError> {
    let file = fs::File::create(path).map_err(|e| InputError::io(path, e))?;
    let mut out = BufWriter::new(file);
    write_vtk_to(&mut out, mesh, scalars).map_err(|e| InputError::io(path, e))
}

fn write_vtk_to<W: Write>(
    out: &mut W,
    mesh: &TriangleMesh,
    scalars: &[(&str, &[f64])],
) -> std::io::Result<()> {
    let mut buffer = ryu::Buffer::new();
    writeln!(out, "# vtk DataFile Version 3.0")?;
    writeln!(out, "groups")?;
    writeln!(out, "ASCII")?;
    writeln!(out, "DATASET POLYDATA")?;
    writeln!(out, "POINTS {} double", mesh.vertex_count())?;
    for v in &mesh.vertices {
        write!(out, "{}", buffer.format(v.x))?;
        write!(out, " {}", buffer.format(v.y))?;
        writeln!(out, " {}", buffer.format(v.z))?;
    }
    writeln!(
        out,
        "POLYGONS {} {}",
        mesh.triangle_count(),
        4 * mesh.triangle_count()
    )?;
    for [a, b, c] in &mesh.triangles {
        writeln!(out, "3 {a} {b} {c}")?;
    }
    if !scalars.is_empty() {
        writeln!(out, "POINT_DATA {}", mesh.vertex_count())?;
        for (name, values) in scalars {
            writeln!(out, "SCALARS {name} double 1")?;
            writeln!(out, "LOOKUP_TABLE default")?;
            for &v in values.iter() {
                writeln!(out, "{}", buffer.format(v))?;
            }
        }
    }
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sphere::icosphere;
    use tempfile::tempdir;

    const TETRA: &str = "# vtk DataFile Version 3.0
tetra
ASCII
DATASET POLYDATA
POINTS 4 float
0 0 1  0.94 0 -0.33
-0.47 0.82 -0.33 -0.47 -0.82 -0.33
POLYGONS 4 16
3 0 1 2
3 0 2 3
3 0 3 1
3 1 3 2
POINT_DATA 4
SCALARS curvature float 1
LOOKUP_TABLE default
0.1 0.2 0.3 0.4
FIELD FieldData 1
Landmarks 1 4 int
0 2 0 1
";

    #[test]
    fn test_parse_points_polygons_and_arrays() {
        let data = parse_vtk(Path::new("tetra.vtk"), TETRA).unwrap();
        assert_eq!(data.mesh.vertex_count(), 4);
        assert_eq!(data.mesh.triangles, vec![[0, 1, 2], [0, 2, 3], [0, 3, 1], [1, 3, 2]]);
        assert_eq!(
            data.array("curvature").unwrap().values,
            vec![0.1, 0.2, 0.3, 0.4]
        );
        assert_eq!(
            data.array("Landmarks").unwrap().first_component(),
            vec![0.0, 2.0, 0.0, 1.0]
        );
    }

    #[test]
    fn test_quads_are_split_into_fans() {
        let quad = "# vtk DataFile Version 3.0\nq\nASCII\nDATASET POLYDATA\nPOINTS 4 float\n0 0 0 1 0 0 1 1 0 0 1 0\nPOLYGONS 1 5\n4 0 1 2 3\n";
        let data = parse_vtk(Path::new("quad.vtk"), quad).unwrap();
        assert_eq!(data.mesh.triangles, vec![[0, 1, 2], [0, 2, 3]]);
    }

    #[test]
    fn test_metadata_blocks_are_skipped_between_sections() {
        let text = "# vtk DataFile Version 4.2
slicer
ASCII
DATASET POLYDATA
POINTS 4 float
0 0 1  0.94 0 -0.33
-0.47 0.82 -0.33 -0.47 -0.82 -0.33
METADATA
INFORMATION 2
NAME L2_NORM_RANGE LOCATION vtkDataArray
DATA 2 1 1
NAME L2_NORM_FINITE_RANGE LOCATION vtkDataArray
DATA 2 1 1

POLYGONS 4 16
3 0 1 2
3 0 2 3
3 0 3 1
3 1 3 2
POINT_DATA 4
NORMALS Normals float
0 0 1 1 0 0 0 1 0 0 -1 0
METADATA
INFORMATION 0

FIELD FieldData 2
thickness 1 4 double
2.5 2.5 3 3
METADATA
COMPONENT_NAMES
t
INFORMATION 0

Landmarks 1 4 int
0 1 0 2
";
        let data = parse_vtk(Path::new("slicer.vtk"), text).unwrap();
        assert_eq!(data.mesh.triangle_count(), 4);
        assert_eq!(data.array("Normals").unwrap().components, 3);
        assert_eq!(
            data.array("thickness").unwrap().values,
            vec![2.5, 2.5, 3.0, 3.0]
        );
        assert_eq!(
            data.array("Landmarks").unwrap().first_component(),
            vec![0.0, 1.0, 0.0, 2.0]
        );
    }

    #[test]
    fn test_metadata_without_blank_line_stops_at_next_section() {
        let text = "# vtk DataFile Version 4.2\nm\nASCII\nDATASET POLYDATA\nPOINTS 3 float\n1 0 0 0 1 0 0 0 1\nMETADATA\nINFORMATION 0\nPOLYGONS 1 4\n3 0 1 2\n";
        let data = parse_vtk(Path::new("m.vtk"), text).unwrap();
        assert_eq!(data.mesh.triangles, vec![[0, 1, 2]]);
    }

    #[test]
    fn test_offsets_and_connectivity_layout() {
        let text = "# vtk DataFile Version 5.1
vtk9
ASCII
DATASET POLYDATA
POINTS 5 float
0 0 1 1 0 0 0 1 0 -1 0 0
0 -1 0
POLYGONS 4 10
OFFSETS vtktypeint64
0 3 6 10
CONNECTIVITY vtktypeint64
0 1 2 0 2 3
0 3 4 1
LINES 2 2
OFFSETS vtktypeint64
0 2
CONNECTIVITY vtktypeint64
1 3
POINT_DATA 5
SCALARS sulc double 1
LOOKUP_TABLE default
1 2 3 4 5
";
        let data = parse_vtk(Path::new("vtk9.vtk"), text).unwrap();
        assert_eq!(
            data.mesh.triangles,
            vec![[0, 1, 2], [0, 2, 3], [0, 3, 4], [0, 4, 1]]
        );
        assert_eq!(data.array("sulc").unwrap().values.len(), 5);
    }

    #[test]
    fn test_offsets_past_connectivity_are_rejected() {
        let text = "# vtk DataFile Version 5.1\nbad\nASCII\nDATASET POLYDATA\nPOINTS 3 float\n1 0 0 0 1 0 0 0 1\nPOLYGONS 2 3\nOFFSETS vtktypeint64\n0 4\nCONNECTIVITY vtktypeint64\n0 1 2\n";
        let err = parse_vtk(Path::new("bad.vtk"), text).unwrap_err();
        assert!(matches!(err, InputError::Parse { .. }));
    }

    #[test]
    fn test_truncated_points_report_a_line() {
        let broken = "# vtk DataFile Version 3.0\nx\nASCII\nDATASET POLYDATA\nPOINTS 2 float\n0 0 0 1 0\n";
        let err = parse_vtk(Path::new("broken.vtk"), broken).unwrap_err();
        assert!(matches!(err, InputError::Parse { .. }));
    }

    #[test]
    fn test_written_file_reads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sphere.vtk");
        let mesh = icosphere(1);
        let values: Vec<f64> = (0..mesh.vertex_count()).map(|i| i as f64 * 0.5).collect();
        write_vtk(&path, &mesh, &[("depth", values.as_slice())]).unwrap();
        let data = read_vtk(&path).unwrap();
        assert_eq!(data.mesh, mesh);
        assert_eq!(data.array("depth").unwrap().values, values);
    }
}
