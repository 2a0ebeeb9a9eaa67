//! Narrow file interfaces for the optimizer's collaborators.
//!
//! The core consumes a triangle mesh and a flat list of per-vertex cone
//! angles, and produces plain-text coordinate vectors and dense matrices for
//! downstream reconstruction and plotting. Only the formats those
//! collaborators actually exchange are implemented here: a minimal OBJ
//! triangle reader, whitespace-separated scalar lists, and fixed-precision
//! writers (17 significant digits, enough to round-trip an `f64`).

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use nalgebra::{DMatrix, DVector, Point3};

use crate::error::{MetricError, Result};

/// Read vertex positions and triangle faces from a Wavefront OBJ file.
///
/// Only `v` and `f` records are honored; texture/normal indices in face
/// records are stripped, and polygonal faces are rejected.
pub fn read_obj<P: AsRef<Path>>(path: P) -> Result<(Vec<Point3<f64>>, Vec<[usize; 3]>)> {
    let path = path.as_ref();
    let load_error = |message: String| MetricError::LoadError {
        path: path.to_path_buf(),
        message,
    };

    let file = File::open(path)?;
    let mut vertices = Vec::new();
    let mut faces = Vec::new();

    for (line_number, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("v") => {
                let mut coord = |name| {
                    tokens
                        .next()
                        .and_then(|t| t.parse::<f64>().ok())
                        .ok_or_else(|| {
                            load_error(format!("bad {} coordinate on line {}", name, line_number + 1))
                        })
                };
                let x = coord("x")?;
                let y = coord("y")?;
                let z = coord("z")?;
                vertices.push(Point3::new(x, y, z));
            }
            Some("f") => {
                let indices: Vec<usize> = tokens
                    .map(|t| {
                        // "v", "v/vt", "v//vn", "v/vt/vn" all start with the
                        // vertex index; OBJ indices are 1-based.
                        t.split('/')
                            .next()
                            .and_then(|v| v.parse::<usize>().ok())
                            .and_then(|v| v.checked_sub(1))
                            .ok_or_else(|| {
                                load_error(format!("bad face index on line {}", line_number + 1))
                            })
                    })
                    .collect::<Result<_>>()?;
                if indices.len() != 3 {
                    return Err(load_error(format!(
                        "face on line {} has {} vertices; only triangles are supported",
                        line_number + 1,
                        indices.len()
                    )));
                }
                faces.push([indices[0], indices[1], indices[2]]);
            }
            _ => {}
        }
    }

    if faces.is_empty() {
        return Err(load_error("no faces found".to_string()));
    }
    Ok((vertices, faces))
}

/// Read a flat list of whitespace/newline-separated scalars, one per vertex.
pub fn read_scalar_list<P: AsRef<Path>>(path: P) -> Result<Vec<f64>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let mut values = Vec::new();
    for line in BufReader::new(file).lines() {
        for token in line?.split_whitespace() {
            let value = token.parse::<f64>().map_err(|_| MetricError::LoadError {
                path: path.to_path_buf(),
                message: format!("bad scalar value {:?}", token),
            })?;
            values.push(value);
        }
    }
    Ok(values)
}

/// Write a vector as plain text, one value per line with 17 significant
/// digits.
pub fn write_vector<P: AsRef<Path>>(path: P, vector: &DVector<f64>) -> Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    for value in vector.iter() {
        writeln!(file, "{:.16e}", value)?;
    }
    Ok(())
}

/// Write a dense matrix as plain text, one whitespace-separated row per line.
pub fn write_matrix<P: AsRef<Path>>(path: P, matrix: &DMatrix<f64>) -> Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    for i in 0..matrix.nrows() {
        let row: Vec<String> =
            (0..matrix.ncols()).map(|j| format!("{:.16e}", matrix[(i, j)])).collect();
        writeln!(file, "{}", row.join(" "))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("flatiron_io_test_{}_{}", std::process::id(), name));
        dir
    }

    #[test]
    fn test_read_obj_triangles() {
        let path = temp_path("tri.obj");
        std::fs::write(
            &path,
            "# comment\nv 0 0 0\nv 1 0 0\nv 0 1 0\nvn 0 0 1\nf 1/1/1 2/2/1 3/3/1\n",
        )
        .unwrap();

        let (vertices, faces) = read_obj(&path).unwrap();
        assert_eq!(vertices.len(), 3);
        assert_eq!(faces, vec![[0, 1, 2]]);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_read_obj_rejects_quads() {
        let path = temp_path("quad.obj");
        std::fs::write(&path, "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf 1 2 3 4\n").unwrap();
        assert!(matches!(read_obj(&path), Err(MetricError::LoadError { .. })));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_scalar_list_round_trip() {
        let path = temp_path("angles.txt");
        std::fs::write(&path, "6.28318530717958648\n3.14159265358979324\n").unwrap();
        let values = read_scalar_list(&path).unwrap();
        assert_eq!(values.len(), 2);
        assert!((values[0] - 2.0 * std::f64::consts::PI).abs() < 1e-15);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_write_vector_round_trips_f64() {
        let path = temp_path("coords.txt");
        let vector = DVector::from_vec(vec![1.0 / 3.0, -2.0e-15, 7.25]);
        write_vector(&path, &vector).unwrap();

        let back = read_scalar_list(&path).unwrap();
        for (a, b) in vector.iter().zip(&back) {
            assert_eq!(a, b, "17 significant digits must round-trip");
        }
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_write_matrix_layout() {
        let path = temp_path("grid.txt");
        let matrix = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        write_matrix(&path, &matrix).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].split_whitespace().count(), 2);
        std::fs::remove_file(&path).ok();
    }
}
