//! Text matrix files.
//!
//! ```text
//! <rows>
//! <cols>
//! <value>      rows*cols lines, row-major
//! ```
//!
//! `nan`, `NaN` and `NAN` mark a missing value. Paths ending in `.gz` are
//! read and written gzip-compressed.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use flate2::{read::MultiGzDecoder, write::GzEncoder, Compression};
use log::{info, warn};
use ndarray::{Array2, ArrayBase, Data, Ix2};
use rand::Rng;

use crate::{alloc, DataType, PccError, MISSING};

fn is_gzip(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "gz")
}

/// Parse one element token.
pub fn parse_value(token: &str) -> Option<DataType> {
    match token {
        "nan" | "NaN" | "NAN" => Some(MISSING),
        other => other.parse().ok(),
    }
}

fn parse_dimension(token: &str) -> Option<usize> {
    // Dimensions are written as numbers and truncated, so "64.0" is 64.
    let value: f64 = token.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some(value.trunc() as usize)
}

/// Read a matrix from `reader`. `path` is only used in error messages.
pub fn parse_matrix<R: BufRead>(reader: R, path: &Path) -> Result<Array2<DataType>, PccError> {
    let mut lines = reader
        .lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line))
        .filter(|(_, line)| line.as_ref().map_or(true, |l| !l.trim().is_empty()));

    let mut next_token = |what: &str| -> Result<(usize, String), PccError> {
        match lines.next() {
            Some((line_no, Ok(line))) => Ok((line_no, line.trim().to_string())),
            Some((_, Err(e))) => Err(PccError::io(path, e)),
            None => Err(PccError::parse(
                path,
                0,
                format!("unexpected end of file, expected {}", what),
            )),
        }
    };

    let (line_no, token) = next_token("row count")?;
    let rows = parse_dimension(&token).ok_or_else(|| {
        PccError::parse(path, line_no, format!("invalid row count '{}'", token))
    })?;
    let (line_no, token) = next_token("column count")?;
    let cols = parse_dimension(&token).ok_or_else(|| {
        PccError::parse(path, line_no, format!("invalid column count '{}'", token))
    })?;

    let mut matrix = alloc::zeroed("matrix file", rows, cols)?;
    for slot in matrix.iter_mut() {
        let (line_no, token) = next_token("matrix element")?;
        *slot = parse_value(&token).ok_or_else(|| {
            PccError::parse(path, line_no, format!("invalid value '{}'", token))
        })?;
    }

    if let Some((line_no, _)) = lines.next() {
        warn!(
            "{}: ignoring trailing content from line {}",
            path.display(),
            line_no
        );
    }

    Ok(matrix)
}

/// Read a matrix file, decompressing `.gz` paths.
pub fn read_matrix(path: impl AsRef<Path>) -> Result<Array2<DataType>, PccError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| PccError::io(path, e))?;
    if is_gzip(path) {
        parse_matrix(BufReader::new(MultiGzDecoder::new(file)), path)
    } else {
        parse_matrix(BufReader::new(file), path)
    }
}

/// Serialize `matrix` in the text format. Values use the shortest
/// representation that reads back to the same number.
pub fn write_matrix_to<W, S>(mut writer: W, matrix: &ArrayBase<S, Ix2>) -> std::io::Result<()>
where
    W: Write,
    S: Data<Elem = DataType>,
{
    writeln!(writer, "{}", matrix.nrows())?;
    writeln!(writer, "{}", matrix.ncols())?;
    for value in matrix.iter() {
        writeln!(writer, "{}", value)?;
    }
    writer.flush()
}

/// Write `matrix` to `path`, compressing `.gz` paths.
pub fn write_matrix<S>(path: impl AsRef<Path>, matrix: &ArrayBase<S, Ix2>) -> Result<(), PccError>
where
    S: Data<Elem = DataType>,
{
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| PccError::io(path, e))?;
    let result = if is_gzip(path) {
        let mut enc = GzEncoder::new(BufWriter::new(file), Compression::default());
        write_matrix_to(&mut enc, matrix)
            .and_then(|_| enc.finish())
            .and_then(|mut inner| inner.flush())
    } else {
        write_matrix_to(BufWriter::new(file), matrix)
    };
    result.map_err(|e| PccError::io(path, e))
}

/// Flat row-major positions marked missing in a synthesized matrix: the first
/// element, the last element and the last element of the next-to-last row.
pub fn synthetic_missing_positions(rows: usize, cols: usize) -> Vec<usize> {
    let len = rows * cols;
    let mut positions = Vec::with_capacity(3);
    if len == 0 {
        return positions;
    }
    positions.push(0);
    positions.push(len - 1);
    if let Some(corner) = ((rows - 1) * cols).checked_sub(1) {
        positions.push(corner);
    }
    positions.sort_unstable();
    positions.dedup();
    positions
}

/// Uniform `[0, 1)` matrix drawn from `rng`, with the positions from
/// [`synthetic_missing_positions`] set to the missing sentinel.
///
/// Filled serially so a given seed always yields the same matrix.
pub fn synthesize<R>(rows: usize, cols: usize, rng: &mut R) -> Result<Array2<DataType>, PccError>
where
    R: Rng,
{
    let mut matrix = alloc::zeroed("synthetic matrix", rows, cols)?;
    for slot in matrix.iter_mut() {
        *slot = rng.gen::<DataType>();
    }
    for flat in synthetic_missing_positions(rows, cols) {
        matrix[[flat / cols, flat % cols]] = MISSING;
    }
    Ok(matrix)
}

/// Read `path`, or when it does not exist synthesize a `rows x cols` matrix
/// and save it there so later runs reuse it.
///
/// The flag is true when the matrix was synthesized.
pub fn load_or_synthesize<R>(
    path: impl AsRef<Path>,
    rows: usize,
    cols: usize,
    rng: &mut R,
) -> Result<(Array2<DataType>, bool), PccError>
where
    R: Rng,
{
    let path = path.as_ref();
    if path.exists() {
        let matrix = read_matrix(path)?;
        info!(
            "read {}x{} matrix from {}",
            matrix.nrows(),
            matrix.ncols(),
            path.display()
        );
        return Ok((matrix, false));
    }

    let matrix = synthesize(rows, cols, rng)?;
    write_matrix(path, &matrix)?;
    info!(
        "{} not found, wrote synthetic {}x{} matrix",
        path.display(),
        rows,
        cols
    );
    Ok((matrix, true))
}
