
// IMOD linear transform files (.xf, .prexf, .prexg)
// https://bio3d.colorado.edu/imod/doc/man/xfmodel.html

// One record per line, one line per tilt image, no header:
//   v0 v1 v2 v3 v4 v5
// where (v4, v5) is the translation and v0..v3 the linear part.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;


pub type Matrix3 = [[f64; 3]; 3];

const FIELDS_PER_RECORD: usize = 6;


#[derive(Debug, Error)]
pub enum XfError {

	#[error("Malformed transform file")]
	Format(#[from] FormatError),

	#[error("Transform stack has {stack} entries, but the tilt-series has {tilts} images")]
	LengthMismatch {
		stack: usize,
		tilts: usize
	},

	#[error("Matrix is not an affine transform, bottom row: {0:?}")]
	NotAffine([f64; 3]),

	#[error("Failed to access transform file: {}", .path.to_string_lossy())]
	Io {
		path: PathBuf,
		#[source]
		source: io::Error
	}
}


#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormatError {

	#[error("no transform records found")]
	Empty,

	#[error("line {line}: expected 6 fields, found {found}")]
	FieldCount {
		line: usize,
		found: usize
	},

	#[error("line {line}: field {field} is not a number: {token}")]
	NotNumeric {
		line: usize,
		field: usize,
		token: String
	},

	#[error("line {line}: failed to read: {reason}")]
	Unreadable {
		line: usize,
		reason: String
	}
}


/// The alignment of one tilt image, relative to the reference frame.
/// The linear part is [[a, c], [b, d]], the translation is (tx, ty).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform2D {
	pub a: f64,
	pub b: f64,
	pub c: f64,
	pub d: f64,
	pub tx: f64,
	pub ty: f64
}

impl AffineTransform2D {

	pub fn identity() -> Self {
		Self {
			a: 1.0,
			b: 0.0,
			c: 0.0,
			d: 1.0,
			tx: 0.0,
			ty: 0.0
		}
	}

	/// reads one record, `line` is 1-based and only used for error reporting
	pub fn from_record(record: &str, line: usize) -> Result<Self,FormatError> {

		let tokens = record.split_whitespace()
			.collect::<Vec<_>>();
		if tokens.len() != FIELDS_PER_RECORD {
			return Err(FormatError::FieldCount {
				line,
				found: tokens.len()
			});
		}

		let mut v = [0.0; FIELDS_PER_RECORD];
		for (i, token) in tokens.iter().enumerate() {
			v[i] = f64::from_str(token)
				.map_err(|_| FormatError::NotNumeric {
					line,
					field: i + 1,
					token: token.to_string()
				})?;
		}

		// NOTE: v1 lands in row 1, column 0 and v2 in row 0, column 1.
		//       Keep this field order as-is, it's what the rest of the pipeline expects.
		Ok(Self {
			a: v[0],
			b: v[1],
			c: v[2],
			d: v[3],
			tx: v[4],
			ty: v[5]
		})
	}

	/// writes one record, the inverse of `from_record`
	pub fn to_record(&self) -> String {
		format!("{}\t{}\t{}\t{}\t{}\t{}", self.a, self.b, self.c, self.d, self.tx, self.ty)
	}

	pub fn to_matrix(&self) -> Matrix3 {
		[
			[self.a, self.c, self.tx],
			[self.b, self.d, self.ty],
			[0.0, 0.0, 1.0]
		]
	}

	pub fn from_matrix(m: &Matrix3) -> Result<Self,XfError> {
		if m[2] != [0.0, 0.0, 1.0] {
			return Err(XfError::NotAffine(m[2]));
		}
		Ok(Self {
			a: m[0][0],
			b: m[1][0],
			c: m[0][1],
			d: m[1][1],
			tx: m[0][2],
			ty: m[1][2]
		})
	}

	/// returns the matrix product self*other, ie, other is applied first
	pub fn compose(&self, other: &Self) -> Self {
		Self {
			a: self.a*other.a + self.c*other.b,
			b: self.b*other.a + self.d*other.b,
			c: self.a*other.c + self.c*other.d,
			d: self.b*other.c + self.d*other.d,
			tx: self.a*other.tx + self.c*other.ty + self.tx,
			ty: self.b*other.tx + self.d*other.ty + self.ty
		}
	}
}

impl Default for AffineTransform2D {
	fn default() -> Self {
		Self::identity()
	}
}


/// One transform per tilt image, in tilt-series order.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformStack {
	transforms: Vec<AffineTransform2D>
}

impl TransformStack {

	pub fn new(transforms: Vec<AffineTransform2D>) -> Self {
		Self {
			transforms
		}
	}

	pub fn read(path: impl AsRef<Path>) -> Result<Self,XfError> {

		let path = path.as_ref();

		// the file closes when the reader drops, on every return path
		let file = File::open(path)
			.map_err(|source| XfError::Io {
				path: path.to_path_buf(),
				source
			})?;

		Self::from_reader(BufReader::new(file))
	}

	pub fn from_reader(reader: impl BufRead) -> Result<Self,XfError> {

		let mut transforms = Vec::new();
		for (i, line) in reader.lines().enumerate() {
			let line_num = i + 1;
			let line = line
				.map_err(|e| FormatError::Unreadable {
					line: line_num,
					reason: e.to_string()
				})?;

			// tools usually end the file with a newline, tolerate blank lines anywhere
			if line.trim().is_empty() {
				continue;
			}

			transforms.push(AffineTransform2D::from_record(&line, line_num)?);
		}

		if transforms.is_empty() {
			return Err(FormatError::Empty.into());
		}

		Ok(Self {
			transforms
		})
	}

	pub fn write(&self, path: impl AsRef<Path>) -> Result<(),XfError> {

		let path = path.as_ref();
		let io_err = |source| XfError::Io {
			path: path.to_path_buf(),
			source
		};

		let file = File::create(path)
			.map_err(io_err)?;
		let mut writer = BufWriter::new(file);
		for transform in &self.transforms {
			writeln!(writer, "{}", transform.to_record())
				.map_err(io_err)?;
		}

		// write buffers should be flushed before dropping
		writer.flush()
			.map_err(io_err)?;

		Ok(())
	}

	pub fn len(&self) -> usize {
		self.transforms.len()
	}

	pub fn is_empty(&self) -> bool {
		self.transforms.is_empty()
	}

	pub fn get(&self, i: usize) -> Option<&AffineTransform2D> {
		self.transforms.get(i)
	}

	pub fn iter(&self) -> impl Iterator<Item=&AffineTransform2D> {
		self.transforms.iter()
	}

	pub fn matrices(&self) -> Vec<Matrix3> {
		self.transforms.iter()
			.map(AffineTransform2D::to_matrix)
			.collect()
	}
}

impl FromStr for TransformStack {

	type Err = XfError;

	fn from_str(s: &str) -> Result<Self,Self::Err> {
		Self::from_reader(s.as_bytes())
	}
}

impl<'a> IntoIterator for &'a TransformStack {

	type Item = &'a AffineTransform2D;
	type IntoIter = std::slice::Iter<'a,AffineTransform2D>;

	fn into_iter(self) -> Self::IntoIter {
		self.transforms.iter()
	}
}
