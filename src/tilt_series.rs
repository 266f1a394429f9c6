
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use toml::Table;

use crate::config::to_f64;
use crate::xf::{AffineTransform2D, TransformStack, XfError};


#[derive(Debug, Clone, PartialEq)]
pub struct TiltSeries {
	pub ts_id: String,
	/// in Angstroms per pixel
	pub sampling_rate: f64,
	pub images: Vec<TiltImage>
}


#[derive(Debug, Clone, PartialEq)]
pub struct TiltImage {
	pub object_id: u32,
	pub location: Location,
	/// in degrees
	pub tilt_angle: f64,
	pub sampling_rate: f64,
	/// disabled images are excluded views
	pub enabled: bool,
	pub transform: Option<AffineTransform2D>
}


/// Where an image lives: a 1-based section index into a stack file
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
	pub index: u32,
	pub path: PathBuf
}


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AngleOrder {
	Natural,
	Reversed
}


impl TiltSeries {

	/// makes a series with one image per angle, each one a section of the same stack file
	pub fn new(ts_id: impl Into<String>, sampling_rate: f64, stack: impl AsRef<Path>, angles: &[f64]) -> Self {
		let stack = stack.as_ref();
		Self {
			ts_id: ts_id.into(),
			sampling_rate,
			images: angles.iter()
				.enumerate()
				.map(|(i, &tilt_angle)| TiltImage {
					object_id: i as u32 + 1,
					location: Location {
						index: i as u32 + 1,
						path: stack.to_path_buf()
					},
					tilt_angle,
					sampling_rate,
					enabled: true,
					transform: None
				})
				.collect()
		}
	}

	/// Reads a series description file, eg:
	/// ```toml
	/// id = "TS_01"
	/// sampling_rate = 1.35
	/// stack = "TS_01.st"
	/// angles = [-3.0, 0.0, 3.0]
	/// excluded = [1]
	/// transforms = "TS_01.xf"
	/// ```
	/// Relative paths are relative to the folder of the description file.
	pub fn read(path: impl AsRef<Path>) -> Result<Self> {

		let path = path.as_ref();
		let toml = fs::read_to_string(path)
			.with_context(|| format!("Failed to read tilt-series file at: {}", path.to_string_lossy()))?
			.parse::<Table>()
			.with_context(|| format!("Failed to parse tilt-series file at: {}", path.to_string_lossy()))?;
		let dir = path.parent()
			.unwrap_or(Path::new("."));

		let ts_id = toml.get("id")
			.context("Missing id")?
			.as_str()
			.context("id was not a string")?;

		let sampling_rate = toml.get("sampling_rate")
			.context("Missing sampling_rate")
			.and_then(to_f64)
			.context("Bad sampling_rate")?;

		let stack = toml.get("stack")
			.context("Missing stack")?
			.as_str()
			.context("stack was not a string")?;

		let angles = toml.get("angles")
			.context("Missing angles")?
			.as_array()
			.context("angles was not an array")?
			.iter()
			.map(to_f64)
			.collect::<Result<Vec<_>>>()
			.context("Bad angles")?;
		if angles.is_empty() {
			bail!("Tilt-series {} has no angles", ts_id);
		}

		let mut ts = Self::new(ts_id, sampling_rate, dir.join(stack), &angles);

		// read the excluded views, if any
		if let Some(excluded) = toml.get("excluded") {
			let excluded = excluded.as_array()
				.context("excluded was not an array")?;
			for view in excluded {
				let view = view.as_integer()
					.context(format!("excluded view was not an integer: {}", view))?;
				let image = usize::try_from(view).ok()
					.and_then(|view| view.checked_sub(1))
					.and_then(|i| ts.images.get_mut(i))
					.context(format!("excluded view {} is not in 1..={}", view, angles.len()))?;
				image.enabled = false;
			}
		}

		// read the previous alignment, if any
		if let Some(transforms) = toml.get("transforms") {
			let transforms = transforms.as_str()
				.context("transforms was not a string")?;
			let transforms_path = dir.join(transforms);
			let stack = TransformStack::read(&transforms_path)
				.with_context(|| format!("Failed to read transforms for tilt-series {}", ts_id))?;
			ts = ts.with_transforms(&stack)
				.with_context(|| format!("Failed to apply transforms from: {}", transforms_path.to_string_lossy()))?;
		}

		Ok(ts)
	}

	pub fn len(&self) -> usize {
		self.images.len()
	}

	pub fn is_empty(&self) -> bool {
		self.images.is_empty()
	}

	/// Returns a copy of this series where image i carries transform i.
	/// Nothing else about any image changes.
	pub fn with_transforms(&self, stack: &TransformStack) -> Result<Self,XfError> {
		self.check_len(stack)?;
		Ok(self.map_transforms(stack, |_prev, next| *next))
	}

	/// Like `with_transforms`, but images that are already aligned get the new transform
	/// composed on top of the existing one, ie prev*next
	pub fn with_composed_transforms(&self, stack: &TransformStack) -> Result<Self,XfError> {
		self.check_len(stack)?;
		Ok(self.map_transforms(stack, |prev, next| {
			match prev {
				Some(prev) => prev.compose(next),
				None => *next
			}
		}))
	}

	fn check_len(&self, stack: &TransformStack) -> Result<(),XfError> {
		if stack.len() != self.len() {
			return Err(XfError::LengthMismatch {
				stack: stack.len(),
				tilts: self.len()
			});
		}
		Ok(())
	}

	fn map_transforms<F>(&self, stack: &TransformStack, f: F) -> Self
		where
			F: Fn(Option<&AffineTransform2D>, &AffineTransform2D) -> AffineTransform2D
	{
		Self {
			ts_id: self.ts_id.clone(),
			sampling_rate: self.sampling_rate,
			images: self.images.iter()
				.zip(stack)
				.map(|(image, next)| TiltImage {
					transform: Some(f(image.transform.as_ref(), next)),
					.. image.clone()
				})
				.collect()
		}
	}

	/// the series is considered aligned when its first image has a transform
	pub fn has_transforms(&self) -> bool {
		self.images.first()
			.map(|image| image.transform.is_some())
			.unwrap_or(false)
	}

	/// all the transforms, in series order, where images without one get the identity
	pub fn transforms(&self) -> TransformStack {
		TransformStack::new(self.images.iter()
			.map(|image| image.transform.unwrap_or_default())
			.collect())
	}

	/// 1-based positions of the disabled images
	pub fn excluded_views(&self) -> Vec<u32> {
		self.images.iter()
			.enumerate()
			.filter(|(_, image)| !image.enabled)
			.map(|(i, _)| i as u32 + 1)
			.collect()
	}

	pub fn stack_path(&self) -> Option<&Path> {
		self.images.first()
			.map(|image| image.location.path.as_path())
	}

	/// the stack file name, without folders or extension, eg `TS_01` for `/data/TS_01.st`
	pub fn stack_stem(&self) -> Option<String> {
		self.stack_path()
			.and_then(Path::file_stem)
			.map(|stem| stem.to_string_lossy().to_string())
	}

	/// writes the tilt angles, one per line, as IMOD .tlt/.rawtlt files
	pub fn write_tlt(&self, path: impl AsRef<Path>, order: AngleOrder) -> Result<()> {

		let path = path.as_ref();
		let mut angles = self.images.iter()
			.map(|image| image.tilt_angle)
			.collect::<Vec<_>>();
		if order == AngleOrder::Reversed {
			angles.reverse();
		}

		let file = File::create(path)
			.with_context(|| format!("Failed to open file for writing: {}", path.to_string_lossy()))?;
		let mut writer = BufWriter::new(file);
		for angle in angles {
			writeln!(writer, "{:.3}", angle)
				.with_context(|| format!("Failed to write angle file: {}", path.to_string_lossy()))?;
		}
		writer.flush()
			.with_context(|| format!("Failed to write angle file: {}", path.to_string_lossy()))?;

		Ok(())
	}
}


#[cfg(test)]
mod test {

	use assert_fs::TempDir;
	use galvanic_assert::{assert_that, matchers::*};
	use indoc::indoc;

	use super::*;


	fn series(n: usize) -> TiltSeries {
		let angles = (0 .. n)
			.map(|i| i as f64*3.0 - 60.0)
			.collect::<Vec<_>>();
		TiltSeries::new("TS_01", 1.35, "/data/TS_01.st", &angles)
	}

	fn shifts(n: usize) -> TransformStack {
		TransformStack::new((0 .. n)
			.map(|i| AffineTransform2D { tx: i as f64, ty: -(i as f64), ..AffineTransform2D::identity() })
			.collect())
	}


	#[test]
	fn new() {
		let ts = series(3);
		assert_that!(&ts.len(), eq(3));
		assert_that!(&ts.images[2].location, eq(Location { index: 3, path: PathBuf::from("/data/TS_01.st") }));
		assert_that!(&ts.images[2].tilt_angle, eq(-54.0));
		assert_that!(&ts.has_transforms(), eq(false));
	}


	#[test]
	fn apply() {

		let mut ts = series(4);
		ts.images[1].enabled = false;
		let stack = shifts(4);

		let aligned = ts.with_transforms(&stack)
			.expect("Failed to apply");

		assert_that!(&aligned.len(), eq(4));
		for (i, (before, after)) in ts.images.iter().zip(&aligned.images).enumerate() {
			assert_that!(&after.transform, eq(stack.get(i).cloned()));

			// everything else stays the same
			let mut after = after.clone();
			after.transform = None;
			assert_that!(&after, eq(before.clone()));
		}
		assert_that!(&aligned.ts_id, eq(ts.ts_id.clone()));
		assert_that!(&aligned.sampling_rate, eq(ts.sampling_rate));
	}


	#[test]
	fn apply_twice() {
		let ts = series(5);
		let stack = shifts(5);
		let once = ts.with_transforms(&stack)
			.expect("Failed to apply");
		let twice = once.with_transforms(&stack)
			.expect("Failed to apply");
		assert_that!(&twice, eq(once));
	}


	#[test]
	fn apply_mismatch() {

		let ts = series(3);
		let before = ts.clone();

		for n in [2, 4] {
			let result = ts.with_transforms(&shifts(n));
			assert_that!(&matches!(result, Err(XfError::LengthMismatch { stack, tilts: 3 }) if stack == n), eq(true));
			let result = ts.with_composed_transforms(&shifts(n));
			assert_that!(&matches!(result, Err(XfError::LengthMismatch { .. })), eq(true));
		}

		assert_that!(&ts, eq(before));
	}


	#[test]
	fn apply_composed() {

		let scale = AffineTransform2D { a: 2.0, d: 2.0, ..AffineTransform2D::identity() };
		let mut ts = series(2);
		ts.images[0].transform = Some(scale);

		let stack = shifts(2);
		let aligned = ts.with_composed_transforms(&stack)
			.expect("Failed to apply");

		// the first image was already aligned, the second wasn't
		assert_that!(&aligned.images[0].transform, eq(Some(scale.compose(stack.get(0).unwrap()))));
		assert_that!(&aligned.images[1].transform, eq(stack.get(1).cloned()));
	}


	#[test]
	fn transforms() {
		let ts = series(2);
		assert_that!(&ts.transforms(), eq(TransformStack::new(vec![AffineTransform2D::identity(); 2])));
		let stack = shifts(2);
		let aligned = ts.with_transforms(&stack)
			.expect("Failed to apply");
		assert_that!(&aligned.transforms(), eq(stack));
		assert_that!(&aligned.has_transforms(), eq(true));
	}


	#[test]
	fn excluded_views() {
		let mut ts = series(5);
		ts.images[0].enabled = false;
		ts.images[3].enabled = false;
		assert_that!(&ts.excluded_views(), eq(vec![1, 4]));
	}


	#[test]
	fn stack_stem() {
		assert_that!(&series(1).stack_stem(), eq(Some("TS_01".to_string())));
	}


	#[test]
	fn tlt() {

		let dir = TempDir::new()
			.expect("Failed to make temp folder");
		let ts = TiltSeries::new("TS_01", 1.0, "TS_01.st", &[-3.0, 0.0, 2.5]);

		let path = dir.path().join("TS_01.tlt");
		ts.write_tlt(&path, AngleOrder::Natural)
			.expect("Failed to write");
		let tlt = fs::read_to_string(&path).unwrap();
		assert_that!(&tlt.as_str(), eq("-3.000\n0.000\n2.500\n"));

		let path = dir.path().join("TS_01.rawtlt");
		ts.write_tlt(&path, AngleOrder::Reversed)
			.expect("Failed to write");
		let tlt = fs::read_to_string(&path).unwrap();
		assert_that!(&tlt.as_str(), eq("2.500\n0.000\n-3.000\n"));
	}


	#[test]
	fn read() {

		let dir = TempDir::new()
			.expect("Failed to make temp folder");
		fs::write(dir.path().join("TS_07.xf"), indoc! { "
			1.0 0.0 0.0 1.0 2.5 -1.5
			1.0 0.0 0.0 1.0 0.0 0.0
			1.0 0.0 0.0 1.0 -2.5 1.5
		" }).unwrap();
		let path = dir.path().join("TS_07.toml");
		fs::write(&path, indoc! { r#"
			id = "TS_07"
			sampling_rate = 2
			stack = "TS_07.st"
			angles = [-3.0, 0.0, 3.0]
			excluded = [3]
			transforms = "TS_07.xf"
		"# }).unwrap();

		let ts = TiltSeries::read(&path)
			.expect("Failed to read");

		assert_that!(&ts.ts_id.as_str(), eq("TS_07"));
		assert_that!(&ts.sampling_rate, eq(2.0));
		let stack_path = dir.path().join("TS_07.st");
		assert_that!(&ts.stack_path(), eq(Some(stack_path.as_path())));
		assert_that!(&ts.excluded_views(), eq(vec![3]));
		assert_that!(&ts.images[0].transform.map(|t| t.tx), eq(Some(2.5)));
	}


	#[test]
	fn read_bad_excluded() {

		let dir = TempDir::new()
			.expect("Failed to make temp folder");
		let path = dir.path().join("TS_07.toml");
		fs::write(&path, indoc! { r#"
			id = "TS_07"
			sampling_rate = 2.0
			stack = "TS_07.st"
			angles = [-3.0, 0.0, 3.0]
			excluded = [4]
		"# }).unwrap();

		assert_that!(&TiltSeries::read(&path).is_err(), eq(true));
	}
}
