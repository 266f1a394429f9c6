
pub mod xcorr;
pub mod import;
pub mod reconstruction;


use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::imod::{Imod, Newstack};
use crate::logging::ResultExt;
use crate::tilt_series::TiltSeries;


/// The working folders for one tilt-series:
///   `<work>/tmp/<ts_id>/` for intermediate files
///   `<work>/extra/<ts_id>/` for results
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesDirs {
	pub ts_id: String,
	pub tmp: PathBuf,
	pub extra: PathBuf
}

impl SeriesDirs {

	pub fn create(work_dir: impl AsRef<Path>, ts_id: impl Into<String>) -> Result<Self> {

		let work_dir = work_dir.as_ref();
		let ts_id = ts_id.into();
		let dirs = Self {
			tmp: work_dir.join("tmp").join(&ts_id),
			extra: work_dir.join("extra").join(&ts_id),
			ts_id
		};

		for dir in [&dirs.tmp, &dirs.extra] {
			fs::create_dir_all(dir)
				.with_context(|| format!("Failed to create folder: {}", dir.to_string_lossy()))?;
		}

		Ok(dirs)
	}

	/// eg, `tmp/TS_01/TS_01.rawtlt` for `tmp_file(".rawtlt")`
	pub fn tmp_file(&self, suffix: &str) -> PathBuf {
		self.tmp.join(format!("{}{}", self.ts_id, suffix))
	}

	/// eg, `extra/TS_01/TS_01_preali.st` for `extra_file("_preali.st")`
	pub fn extra_file(&self, suffix: &str) -> PathBuf {
		self.extra.join(format!("{}{}", self.ts_id, suffix))
	}
}


/// Puts the series' images into `tmp/<ts_id>/<ts_id>.st`.
/// Already-aligned series get their transforms applied by newstack, others are just linked.
pub fn convert_input(imod: &Imod, ts: &TiltSeries, dirs: &SeriesDirs) -> Result<PathBuf> {

	let stack_path = ts.stack_path()
		.with_context(|| format!("Tilt-series {} has no images", ts.ts_id))?;
	let stack_path = fs::canonicalize(stack_path)
		.with_context(|| format!("Failed to find tilt-series stack: {}", stack_path.to_string_lossy()))?;
	let out_path = dirs.tmp_file(".st");

	// clear out anything left from a previous run
	if out_path.symlink_metadata().is_ok() {
		debug!("Removing old input stack: {}", out_path.to_string_lossy());
		fs::remove_file(&out_path)
			.with_context(|| format!("Failed to remove old input stack: {}", out_path.to_string_lossy()))
			.warn_err()
			.ok();
	}

	if ts.has_transforms() {

		info!("Applying the existing alignment of {}", ts.ts_id);

		let xf_path = dirs.tmp_file(".xf");
		ts.transforms()
			.write(&xf_path)
			.with_context(|| format!("Failed to write transforms for tilt-series {}", ts.ts_id))?;

		imod.run(&Newstack {
			input: stack_path,
			output: out_path.clone(),
			xform: Some(xf_path),
			.. Newstack::default()
		}, &dirs.tmp)?;

	} else {
		symlink(&stack_path, &out_path)
			.with_context(|| format!("Failed to link {} to {}", stack_path.to_string_lossy(), out_path.to_string_lossy()))?;
	}

	Ok(out_path)
}


#[cfg(test)]
mod test {

	use assert_fs::TempDir;
	use galvanic_assert::{assert_that, matchers::*};

	use crate::logging;
	use crate::xf::{AffineTransform2D, TransformStack};
	use super::*;


	#[test]
	fn dirs() {

		let dir = TempDir::new()
			.expect("Failed to make temp folder");
		let dirs = SeriesDirs::create(dir.path(), "TS_03")
			.expect("Failed to create dirs");

		assert_that!(&dirs.tmp.is_dir(), eq(true));
		assert_that!(&dirs.extra.is_dir(), eq(true));
		assert_that!(&dirs.tmp_file(".rawtlt"), eq(dir.path().join("tmp/TS_03/TS_03.rawtlt")));
		assert_that!(&dirs.extra_file("_preali.st"), eq(dir.path().join("extra/TS_03/TS_03_preali.st")));
	}


	#[test]
	fn convert_links() {
		let _logging = logging::init_test();

		let dir = TempDir::new()
			.expect("Failed to make temp folder");
		let stack = dir.path().join("TS_03.st");
		fs::write(&stack, b"not really an MRC").unwrap();
		let ts = TiltSeries::new("TS_03", 1.0, &stack, &[-1.0, 1.0]);
		let dirs = SeriesDirs::create(dir.path().join("work"), "TS_03")
			.expect("Failed to create dirs");

		// converting twice should replace the old link
		for _ in 0 .. 2 {
			let out = convert_input(&Imod::default(), &ts, &dirs)
				.expect("Failed to convert");
			let out_contents = fs::read(&out).unwrap();
			assert_that!(&out_contents, eq(b"not really an MRC".to_vec()));
			assert_that!(&out.symlink_metadata().unwrap().file_type().is_symlink(), eq(true));
		}
	}


	#[test]
	fn convert_missing_stack() {
		let _logging = logging::init_test();

		let dir = TempDir::new()
			.expect("Failed to make temp folder");
		let ts = TiltSeries::new("TS_03", 1.0, dir.path().join("nope.st"), &[0.0])
			.with_transforms(&TransformStack::new(vec![AffineTransform2D::identity()]))
			.unwrap();
		let dirs = SeriesDirs::create(dir.path(), "TS_03")
			.expect("Failed to create dirs");

		assert_that!(&convert_input(&Imod::default(), &ts, &dirs).is_err(), eq(true));
	}
}
