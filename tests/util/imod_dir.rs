
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use assert_fs::TempDir;
use indoc::{formatdoc, indoc};

use imod_align::imod::Imod;
use imod_align::tilt_series::TiltSeries;


// Stand-ins for the IMOD programs. They only look at the argument positions our command builders use.

/// writes one record per line of the -tiltfile, with tx = i + 0.5 and ty = -i
const TILTXCORR: &'static str = indoc! { r#"
	#!/bin/sh
	n=$(wc -l < "$6")
	i=0
	: > "$4"
	while [ "$i" -lt "$n" ]; do
		echo "   1.0000000   0.0000000   0.0000000   1.0000000   $i.5   -$i" >> "$4"
		i=$((i + 1))
	done
"# };

/// copies -input to -goutput
const XFTOXG: &'static str = indoc! { r#"
	#!/bin/sh
	cp "$2" "$4"
"# };

/// copies -input to -output and saves its arguments next to the output
const NEWSTACK: &'static str = indoc! { r#"
	#!/bin/sh
	echo "$@" > "$4.args"
	cp "$2" "$4"
"# };

const TILT: &'static str = indoc! { r#"
	#!/bin/sh
	echo "$@" > "$4.args"
	echo "reconstruction" > "$4"
"# };

const TRIMVOL: &'static str = indoc! { r#"
	#!/bin/sh
	cp "$2" "$3"
"# };


/// A scratch folder holding a fake IMOD installation, tilt-series inputs, and a work folder
pub struct ImodDir {
	dir: TempDir
}

impl ImodDir {

	pub fn new() -> Self {

		let dir = Self {
			dir: TempDir::new()
				.expect("Failed to make temp folder")
		};

		let bin_dir = dir.imod_path().join("bin");
		fs::create_dir_all(&bin_dir)
			.expect("Failed to make IMOD bin folder");
		for (program, script) in [
			("tiltxcorr", TILTXCORR),
			("xftoxg", XFTOXG),
			("newstack", NEWSTACK),
			("tilt", TILT),
			("trimvol", TRIMVOL)
		] {
			let path = bin_dir.join(program);
			fs::write(&path, script)
				.expect(&format!("Failed to write program: {}", path.to_string_lossy()));
			fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
				.expect(&format!("Failed to make program executable: {}", path.to_string_lossy()));
		}

		dir
	}

	pub fn path(&self) -> &Path {
		self.dir.path()
	}

	pub fn imod_path(&self) -> PathBuf {
		self.path().join("IMOD")
	}

	pub fn imod(&self) -> Imod {
		Imod::new(Some(self.imod_path()))
	}

	pub fn work_path(&self) -> PathBuf {
		self.path().join("work")
	}

	pub fn file(&self, path: impl AsRef<Path>) -> PathBuf {
		self.path().join(path)
	}

	pub fn write(&self, path: impl AsRef<Path>, txt: impl AsRef<str>) -> PathBuf {
		let path = self.file(path);
		fs::write(&path, txt.as_ref())
			.expect(&format!("Failed to write file: {}", path.to_string_lossy()));
		path
	}

	pub fn read(&self, path: impl AsRef<Path>) -> String {
		let path = self.file(path);
		fs::read_to_string(&path)
			.expect(&format!("Failed to read file: {}", path.to_string_lossy()))
	}

	/// writes the config file pointing at the fake IMOD, returns its path
	pub fn write_config(&self) -> PathBuf {
		self.write("imod-align.toml", format!("[imod]\ndir = \"{}\"\n", self.imod_path().to_string_lossy()))
	}

	/// writes a stack file and a series description for it, returns the description path
	pub fn write_series(&self, ts_id: &str, angles: &[f64]) -> PathBuf {
		self.write(format!("{}.st", ts_id), format!("stack for {}", ts_id));
		let angles = angles.iter()
			.map(|a| format!("{:?}", a))
			.collect::<Vec<_>>()
			.join(", ");
		self.write(format!("{}.toml", ts_id), formatdoc! { r#"
			id = "{ts_id}"
			sampling_rate = 1.5
			stack = "{ts_id}.st"
			angles = [{angles}]
		"#, ts_id = ts_id, angles = angles })
	}

	pub fn series(&self, ts_id: &str, angles: &[f64]) -> TiltSeries {
		TiltSeries::read(self.write_series(ts_id, angles))
			.expect("Failed to read tilt-series")
	}
}
