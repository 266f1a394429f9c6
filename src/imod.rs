
// IMOD programs, see the man pages at:
// https://bio3d.colorado.edu/imod/doc/man/

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use tracing::{debug, info, trace};


/// An IMOD program invocation: the program name and its arguments, no shell involved.
pub trait ImodCommand {
	fn program(&self) -> &'static str;
	fn args(&self) -> Vec<String>;
}


fn path_arg(path: &Path) -> String {
	path.to_string_lossy().to_string()
}

/// printf-style %f
fn float_arg(value: f64) -> String {
	format!("{:.6}", value)
}

fn pair_arg(pair: (f64,f64)) -> String {
	format!("{},{}", pair.0, pair.1)
}


#[derive(Debug, Clone, Copy, PartialEq)]
pub struct XcorrParams {
	/// angle from the vertical to the tilt axis in the raw images, in degrees
	pub rotation_angle: f64,
	pub filter_sigma1: f64,
	pub filter_sigma2: f64,
	pub filter_radius2: f64
}

impl Default for XcorrParams {
	fn default() -> Self {
		Self {
			rotation_angle: 0.0,
			filter_sigma1: 0.03,
			filter_sigma2: 0.05,
			filter_radius2: 0.25
		}
	}
}


/// Cross-correlation of consecutive tilt images, writes one .prexf record per image
#[derive(Debug, Clone, PartialEq)]
pub struct Tiltxcorr {
	pub input: PathBuf,
	pub output: PathBuf,
	pub tilt_file: PathBuf,
	pub params: XcorrParams
}

impl ImodCommand for Tiltxcorr {

	fn program(&self) -> &'static str {
		"tiltxcorr"
	}

	fn args(&self) -> Vec<String> {
		vec![
			"-input".to_string(), path_arg(&self.input),
			"-output".to_string(), path_arg(&self.output),
			"-tiltfile".to_string(), path_arg(&self.tilt_file),
			"-RotationAngle".to_string(), float_arg(self.params.rotation_angle),
			"-FilterSigma1".to_string(), float_arg(self.params.filter_sigma1),
			"-FilterSigma2".to_string(), float_arg(self.params.filter_sigma2),
			"-FilterRadius2".to_string(), float_arg(self.params.filter_radius2)
		]
	}
}


/// Turns the relative (image-to-image) transforms into global ones
#[derive(Debug, Clone, PartialEq)]
pub struct Xftoxg {
	pub input: PathBuf,
	pub goutput: PathBuf
}

impl ImodCommand for Xftoxg {

	fn program(&self) -> &'static str {
		"xftoxg"
	}

	fn args(&self) -> Vec<String> {
		vec![
			"-input".to_string(), path_arg(&self.input),
			"-goutput".to_string(), path_arg(&self.goutput)
		]
	}
}


#[derive(Debug, Clone, Default, PartialEq)]
pub struct Newstack {
	pub input: PathBuf,
	pub output: PathBuf,
	pub xform: Option<PathBuf>,
	pub bin: Option<u32>,
	pub mode: Option<u32>,
	pub float_densities: Option<u32>,
	pub image_binned: Option<f64>
}

impl ImodCommand for Newstack {

	fn program(&self) -> &'static str {
		"newstack"
	}

	fn args(&self) -> Vec<String> {
		let mut args = vec![
			"-input".to_string(), path_arg(&self.input),
			"-output".to_string(), path_arg(&self.output)
		];
		if let Some(xform) = &self.xform {
			args.push("-xform".to_string());
			args.push(path_arg(xform));
		}
		if let Some(bin) = self.bin {
			args.push("-bin".to_string());
			args.push(bin.to_string());
		}
		if let Some(mode) = self.mode {
			args.push("-mode".to_string());
			args.push(mode.to_string());
		}
		if let Some(float_densities) = self.float_densities {
			args.push("-float".to_string());
			args.push(float_densities.to_string());
		}
		if let Some(image_binned) = self.image_binned {
			args.push("-imagebinned".to_string());
			args.push(format!("{:?}", image_binned));
		}
		args
	}
}


/// Back-projection of a tilt-series into a tomogram
#[derive(Debug, Clone, PartialEq)]
pub struct Tilt {
	pub input_projections: PathBuf,
	pub output_file: PathBuf,
	pub tilt_file: PathBuf,
	/// in voxels
	pub thickness: u32,
	/// linear region and gaussian fall-off of the radial weighting function
	pub radial: (f64,f64),
	/// x and z
	pub shift: (f64,f64),
	/// angle offset and tilt axis offset
	pub offset: (f64,f64),
	pub fake_sirt_iterations: u32,
	/// 1-based
	pub excluded_views: Vec<u32>,
	pub gpu: Option<u32>
}

impl ImodCommand for Tilt {

	fn program(&self) -> &'static str {
		"tilt"
	}

	fn args(&self) -> Vec<String> {

		let mut args = vec![
			"-InputProjections".to_string(), path_arg(&self.input_projections),
			"-OutputFile".to_string(), path_arg(&self.output_file),
			"-TILTFILE".to_string(), path_arg(&self.tilt_file),
			"-THICKNESS".to_string(), self.thickness.to_string(),
			"-FalloffIsTrueSigma".to_string(), "1".to_string(),
			"-RADIAL".to_string(), pair_arg(self.radial),
			"-SHIFT".to_string(), pair_arg(self.shift),
			"-OFFSET".to_string(), pair_arg(self.offset),
			"-MODE".to_string(), "1".to_string(),
			"-PERPENDICULAR".to_string(),
			"-AdjustOrigin".to_string()
		];

		if self.fake_sirt_iterations != 0 {
			args.push("-FakeSIRTiterations".to_string());
			args.push(self.fake_sirt_iterations.to_string());
		}

		if !self.excluded_views.is_empty() {
			args.push("-EXCLUDELIST2".to_string());
			args.push(self.excluded_views.iter()
				.map(|view| view.to_string())
				.collect::<Vec<_>>()
				.join(","));
		}

		if let Some(gpu) = self.gpu {
			args.push("-UseGPU".to_string());
			args.push(gpu.to_string());
			// fall back to the CPU if the GPU fails
			args.push("-ActionIfGPUFails".to_string());
			args.push("2,2".to_string());
		}

		args
	}
}


/// Rotates the reconstruction around X, so Z becomes the slowest axis
#[derive(Debug, Clone, PartialEq)]
pub struct Trimvol {
	pub input: PathBuf,
	pub output: PathBuf
}

impl ImodCommand for Trimvol {

	fn program(&self) -> &'static str {
		"trimvol"
	}

	fn args(&self) -> Vec<String> {
		vec![
			"-rx".to_string(),
			path_arg(&self.input),
			path_arg(&self.output)
		]
	}
}


#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
	pub program: String,
	/// None when the process was killed by a signal
	pub exit_code: Option<i32>,
	pub stdout: String,
	pub stderr: String
}

impl CommandOutput {

	pub fn success(&self) -> bool {
		self.exit_code == Some(0)
	}

	pub fn check(self) -> Result<Self> {
		match self.exit_code {
			Some(0) => Ok(self),
			Some(code) => bail!("{} exited with code {}:\n{}", self.program, code, self.stderr.trim_end()),
			None => bail!("{} was killed:\n{}", self.program, self.stderr.trim_end())
		}
	}
}


/// Runs IMOD programs, either from an IMOD installation folder, or from the PATH
#[derive(Debug, Clone, Default)]
pub struct Imod {
	imod_dir: Option<PathBuf>
}

impl Imod {

	pub fn new(imod_dir: Option<PathBuf>) -> Self {
		Self {
			imod_dir
		}
	}

	pub fn program_path(&self, program: &str) -> PathBuf {
		match &self.imod_dir {
			Some(dir) => dir.join("bin").join(program),
			None => PathBuf::from(program)
		}
	}

	/// runs the command to completion in `cwd` and captures its output, whatever the exit status
	pub fn exec(&self, cmd: &impl ImodCommand, cwd: impl AsRef<Path>) -> Result<CommandOutput> {

		let cwd = cwd.as_ref();
		let program = cmd.program();
		let program_path = self.program_path(program);
		let args = cmd.args();

		info!("Running {}:\n\tin: {}\n\t{} {}", program, cwd.to_string_lossy(), program_path.to_string_lossy(), args.join(" "));

		let mut command = Command::new(&program_path);
		command
			.current_dir(cwd)
			.args(&args);
		if let Some(dir) = &self.imod_dir {
			// IMOD programs find their own resources through this
			command.env("IMOD_DIR", dir);
		}

		let output = command.output()
			.with_context(|| format!("Failed to run command: {}", program_path.to_string_lossy()))?;

		let output = CommandOutput {
			program: program.to_string(),
			exit_code: output.status.code(),
			stdout: String::from_utf8_lossy(&output.stdout).to_string(),
			stderr: String::from_utf8_lossy(&output.stderr).to_string()
		};
		for line in output.stdout.lines() {
			trace!("{}: {}", program, line);
		}
		debug!("{} finished with exit code: {:?}", program, output.exit_code);

		Ok(output)
	}

	/// like `exec`, but any unsuccessful exit is an error
	pub fn run(&self, cmd: &impl ImodCommand, cwd: impl AsRef<Path>) -> Result<CommandOutput> {
		self.exec(cmd, cwd)?
			.check()
	}
}
