
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use gumdrop::Options;
use tracing::info;

use imod_align::config::{self, Config};
use imod_align::logging::{self, ResultExt};
use imod_align::protocols::{import, reconstruction, xcorr, SeriesDirs};
use imod_align::tilt_series::TiltSeries;
use imod_align::xf::TransformStack;


#[derive(Options)]
struct Args {

	#[options(help_flag)]
	help: bool,

	/// print version
	version: bool,

	/// settings for log output
	#[options(default = "imod_align=info")]
	log: String,

	/// path to the config file
	#[options(default_expr = "PathBuf::from(config::DEFAULT_PATH)")]
	config: PathBuf,

	#[options(command)]
	cmd: Option<Command>
}

#[derive(Options)]
enum Command {

	/// Read a transform file and print its matrices
	Xf(ArgsXf),

	/// Cross-correlation prealignment of tilt-series
	Xcorr(ArgsXcorr),

	/// Assign transform files to tilt-series
	Import(ArgsImport),

	/// Reconstruct tomograms from tilt-series
	Reconstruct(ArgsReconstruct)
}


#[derive(Options)]
struct ArgsXf {

	#[options(help_flag)]
	help: bool,

	/// a tilt-series description, to check the transforms fit it
	#[options(meta = "SERIES")]
	series: Option<PathBuf>,

	/// the transform file
	#[options(free, required)]
	file: PathBuf
}


#[derive(Options)]
struct ArgsXcorr {

	#[options(help_flag)]
	help: bool,

	/// folder for intermediate files and results
	#[options(default = ".")]
	work_dir: PathBuf,

	/// angle from the vertical to the tilt axis, in degrees
	rotation_angle: Option<f64>,

	/// also write the interpolated stack, binned by this factor
	#[options(meta = "BINNING")]
	interpolate: Option<u32>,

	/// tilt-series description files
	#[options(free, required)]
	series: Vec<PathBuf>
}


#[derive(Options)]
struct ArgsImport {

	#[options(help_flag)]
	help: bool,

	/// folder for results
	#[options(default = ".")]
	work_dir: PathBuf,

	/// folder containing the transform files
	#[options(required)]
	from: PathBuf,

	/// extension of the transform files
	#[options(default = "xf")]
	ext: String,

	/// space-separated words, files whose path contains any of them are skipped
	#[options(no_short, default = "")]
	exclude: String,

	/// tilt-series description files
	#[options(free, required)]
	series: Vec<PathBuf>
}


#[derive(Options)]
struct ArgsReconstruct {

	#[options(help_flag)]
	help: bool,

	/// folder for intermediate files and results
	#[options(default = ".")]
	work_dir: PathBuf,

	/// tomogram thickness, in voxels
	thickness: Option<u32>,

	/// id of the GPU to use
	gpu: Option<u32>,

	/// tilt-series description files
	#[options(free, required)]
	series: Vec<PathBuf>
}


fn main() -> ExitCode {

	// parse arguments
	let args = Args::parse_args_default_or_exit();

	if args.version {
		println!("imod-align version {}", env!("CARGO_PKG_VERSION"));
		return ExitCode::SUCCESS;
	}

	// init logging
	let Ok(_) = logging::init(&args.log)
		.log_err()
		else { return ExitCode::FAILURE; };

	let Ok(_) = run(args)
		.log_err()
		else { return ExitCode::FAILURE; };

	// we finished! =)
	ExitCode::SUCCESS
}


#[tracing::instrument(skip_all, level = 5, name = "ImodAlign")]
fn run(args: Args) -> Result<()> {

	let config = Config::read_or_default(&args.config)?;
	match config.imod_dir.as_ref() {
		Some(dir) => info!("Using IMOD from: {}", dir.to_string_lossy()),
		None => info!("Using IMOD from the PATH")
	}

	match args.cmd {
		Some(Command::Xf(xf_args)) => run_xf(xf_args),
		Some(Command::Xcorr(xcorr_args)) => run_xcorr(&config, xcorr_args),
		Some(Command::Import(import_args)) => run_import(import_args),
		Some(Command::Reconstruct(reconstruct_args)) => run_reconstruct(&config, reconstruct_args),
		None => bail!("No command, try one of:\n{}", Args::command_list().unwrap_or_default())
	}
}


fn read_series(paths: &[PathBuf]) -> Result<Vec<TiltSeries>> {
	paths.iter()
		.map(TiltSeries::read)
		.collect()
}


fn run_xf(args: ArgsXf) -> Result<()> {

	let stack = TransformStack::read(&args.file)?;

	if let Some(series_path) = &args.series {
		let ts = TiltSeries::read(series_path)?;
		ts.with_transforms(&stack)
			.with_context(|| format!("Transforms don't fit tilt-series {}", ts.ts_id))?;
	}

	for (i, m) in stack.matrices().iter().enumerate() {
		println!("{}:", i + 1);
		for row in m {
			println!("\t{:>12.6} {:>12.6} {:>12.6}", row[0], row[1], row[2]);
		}
	}

	Ok(())
}


fn run_xcorr(config: &Config, args: ArgsXcorr) -> Result<()> {

	let series = read_series(&args.series)?;
	let imod = config.imod();

	let mut options = xcorr::XcorrOptions {
		params: config.xcorr,
		interpolate_binning: args.interpolate
	};
	if let Some(rotation_angle) = args.rotation_angle {
		options.params.rotation_angle = rotation_angle;
	}

	let mut num_interpolated = 0;
	for ts in &series {
		let out = xcorr::run(&imod, &args.work_dir, ts, &options)?;
		println!("{}: {} transforms", out.aligned.ts_id, out.aligned.len());
		if let Some(interpolated) = &out.interpolated {
			if let Some(path) = interpolated.stack_path() {
				println!("{}: interpolated stack at {}", interpolated.ts_id, path.to_string_lossy());
			}
			num_interpolated += 1;
		}
	}

	println!("Input tilt-series: {}", series.len());
	println!("Transformation matrices calculated: {}", series.len());
	if args.interpolate.is_some() {
		println!("Interpolated tilt-series: {}", num_interpolated);
	}

	Ok(())
}


fn run_import(args: ArgsImport) -> Result<()> {

	let series = read_series(&args.series)?;

	// find the transform files
	let mut files = Vec::new();
	let dir = fs::read_dir(&args.from)
		.with_context(|| format!("Failed to read folder: {}", args.from.to_string_lossy()))?;
	for entry in dir {
		let path = entry
			.with_context(|| format!("Failed to read folder: {}", args.from.to_string_lossy()))?
			.path();
		if path.extension().map(|ext| ext == args.ext.as_str()).unwrap_or(false) {
			files.push(path);
		}
	}
	files.sort();

	let exclusion_words = args.exclude.split_whitespace()
		.map(|word| word.to_string())
		.collect::<Vec<_>>();

	let aligned = import::run(&series, &files, &exclusion_words)?;

	// save the combined transforms
	for ts in &aligned {
		let dirs = SeriesDirs::create(&args.work_dir, &ts.ts_id)?;
		let out_path = dirs.extra_file(".xf");
		ts.transforms()
			.write(&out_path)?;
		println!("{}: {} transforms written to {}", ts.ts_id, ts.len(), out_path.to_string_lossy());
	}

	println!("Input tilt-series: {}", series.len());
	println!("Transformation matrices assigned: {}", aligned.len());

	Ok(())
}


fn run_reconstruct(config: &Config, args: ArgsReconstruct) -> Result<()> {

	let series = read_series(&args.series)?;
	let imod = config.imod();

	let mut params = config.reconstruction.clone();
	if let Some(thickness) = args.thickness {
		params.thickness = thickness;
	}
	if args.gpu.is_some() {
		params.gpu = args.gpu;
	}

	let mut tomograms = Vec::new();
	for ts in &series {
		let tomogram = reconstruction::run(&imod, &args.work_dir, ts, &params)?;
		println!("{}: tomogram at {}", tomogram.ts_id, tomogram.location.to_string_lossy());
		tomograms.push(tomogram);
	}

	println!("Input tilt-series: {}", series.len());
	println!("Tomograms reconstructed: {}", tomograms.len());

	Ok(())
}
