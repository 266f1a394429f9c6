
// Tomogram reconstruction by weighted back-projection
// https://bio3d.colorado.edu/imod/doc/man/tilt.html

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::info;

use crate::imod::{Imod, Tilt, Trimvol};
use crate::protocols::{convert_input, SeriesDirs};
use crate::tilt_series::{AngleOrder, TiltSeries};


#[derive(Debug, Clone, PartialEq)]
pub struct ReconstructionParams {
	/// in voxels, along the beam
	pub thickness: u32,
	pub radial: (f64,f64),
	/// shifts of the reconstructed slice, in x and z
	pub shift: (f64,f64),
	/// angle offset, tilt axis offset
	pub offset: (f64,f64),
	/// 0 for plain back-projection
	pub fake_sirt_iterations: u32,
	pub gpu: Option<u32>
}

impl Default for ReconstructionParams {
	fn default() -> Self {
		Self {
			thickness: 1000,
			radial: (0.35, 0.035),
			shift: (0.0, 0.0),
			offset: (0.0, 0.0),
			fake_sirt_iterations: 0,
			gpu: None
		}
	}
}


#[derive(Debug, Clone, PartialEq)]
pub struct Tomogram {
	pub ts_id: String,
	pub location: PathBuf,
	/// in Angstroms per voxel
	pub sampling_rate: f64
}


#[tracing::instrument(skip_all, name = "Reconstruction", fields(ts_id = %ts.ts_id))]
pub fn run(imod: &Imod, work_dir: impl AsRef<Path>, ts: &TiltSeries, params: &ReconstructionParams) -> Result<Tomogram> {

	let dirs = SeriesDirs::create(work_dir, &ts.ts_id)?;

	let stack_path = convert_input(imod, ts, &dirs)?;
	let tlt_path = dirs.tmp_file(".tlt");
	ts.write_tlt(&tlt_path, AngleOrder::Natural)?;

	let rec_path = dirs.tmp_file(".rec");
	imod.run(&tilt_command(ts, &stack_path, &rec_path, &tlt_path, params), &dirs.tmp)?;

	let mrc_path = dirs.extra_file(".mrc");
	imod.run(&Trimvol {
		input: rec_path,
		output: mrc_path.clone()
	}, &dirs.tmp)?;

	info!("Reconstructed tomogram: {}", mrc_path.to_string_lossy());

	Ok(Tomogram {
		ts_id: ts.ts_id.clone(),
		location: mrc_path,
		sampling_rate: ts.sampling_rate
	})
}


pub fn tilt_command(ts: &TiltSeries, stack_path: &Path, rec_path: &Path, tlt_path: &Path, params: &ReconstructionParams) -> Tilt {
	Tilt {
		input_projections: stack_path.to_path_buf(),
		output_file: rec_path.to_path_buf(),
		tilt_file: tlt_path.to_path_buf(),
		thickness: params.thickness,
		radial: params.radial,
		shift: params.shift,
		offset: params.offset,
		fake_sirt_iterations: params.fake_sirt_iterations,
		excluded_views: ts.excluded_views(),
		gpu: params.gpu
	}
}
