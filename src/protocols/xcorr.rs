
// Cross-correlation prealignment of a tilt-series
// https://bio3d.colorado.edu/imod/doc/etomoTutorial.html

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::imod::{Imod, Newstack, Tiltxcorr, XcorrParams, Xftoxg};
use crate::protocols::{convert_input, SeriesDirs};
use crate::tilt_series::{AngleOrder, Location, TiltImage, TiltSeries};
use crate::xf::TransformStack;


#[derive(Debug, Clone, Copy, PartialEq)]
pub struct XcorrOptions {
	pub params: XcorrParams,
	/// when set, also write an interpolated (aligned) stack with this binning
	pub interpolate_binning: Option<u32>
}


#[derive(Debug, Clone, PartialEq)]
pub struct XcorrOutput {
	/// the input series, with the prealignment transforms attached
	pub aligned: TiltSeries,
	/// the prealigned images, resampled into a new stack
	pub interpolated: Option<TiltSeries>
}


#[tracing::instrument(skip_all, name = "Xcorr", fields(ts_id = %ts.ts_id))]
pub fn run(imod: &Imod, work_dir: impl AsRef<Path>, ts: &TiltSeries, options: &XcorrOptions) -> Result<XcorrOutput> {

	let dirs = SeriesDirs::create(work_dir, &ts.ts_id)?;

	// prepare the inputs
	let stack_path = convert_input(imod, ts, &dirs)?;
	let rawtlt_path = dirs.tmp_file(".rawtlt");
	ts.write_tlt(&rawtlt_path, AngleOrder::Reversed)?;

	// compute the image-to-image transforms, then make them global
	let prexf_path = dirs.extra_file(".prexf");
	imod.run(&Tiltxcorr {
		input: stack_path.clone(),
		output: prexf_path.clone(),
		tilt_file: rawtlt_path,
		params: options.params
	}, &dirs.tmp)?;

	let prexg_path = dirs.extra_file(".prexg");
	imod.run(&Xftoxg {
		input: prexf_path,
		goutput: prexg_path.clone()
	}, &dirs.tmp)?;

	let stack = TransformStack::read(&prexg_path)
		.with_context(|| format!("Failed to read prealignment of tilt-series {}", ts.ts_id))?;
	let aligned = ts.with_transforms(&stack)
		.with_context(|| format!("Prealignment doesn't fit tilt-series {}", ts.ts_id))?;
	info!("Prealigned {} tilt images", aligned.len());

	let interpolated = match options.interpolate_binning {
		Some(binning) => Some(interpolate(imod, ts, &dirs, &stack_path, binning)?),
		None => None
	};

	Ok(XcorrOutput {
		aligned,
		interpolated
	})
}


fn interpolate(imod: &Imod, ts: &TiltSeries, dirs: &SeriesDirs, stack_path: &Path, binning: u32) -> Result<TiltSeries> {

	let binning = binning.max(1);
	let preali_path = dirs.extra_file("_preali.st");
	imod.run(&Newstack {
		input: stack_path.to_path_buf(),
		output: preali_path.clone(),
		xform: Some(dirs.extra_file(".prexg")),
		bin: Some(binning),
		mode: Some(0),
		float_densities: Some(2),
		image_binned: Some(1.0)
	}, &dirs.tmp)?;

	Ok(interpolated_series(ts, &preali_path, binning))
}


/// The series that describes newstack's output: image i is section i+1 of the new stack,
/// the alignment is baked into the pixels, and binning coarsens the sampling
pub fn interpolated_series(ts: &TiltSeries, preali_path: &Path, binning: u32) -> TiltSeries {
	let scale = binning.max(1) as f64;
	TiltSeries {
		ts_id: ts.ts_id.clone(),
		sampling_rate: ts.sampling_rate*scale,
		images: ts.images.iter()
			.enumerate()
			.map(|(i, image)| TiltImage {
				location: Location {
					index: i as u32 + 1,
					path: preali_path.to_path_buf()
				},
				sampling_rate: image.sampling_rate*scale,
				transform: None,
				.. image.clone()
			})
			.collect()
	}
}
