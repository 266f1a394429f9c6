
// Assigns externally-computed transform files to tilt-series

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::tilt_series::TiltSeries;
use crate::xf::TransformStack;


/// drops files whose path contains any of the exclusion words
pub fn exclude_by_words(files: &[PathBuf], exclusion_words: &[String]) -> Vec<PathBuf> {
	files.iter()
		.filter(|file| {
			let path = file.to_string_lossy();
			match exclusion_words.iter().find(|word| path.contains(word.as_str())) {
				Some(word) => {
					info!("Excluded {}, it contains: {}", path, word);
					false
				}
				None => true
			}
		})
		.cloned()
		.collect()
}


fn file_stem(path: &Path) -> Option<String> {
	path.file_stem()
		.map(|stem| stem.to_string_lossy().to_string())
}


/// Pairs each series with the transform file of the same name as its stack, eg
/// `TS_01.xf` for `TS_01.st`. Every file must belong to exactly one series.
pub fn match_files<'a>(series: &'a [TiltSeries], files: &[PathBuf]) -> Result<Vec<(&'a TiltSeries,PathBuf)>> {

	let mut matches = Vec::<(&TiltSeries,PathBuf)>::new();
	let mut unmatched = Vec::<&PathBuf>::new();

	for file in files {
		let stem = file_stem(file);
		let ts = series.iter()
			.find(|ts| stem.is_some() && ts.stack_stem() == stem);
		match ts {
			Some(ts) => {
				if let Some((_, other)) = matches.iter().find(|(m, _)| m.ts_id == ts.ts_id) {
					bail!("Tilt-series {} matches more than one transform file: {} and {}",
						ts.ts_id, other.to_string_lossy(), file.to_string_lossy());
				}
				matches.push((ts, file.clone()));
			}
			None => unmatched.push(file)
		}
	}

	if !unmatched.is_empty() {
		let list = unmatched.iter()
			.map(|file| format!("\t{}", file.to_string_lossy()))
			.collect::<Vec<_>>()
			.join("\n");
		bail!("No matching tilt-series found for transform files:\n{}", list);
	}

	Ok(matches)
}


/// Reads each matching transform file and attaches it to its series.
/// Series that were already aligned get the new transforms composed with the old ones.
/// Series without a transform file are left out of the result.
#[tracing::instrument(skip_all, name = "Import")]
pub fn run(series: &[TiltSeries], files: &[PathBuf], exclusion_words: &[String]) -> Result<Vec<TiltSeries>> {

	let files = exclude_by_words(files, exclusion_words);
	let matches = match_files(series, &files)?;

	let mut out = Vec::with_capacity(matches.len());
	for (ts, file) in matches {
		let stack = TransformStack::read(&file)
			.with_context(|| format!("Failed to read transforms for tilt-series {}", ts.ts_id))?;
		let aligned = ts.with_composed_transforms(&stack)
			.with_context(|| format!("Transforms from {} don't fit tilt-series {}", file.to_string_lossy(), ts.ts_id))?;
		info!("Assigned {} to tilt-series {}", file.to_string_lossy(), ts.ts_id);
		out.push(aligned);
	}

	if out.len() < series.len() {
		warn!("{} of {} tilt-series got no transforms", series.len() - out.len(), series.len());
	}

	Ok(out)
}
