
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use toml::{Table, Value};
use tracing::debug;

use crate::imod::{Imod, XcorrParams};
use crate::protocols::reconstruction::ReconstructionParams;


pub const DEFAULT_PATH: &'static str = "./imod-align.toml";


/// Config is the contents of imod-align.toml, eg:
/// ```toml
/// [imod]
/// dir = "/usr/local/IMOD"
///
/// [xcorr]
/// rotation_angle = 0.0
/// filter_sigma1 = 0.03
///
/// [reconstruction]
/// thickness = 1000
/// radial = [0.35, 0.035]
/// gpu = 0
/// ```
/// Every key is optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
	pub imod_dir: Option<PathBuf>,
	pub xcorr: XcorrParams,
	pub reconstruction: ReconstructionParams
}

impl Config {

	/// reads the config file, if there is one, and falls back to $IMOD_DIR to find IMOD
	pub fn read_or_default(path: impl AsRef<Path>) -> Result<Self> {

		let path = path.as_ref();
		let exists = path.try_exists()
			.with_context(|| format!("Failed to check for existence of config file at: {}", path.to_string_lossy()))?;

		let mut config =
			if exists {
				Self::read(path)?
			} else {
				debug!("No config file at {}, using defaults", path.to_string_lossy());
				Self::default()
			};

		if config.imod_dir.is_none() {
			config.imod_dir = env::var_os("IMOD_DIR")
				.map(PathBuf::from);
		}

		Ok(config)
	}

	pub fn read(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let toml = fs::read_to_string(path)
			.with_context(|| format!("Failed to read config file at: {}", path.to_string_lossy()))?;
		Self::parse(&toml)
			.with_context(|| format!("Failed to parse config file at: {}", path.to_string_lossy()))
	}

	pub fn parse(toml: &str) -> Result<Self> {

		let toml = toml.parse::<Table>()
			.context("Invalid TOML")?;

		let imod_dir = match section(&toml, "imod")? {
			Some(imod) => imod.get("dir")
				.map(|dir| {
					dir.as_str()
						.map(PathBuf::from)
						.context("imod.dir was not a string")
				})
				.transpose()?,
			None => None
		};

		let mut xcorr = XcorrParams::default();
		if let Some(section) = section(&toml, "xcorr")? {
			read_f64(section, "xcorr", "rotation_angle", &mut xcorr.rotation_angle)?;
			read_f64(section, "xcorr", "filter_sigma1", &mut xcorr.filter_sigma1)?;
			read_f64(section, "xcorr", "filter_sigma2", &mut xcorr.filter_sigma2)?;
			read_f64(section, "xcorr", "filter_radius2", &mut xcorr.filter_radius2)?;
		}

		let mut reconstruction = ReconstructionParams::default();
		if let Some(section) = section(&toml, "reconstruction")? {
			read_u32(section, "reconstruction", "thickness", &mut reconstruction.thickness)?;
			read_pair(section, "reconstruction", "radial", &mut reconstruction.radial)?;
			read_pair(section, "reconstruction", "shift", &mut reconstruction.shift)?;
			read_pair(section, "reconstruction", "offset", &mut reconstruction.offset)?;
			read_u32(section, "reconstruction", "fake_sirt_iterations", &mut reconstruction.fake_sirt_iterations)?;
			if section.contains_key("gpu") {
				let mut gpu = 0;
				read_u32(section, "reconstruction", "gpu", &mut gpu)?;
				reconstruction.gpu = Some(gpu);
			}
		}

		Ok(Self {
			imod_dir,
			xcorr,
			reconstruction
		})
	}

	pub fn imod(&self) -> Imod {
		Imod::new(self.imod_dir.clone())
	}
}


fn section<'a>(toml: &'a Table, name: &str) -> Result<Option<&'a Table>> {
	toml.get(name)
		.map(|value| {
			value.as_table()
				.context(format!("{} key is not a table", name))
		})
		.transpose()
}


pub(crate) fn to_f64(value: &Value) -> Result<f64> {
	match value {
		Value::Float(f) => Ok(*f),
		Value::Integer(i) => Ok(*i as f64),
		_ => bail!("not a number: {}", value)
	}
}


fn read_f64(section: &Table, section_name: &str, key: &str, dst: &mut f64) -> Result<()> {
	if let Some(value) = section.get(key) {
		*dst = to_f64(value)
			.with_context(|| format!("Bad value for {}.{}", section_name, key))?;
	}
	Ok(())
}


fn read_u32(section: &Table, section_name: &str, key: &str, dst: &mut u32) -> Result<()> {
	if let Some(value) = section.get(key) {
		let i = value.as_integer()
			.with_context(|| format!("{}.{} was not an integer", section_name, key))?;
		*dst = u32::try_from(i)
			.with_context(|| format!("{}.{} out of range: {}", section_name, key, i))?;
	}
	Ok(())
}


fn read_pair(section: &Table, section_name: &str, key: &str, dst: &mut (f64,f64)) -> Result<()> {
	if let Some(value) = section.get(key) {
		let pair = value.as_array()
			.with_context(|| format!("{}.{} was not an array", section_name, key))?;
		let [a, b] = pair.as_slice()
			else { bail!("{}.{} should have 2 values, not {}", section_name, key, pair.len()); };
		*dst = (
			to_f64(a).with_context(|| format!("Bad value for {}.{}", section_name, key))?,
			to_f64(b).with_context(|| format!("Bad value for {}.{}", section_name, key))?
		);
	}
	Ok(())
}
