
use assert_cmd::assert::Assert;
use assert_cmd::Command;


const BIN_NAME: &'static str = "imod-align";


pub fn cmd() -> Command {
	Command::cargo_bin(BIN_NAME)
		.unwrap()
}


pub trait AssertExt {
	fn print_stderr(self) -> Self;
	fn stdout_string(&self) -> String;
}

impl AssertExt for Assert {

	fn print_stderr(self) -> Self {
		println!("STDERR:\n{}", String::from_utf8_lossy(&self.get_output().stderr));
		self
	}

	fn stdout_string(&self) -> String {
		String::from_utf8_lossy(&self.get_output().stdout).to_string()
	}
}
