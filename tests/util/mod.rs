
#![allow(unused)]

pub mod cmd;
pub mod imod_dir;
