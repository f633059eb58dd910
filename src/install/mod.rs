//! Installation of server instances from templates.

mod first_boot;
mod java;
mod pipeline;
mod steps;

pub use first_boot::{run_first_boot, FirstBoot};
pub use java::{
    find_java_executable, parse_java_version, portable_major, required_major, JavaManager,
    JavaProvider,
};
pub use pipeline::Installer;
pub use steps::{parse_ram, split_command, substitute, LineSink, ProcessExecutor, StepExecutor};
