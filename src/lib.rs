#[macro_use]
pub mod logging;

pub mod display;
pub mod io;
pub mod settings;

#[cfg(feature = "cli")]
pub mod cli;

/// Entry point for the `ttytap` binary.
#[cfg(feature = "cli")]
pub fn run() -> std::process::ExitCode {
    cli::run()
}
