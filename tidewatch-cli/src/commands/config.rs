//! Configuration commands.

use tidewatch::config::config_file_path;

use crate::error::CliError;

/// Show the configuration file path.
pub fn run_path() -> Result<(), CliError> {
    println!("{}", config_file_path().display());
    Ok(())
}
