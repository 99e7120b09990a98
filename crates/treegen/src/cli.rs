use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Generate tree object models from a tree description"
)]
pub struct TreeGenArgs {
    /// Input tree description file
    pub input: PathBuf,

    /// Output path for the generated types module
    pub header_out: PathBuf,

    /// Output path for the generated impls module
    pub source_out: PathBuf,

    /// Output path for the generated Python module
    pub dynamic_out: Option<PathBuf>,

    /// Verbose output
    #[arg(short = 'v', long)]
    pub verbose: bool,
}
