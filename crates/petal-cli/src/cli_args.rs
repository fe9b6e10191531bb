use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "petal")]
#[command(about = "Attribute-language template compiler and renderer")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Render a template with JSON variables.
    Render(RenderArgs),
    /// Compile a template and report diagnostics without rendering.
    Check(CheckArgs),
}

#[derive(Debug, Args)]
pub struct RenderArgs {
    /// Template file to render.
    pub template: PathBuf,
    /// JSON file whose top-level object becomes the variable scope.
    #[arg(long = "data")]
    pub data: Option<PathBuf>,
    /// Additional template search roots, in priority order.
    #[arg(long = "search-path")]
    pub search_path: Vec<PathBuf>,
    #[arg(long = "strict")]
    pub strict: bool,
    #[arg(long = "trim-attribute-space")]
    pub trim_attribute_space: bool,
    /// Skip the on-disk artifact cache.
    #[arg(long = "no-cache")]
    pub no_cache: bool,
    /// Write output here instead of standard output.
    #[arg(long = "output", short = 'o')]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct CheckArgs {
    pub template: PathBuf,
    #[arg(long = "strict")]
    pub strict: bool,
}
