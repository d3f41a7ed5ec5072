use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Pack a host directory into a fresh image
    Pack {
        /// Host directory whose contents become the root directory
        #[arg(long, short)]
        source: PathBuf,

        /// Image file to create
        #[arg(long, short)]
        out: PathBuf,

        /// Image size in sectors
        #[arg(long, default_value_t = 16 * 2048)]
        sectors: usize,
    },

    /// List a directory inside an image
    Ls {
        #[arg(long, short)]
        image: PathBuf,

        #[arg(default_value = "/")]
        path: String,
    },

    /// Print a file inside an image
    Cat {
        #[arg(long, short)]
        image: PathBuf,

        path: String,
    },
}
