use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;
pub mod lock;

#[derive(Parser)]
#[command(name = "git-carrier", version)]
#[command(about = "Carry git history between machines that share no network")]
#[command(long_about = "git-carrier packs the commits a destination is missing into a single verified \
                       bundle file, and applies received bundles as fast-forwards only. Start with \
                       'git-carrier log' to pick a base commit, then 'git-carrier pack --base <commit>'.")]
pub struct Cli {
    /// Repository to operate on
    #[arg(long, short = 'C', global = true, default_value = ".", help = "Path to the git working tree")]
    pub repo: PathBuf,
    /// Print machine-readable results
    #[arg(long, global = true, help = "Print each result as a JSON record on stdout")]
    pub json: bool,
    /// Configuration file to use instead of git-carrier.toml / .git-carrier-rc
    #[arg(long, global = true, help = "Read configuration from this TOML file only")]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List local branches, marking the checked-out one
    Branches,
    /// Show commits newest-first, a page at a time, to choose a base commit
    Log {
        /// Branch, tag or commit to list (default: current branch)
        reference: Option<String>,
        /// Page number, starting at 1
        #[arg(long, default_value = "1", help = "Page to show, starting at 1")]
        page: usize,
        /// Commits per page
        #[arg(long, help = "Commits per page (default from configuration)")]
        page_size: Option<usize>,
    },
    /// Preview which commits a bundle would contain
    Range {
        /// Branch, tag or commit to send (default: current branch)
        reference: Option<String>,
        /// Commit the destination already has
        #[arg(long, help = "Exclude this commit and its history")]
        base: Option<String>,
    },
    /// Write a verified bundle file
    Pack {
        /// Branch, tag or commit to send (default: current branch)
        reference: Option<String>,
        /// Commit the destination already has
        #[arg(long, help = "Exclude this commit and its history (default: send everything)")]
        base: Option<String>,
        /// Output file
        #[arg(long, short = 'o', help = "Bundle path (default: <repo>_<ref>_<timestamp>.bundle)")]
        output: Option<PathBuf>,
        /// Replace an existing output file
        #[arg(long, help = "Overwrite the output file if it already exists")]
        force: bool,
    },
    /// Check a bundle file for damage without touching any repository
    Verify {
        /// Bundle file to check
        bundle: PathBuf,
    },
    /// Apply a bundle to a local branch as a fast-forward
    Unpack {
        /// Bundle file to apply
        bundle: PathBuf,
        /// Local branch to update or create
        #[arg(long, help = "Target branch (default: the branch recorded in the bundle)")]
        branch: Option<String>,
    },
    /// Print the effective configuration
    Config,
}
