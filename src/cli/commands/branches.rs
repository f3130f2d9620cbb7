use super::{Command, Context};
use crate::bundling::types::short_id;
use crate::bundling::{BranchInfo, Outcome, RangeResolver};
use anyhow::Result;
use serde::Serialize;
use std::path::PathBuf;

pub struct BranchesCommand;

#[derive(Debug, Serialize)]
pub struct BranchListing {
    pub repository: PathBuf,
    pub branches: Vec<BranchInfo>,
}

impl Outcome for BranchListing {
    fn message(&self) -> String {
        format!("{} branches in {}", self.branches.len(), self.repository.display())
    }
}

impl Command for BranchesCommand {
    async fn execute(&self, ctx: &Context) -> Result<()> {
        let listing = ctx
            .run_in_repo("branches", |engine, repo| {
                Ok(BranchListing {
                    repository: repo.path().to_path_buf(),
                    branches: RangeResolver::new(engine, repo).branches()?,
                })
            })
            .await?;

        ctx.emit(&listing, |listing| {
            println!("🌿 Branches in {}", listing.repository.display());
            if listing.branches.is_empty() {
                println!("   (no commits yet)");
            }
            for branch in &listing.branches {
                let marker = if branch.is_current { "▶" } else { " " };
                println!(" {marker} {:<32} {}", branch.name, short_id(&branch.tip));
            }
        })
    }
}
