use super::{Command, Context};
use crate::bundling::types::short_id;
use crate::bundling::{BundleUnpacker, Outcome};
use crate::cli::lock::with_repository_lock;
use anyhow::Result;
use std::path::PathBuf;

pub struct UnpackCommand {
    pub bundle: PathBuf,
    pub branch: Option<String>,
}

impl Command for UnpackCommand {
    async fn execute(&self, ctx: &Context) -> Result<()> {
        let bundle = self.bundle.clone();
        let branch = self.branch.clone();

        let outcome = ctx
            .run_in_repo("unpack", move |engine, repo| {
                with_repository_lock(repo, || {
                    BundleUnpacker::new(engine, repo).unpack(&bundle, branch.as_deref())
                })
            })
            .await?;

        ctx.emit(&outcome, |o| {
            if o.is_noop() {
                println!("✅ {}; nothing to apply", o.message());
                return;
            }
            println!("✅ {}", o.message());
            if let Some(previous) = &o.previous_tip {
                println!("   {} → {}", short_id(previous), short_id(&o.new_tip));
            }
        })
    }
}
