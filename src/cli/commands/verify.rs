use super::{Command, Context};
use crate::bundling::types::short_id;
use crate::bundling::verify_bundle;
use anyhow::Result;
use std::path::PathBuf;

pub struct VerifyCommand {
    pub bundle: PathBuf,
}

impl Command for VerifyCommand {
    async fn execute(&self, ctx: &Context) -> Result<()> {
        let bundle = self.bundle.clone();
        let report = ctx
            .run("verify", move |engine| verify_bundle(engine, &bundle))
            .await?;

        ctx.emit(&report, |r| {
            println!("✅ {} is intact ({} bytes)", r.path.display(), r.size_bytes);
            for head in &r.heads {
                println!("   🔖 {} {}", short_id(&head.id), head.name);
            }
            if r.thin {
                println!("   ℹ️  Incremental bundle: the destination needs its base commits");
            }
        })
    }
}
