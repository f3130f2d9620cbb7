use super::{Command, Context};
use crate::bundling::types::short_id;
use crate::bundling::{default_output_name, BundlePacker, PackRequest, RangeResolver};
use crate::cli::lock::with_repository_lock;
use anyhow::Result;
use chrono::Local;
use std::path::PathBuf;

pub struct PackCommand {
    pub reference: Option<String>,
    pub base: Option<String>,
    pub output: Option<PathBuf>,
    pub force: bool,
}

impl Command for PackCommand {
    async fn execute(&self, ctx: &Context) -> Result<()> {
        let reference = self.reference.clone();
        let base = self.base.clone();
        let output = self.output.clone();
        let overwrite = self.force || ctx.config.pack.overwrite;
        let output_dir = ctx.config.pack.output_dir.clone();

        let outcome = ctx
            .run_in_repo("pack", move |engine, repo| {
                let reference = match reference {
                    Some(r) => r,
                    None => RangeResolver::new(engine, repo).default_reference()?,
                };
                let output = output.unwrap_or_else(|| {
                    output_dir
                        .unwrap_or_else(|| PathBuf::from("."))
                        .join(default_output_name(repo, &reference, Local::now()))
                });
                let request = PackRequest {
                    reference,
                    base,
                    output,
                    overwrite,
                };
                with_repository_lock(repo, || BundlePacker::new(engine, repo).pack(&request))
            })
            .await?;

        ctx.emit(&outcome, |o| {
            let scope = match &o.base {
                Some(base) => format!("after {}", short_id(base)),
                None => "full history".to_string(),
            };
            println!(
                "✅ Packed {} commits of {} ({scope})",
                o.commit_count, o.reference
            );
            println!("   📄 {}", o.path.display());
            println!("   🔖 {} at {}", o.ref_name, short_id(&o.tip));
            println!("   📏 {} bytes, verified", o.size_bytes);
        })
    }
}
