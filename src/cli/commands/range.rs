use super::{Command, Context};
use crate::bundling::types::short_id;
use crate::bundling::{CommitInfo, CommitRange, Outcome, RangeResolver};
use anyhow::Result;
use serde::Serialize;

pub struct RangeCommand {
    pub reference: Option<String>,
    pub base: Option<String>,
}

/// A range plus its newest commits, for previewing a pack.
#[derive(Debug, Serialize)]
pub struct RangePreview {
    #[serde(flatten)]
    pub range: CommitRange,
    pub preview: Vec<CommitInfo>,
}

impl Outcome for RangePreview {
    fn message(&self) -> String {
        self.range.describe()
    }
}

impl Command for RangeCommand {
    async fn execute(&self, ctx: &Context) -> Result<()> {
        let reference = self.reference.clone();
        let base = self.base.clone();
        let page_size = ctx.config.log.page_size.max(1);

        let preview = ctx
            .run_in_repo("range", move |engine, repo| {
                let resolver = RangeResolver::new(engine, repo).with_page_size(page_size);
                let reference = match reference {
                    Some(r) => r,
                    None => resolver.default_reference()?,
                };
                let range = resolver.compute_range(&reference, base.as_deref())?;
                let preview = resolver
                    .range_log(&range)
                    .iter()
                    .take(page_size)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(RangePreview { range, preview })
            })
            .await?;

        ctx.emit(&preview, |p| {
            match &p.range.base {
                None => println!("📦 Bundle content: {}", p.range.describe()),
                Some(base) => println!(
                    "📦 Bundle content: everything on {} after {} ({} commits)",
                    p.range.reference,
                    short_id(base),
                    p.range.count
                ),
            }
            if p.range.is_empty() {
                println!("⚠️  Nothing to pack: the base already contains {}", p.range.reference);
                return;
            }
            println!();
            for commit in &p.preview {
                println!("   {}  {}", commit.short_id(), commit.summary);
            }
            let remaining = p.range.count.saturating_sub(p.preview.len() as u64);
            if remaining > 0 {
                println!("   ... and {remaining} more");
            }
        })
    }
}
