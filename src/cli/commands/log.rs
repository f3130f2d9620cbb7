use super::{Command, Context};
use crate::bundling::{CommitInfo, Outcome, RangeResolver};
use anyhow::Result;
use serde::Serialize;

pub struct LogCommand {
    pub reference: Option<String>,
    pub page: usize,
    pub page_size: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct CommitPage {
    pub reference: String,
    pub page: usize,
    pub pages: usize,
    pub total: u64,
    pub commits: Vec<CommitInfo>,
}

impl CommitPage {
    pub fn has_more(&self) -> bool {
        self.page < self.pages
    }
}

impl Outcome for CommitPage {
    fn message(&self) -> String {
        format!(
            "{}: page {}/{} ({} commits)",
            self.reference,
            self.page,
            self.pages.max(1),
            self.total
        )
    }
}

impl Command for LogCommand {
    async fn execute(&self, ctx: &Context) -> Result<()> {
        let reference = self.reference.clone();
        let page = self.page.max(1);
        let page_size = self.page_size.unwrap_or(ctx.config.log.page_size).max(1);

        let listing = ctx
            .run_in_repo("log", move |engine, repo| {
                let resolver = RangeResolver::new(engine, repo).with_page_size(page_size);
                let reference = match reference {
                    Some(r) => r,
                    None => resolver.default_reference()?,
                };
                let total = resolver.compute_range(&reference, None)?.count;
                let commits = resolver.list_commits(&reference)?.page(page - 1)?;
                Ok(CommitPage {
                    pages: (total as usize).div_ceil(page_size),
                    reference,
                    page,
                    total,
                    commits,
                })
            })
            .await?;

        ctx.emit(&listing, |listing| {
            println!("📜 {}", listing.message());
            println!();
            for commit in &listing.commits {
                println!(
                    "   {}  {}  {:<18}  {}",
                    commit.short_id(),
                    commit.timestamp.format("%Y-%m-%d %H:%M"),
                    commit.author,
                    commit.summary
                );
            }
            if listing.has_more() {
                println!();
                println!(
                    "💡 Older commits: git-carrier log {} --page {}",
                    listing.reference,
                    listing.page + 1
                );
            }
        })
    }
}
