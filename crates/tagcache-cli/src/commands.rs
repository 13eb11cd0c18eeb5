//! Operator commands

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use tagcache::{KvStore, Lifespan};

use crate::bootstrap::Cache;

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Look up a key
    Get {
        key: String,
        /// Implicit tag to check staleness against (repeatable)
        #[arg(short = 'i', long = "implicit-tag")]
        implicit_tags: Vec<String>,
    },
    /// Store a JSON value
    Set {
        key: String,
        /// JSON payload
        value: String,
        /// Declared tag (repeatable)
        #[arg(short, long = "tag")]
        tags: Vec<String>,
        /// Absolute expiry, Unix seconds
        #[arg(long)]
        expire_at: Option<i64>,
    },
    /// Invalidate every entry carrying a tag
    Revalidate { tag: String },
    /// Dump the tag index
    Tags,
    /// Check the store connection
    Health,
}

/// Run `command`, returning what to print
pub async fn run<S: KvStore + ?Sized + 'static>(cache: &Cache<S>, command: Command) -> Result<String> {
    match command {
        Command::Get { key, implicit_tags } => match cache.chain.get(&key, &implicit_tags).await {
            Some(entry) => Ok(serde_json::to_string_pretty(&entry)?),
            None => Ok("(miss)".to_string()),
        },
        Command::Set {
            key,
            value,
            tags,
            expire_at,
        } => {
            if cache.chain.is_empty() {
                bail!("no cache handler available");
            }
            let value: serde_json::Value =
                serde_json::from_str(&value).context("value must be valid JSON")?;
            let lifespan = expire_at.map(|expire_at| Lifespan { expire_at });

            let (entry, stored) = cache.chain.set_value(&key, value, &tags, lifespan).await;
            if stored == 0 {
                bail!("no handler accepted the entry");
            }
            Ok(format!("OK lastModified={}", entry.last_modified))
        }
        Command::Revalidate { tag } => {
            let succeeded = cache.chain.revalidate_tag(&tag).await;
            Ok(format!("OK handlers={}", succeeded))
        }
        Command::Tags => {
            let Some(engine) = &cache.engine else {
                bail!("cache is not connected");
            };
            let records = engine.tag_records().await?;
            Ok(records
                .into_iter()
                .map(|(key, tags)| format!("{}\t{}", key, tags.join(",")))
                .collect::<Vec<_>>()
                .join("\n"))
        }
        Command::Health => match &cache.engine {
            Some(engine) if engine.is_ready() => Ok("OK".to_string()),
            _ => bail!("FAILED"),
        },
    }
}
