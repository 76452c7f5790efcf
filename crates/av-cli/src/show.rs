//! `show` command handling for the CLI

use anyhow::Result;
use av_core::{GenerationRecord, FsStorage, PersistentStorage};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;

/// Arguments for the show command
#[derive(Args)]
pub struct ShowArgs {
    /// Code of the avatar
    pub avatar_code: String,

    /// Directory holding the avatar files
    #[arg(long, default_value = "avatars-data")]
    pub storage: PathBuf,
}

impl ShowArgs {
    /// Run the show command
    pub async fn run(self) -> Result<()> {
        let storage: Arc<dyn PersistentStorage> = Arc::new(FsStorage::new(&self.storage));
        let record = GenerationRecord::load(storage, &self.avatar_code).wait().await?;
        println!("{}", serde_json::to_string_pretty(&record)?);
        Ok(())
    }
}
