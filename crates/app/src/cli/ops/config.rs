use clap::Args;

use crate::cli::op::{Op, OpContext};
use menuboard::config::ConfigError;
use menuboard::Config;

#[derive(Args, Debug, Clone)]
pub struct ShowConfig {
    /// Print the default config file location instead
    #[arg(long)]
    pub path: bool,
}

#[async_trait::async_trait]
impl Op for ShowConfig {
    type Error = ConfigError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        if self.path {
            return Config::default_path()
                .map(|path| path.display().to_string())
                .ok_or(ConfigError::NoProjectDirs);
        }
        ctx.config.to_toml()
    }
}
