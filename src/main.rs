use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use rocket::routes;
use tokio::sync::mpsc::unbounded_channel;
use tracing::info;

mod bot;
use bot::DeployBot;

mod config;
use config::DeployBotConfig;

mod deploy;
use deploy::ScriptRunner;

mod errors;

mod github;
use github::build_commenter;

mod webhooks;
use webhooks::{github_webhook, EventSender, GitHubSecret};

#[derive(Parser)]
#[command(version)]
struct Opts {
    /// Configuration file for deploybot, environment variables override its values
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[rocket::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let opts = Opts::parse();
    let mut config: DeployBotConfig = match &opts.config {
        Some(path) => {
            let config_file = File::open(path)
                .with_context(|| format!("couldn't open {}:", path.display()))?;
            serde_yaml::from_reader(BufReader::new(config_file))
                .context("couldn't parse config file")?
        }
        None => DeployBotConfig::default(),
    };
    config
        .apply_env(|name| std::env::var(name).ok())
        .context("invalid environment")?;

    let webhook_secret = config.webhook_secret()?.to_string();
    let credentials = config.credentials()?;
    info!("using {:?} credentials", credentials);

    let commenter = build_commenter(&config.github, credentials)
        .context("failed to create GitHub client")?;
    let deployer = Arc::new(ScriptRunner::new(&config.deploy));
    let bot = DeployBot::new(commenter, deployer, config.notify_deployment_failure);

    let (sender, receiver) = unbounded_channel();
    tokio::spawn(async move { bot.run(receiver).await });

    let figment = rocket::Config::figment()
        .merge(("address", config.address.as_str()))
        .merge(("port", config.port));
    info!(
        "listening for events at http://{}:{}/api/webhook",
        config.address, config.port
    );

    let rocket = rocket::custom(figment)
        .mount("/", routes![github_webhook])
        .manage(EventSender(sender))
        .manage(GitHubSecret(webhook_secret));
    rocket.launch().await.map_err(|err| anyhow::anyhow!(err))?;

    Ok(())
}
