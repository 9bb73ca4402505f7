use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::error;
use webnovel_fetch::actions::{self, RunSummary};
use webnovel_fetch::browser::HttpBrowser;
use webnovel_fetch::utils::{get_user_urls, prompt};
use webnovel_fetch::Config;

async fn run_action(choice: &str, browser: &HttpBrowser, config: &Config) -> Result<Option<RunSummary>> {
    let summary = match choice {
        "1" | "2" => {
            let urls: Vec<String> = get_user_urls()?.into_iter().map(String::from).collect();
            let keep = if urls.len() > 1 {
                let answer = prompt(&format!("Take title/author/cover from which source? (1-{}): ", urls.len()))?;
                answer.parse::<usize>().unwrap_or(1).saturating_sub(1)
            } else {
                0
            };
            if choice == "1" {
                actions::webnovel_to_epub(browser, config, &urls, keep).await?
            } else {
                actions::webnovel_to_json(browser, config, &urls, keep).await?
            }
        }
        "3" => {
            let path = PathBuf::from(prompt("Path to the JSON snapshot: ")?);
            actions::json_to_epub(browser, config, &path).await?
        }
        "4" => {
            let path = PathBuf::from(prompt("Path to the EPUB to update: ")?);
            actions::update_epub(browser, config, &path).await?
        }
        _ => {
            println!("Unknown action '{}'", choice);
            return Ok(None);
        }
    };
    Ok(Some(summary))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::load(Path::new("config.toml")).context("loading config.toml")?;
    let browser = HttpBrowser::new(&config.scraping).context("starting http client")?;

    loop {
        println!("\n=== webnovel-fetch ===");
        println!("1) Webnovel -> EPUB");
        println!("2) Webnovel -> JSON");
        println!("3) JSON -> EPUB");
        println!("4) Update EPUB");
        let choice = prompt("Choose an action: ")?;

        match run_action(&choice, &browser, &config).await {
            Ok(Some(summary)) => {
                println!(
                    "\nSaved {} ({}/{} chapters)",
                    summary.output.display(),
                    summary.report.completed,
                    summary.report.total
                );
                if !summary.report.failures.is_empty() {
                    println!("{} chapters could not be fetched", summary.report.failures.len());
                }
            }
            Ok(None) => {}
            Err(e) => error!("{:#}", e),
        }

        let again = prompt("\nDo something else? (y/n): ")?;
        if again.to_lowercase() != "y" {
            break;
        }
    }

    println!("Bye.");
    Ok(())
}
