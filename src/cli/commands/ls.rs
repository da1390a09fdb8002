//! Ls command - browse a scope from the terminal

use crate::cli::args::{LsArgs, OutputFormat};
use crate::config::Config;
use crate::error::CacheResult;
use crate::scope::ScopeRegistry;
use crate::store::{self, DirectoryEntry, Listing};
use console::style;

/// Execute the ls command
pub async fn execute(args: LsArgs, config: &Config) -> CacheResult<()> {
    let registry = ScopeRegistry::from_config(config)?;
    let scope = registry.get(&args.scope)?;
    let base_url = format!("{}/{}/browse", config.server.public_url(), scope.name());

    let listing = store::list(scope.root(), args.path.as_deref().unwrap_or(""), &base_url).await?;

    match (args.format, &listing) {
        (OutputFormat::Json, _) => println!("{}", serde_json::to_string_pretty(&listing)?),
        (_, Listing::File { content, .. }) => print!("{}", content),
        (OutputFormat::Table, Listing::Directory { path, entries, .. }) => {
            print_table(scope.name(), path, entries)
        }
        (OutputFormat::Plain, Listing::Directory { entries, .. }) => {
            for entry in entries {
                println!("{}", entry.name);
            }
        }
    }

    Ok(())
}

fn print_table(scope: &str, path: &str, entries: &[DirectoryEntry]) {
    println!("{}", style(format!("{}:/{}", scope, path)).bold());

    if entries.is_empty() {
        println!("  {}", style("(empty)").dim());
        return;
    }

    println!(
        "{:<40} {:>12} {:<17}",
        style("NAME").bold(),
        style("SIZE").bold(),
        style("MODIFIED").bold()
    );
    println!("{}", "-".repeat(71));

    for entry in entries {
        let name = if entry.is_directory {
            style(format!("{}/", entry.name)).blue()
        } else {
            style(entry.name.clone())
        };
        let size = entry.size.map(|s| s.to_string()).unwrap_or_default();
        let modified = entry
            .last_modified
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!("{:<40} {:>12} {:<17}", name, size, modified);
    }

    println!();
    println!("{} entr{}", entries.len(), if entries.len() == 1 { "y" } else { "ies" });
}
