// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 contentflow contributors

//! Watch command - re-apply declarations when they change

use colored::Colorize;
use miette::Result;
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEventKind};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

use super::apply::{self, ApplyArgs};
use super::{is_declaration_file, Context, OutputFormat};
use crate::reconcile::CancelSignal;
use crate::resources::expand_sources;

/// Run the watch command
pub async fn run(ctx: &Context, args: ApplyArgs, debounce_ms: u64) -> Result<()> {
    let options = apply::run_options(ctx, &args)?;
    let client = ctx.connect(args.simulate, args.url.as_deref())?;

    println!("{}", "Starting watch mode...".bold());
    println!("Watching declarations (debounce: {}ms)", debounce_ms);
    println!("Press {} to exit.", "Ctrl+C".cyan());
    println!();

    // The debouncer calls back on its own thread
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut debouncer = new_debouncer(Duration::from_millis(debounce_ms), move |result: DebounceResult| {
        let _ = tx.send(result);
    })
    .map_err(|e| miette::miette!("Failed to create file watcher: {}", e))?;

    for root in watch_roots(&args.sources) {
        debouncer
            .watcher()
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| miette::miette!("Failed to watch '{}': {}", root.display(), e))?;
    }

    let mut last_digest: Option<String> = None;

    loop {
        match ctx.load_declarations(&args.sources) {
            Ok(set) => {
                let digest = set.digest();
                if last_digest.as_deref() == Some(digest.as_str()) {
                    tracing::debug!(%digest, "declarations unchanged, skipping run");
                    println!("{}", "Declarations unchanged, nothing to apply".dimmed());
                } else {
                    let report = apply::execute(
                        ctx,
                        &set,
                        options.clone(),
                        client.clone(),
                        OutputFormat::Text,
                        CancelSignal::new(),
                    )
                    .await?;
                    print!("{}", report.render_text(ctx.verbose));
                    // A run that failed part-way is retried on the next change
                    if report.exit_code() == 0 {
                        last_digest = Some(digest);
                    }
                }
            }
            Err(e) => {
                eprintln!("{}: {}", "Failed to load declarations".red(), e);
            }
        }

        let changed = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = next_change(&mut rx) => changed,
        };
        let Some(changed) = changed else {
            break;
        };

        println!();
        println!("{}", "─".repeat(50).dimmed());
        println!("{}: {} file(s) changed", "Change detected".yellow(), changed);
        println!();
    }

    println!();
    println!("{}", "Watch stopped".dimmed());
    Ok(())
}

type DebounceResult = notify_debouncer_mini::DebounceEventResult;

/// Number of declaration files in the next batch that touches any; None once the watcher is gone
async fn next_change(rx: &mut mpsc::UnboundedReceiver<DebounceResult>) -> Option<usize> {
    while let Some(result) = rx.recv().await {
        match result {
            Ok(events) => {
                let changed = events
                    .iter()
                    .filter(|e| matches!(e.kind, DebouncedEventKind::Any))
                    .filter(|e| is_declaration_file(&e.path))
                    .count();
                if changed > 0 {
                    return Some(changed);
                }
            }
            Err(e) => eprintln!("{}: {:?}", "Watch error".red(), e),
        }
    }
    None
}

/// Directories to watch: the sources themselves, or the parents of files
fn watch_roots(sources: &[String]) -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = match expand_sources(sources) {
        Ok(files) => files
            .iter()
            .map(|f| f.parent().map(Path::to_path_buf).unwrap_or_default())
            .collect(),
        Err(_) => Vec::new(),
    };
    for source in sources {
        let path = Path::new(source);
        if path.is_dir() {
            roots.push(path.to_path_buf());
        }
    }
    roots.iter_mut().for_each(|r| {
        if r.as_os_str().is_empty() {
            *r = PathBuf::from(".");
        }
    });
    roots.sort();
    roots.dedup();
    if roots.is_empty() {
        roots.push(PathBuf::from("."));
    }
    roots
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_watch_roots() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("site.yaml");
        std::fs::write(&file, "products: []\n").unwrap();

        let roots = watch_roots(&[file.display().to_string()]);
        assert_eq!(roots, vec![dir.path().to_path_buf()]);

        let roots = watch_roots(&[dir.path().display().to_string()]);
        assert_eq!(roots, vec![dir.path().to_path_buf()]);
    }
}
