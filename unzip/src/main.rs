use std::fs::{self, File};
use std::io::{self, Cursor};
use std::path::PathBuf;

use anyhow::*;
use camino::{Utf8Component, Utf8Path};
use log::*;
use memmap2::Mmap;
use rayon::prelude::*;
use structopt::*;

use layerio::read::*;

#[derive(Debug, StructOpt)]
#[structopt(name = "unzip", about = "Dumps a .zip file into the current directory")]
struct Opt {
    /// Pass multiple times for additional verbosity (info, debug, trace)
    #[structopt(short, long, parse(from_occurrences))]
    verbosity: usize,

    /// Change to the given directory before perfoming any operations.
    #[structopt(short = "C", long)]
    directory: Option<PathBuf>,

    /// Lists the files in the ZIP archive instead of extracting them.
    #[structopt(short = "n", long)]
    dry_run: bool,

    #[structopt(name("ZIP file"))]
    zip_path: PathBuf,
}

fn main() -> Result<()> {
    let args = Opt::from_args();

    let mut errlog = stderrlog::new();
    errlog.verbosity(args.verbosity + 1);
    errlog.init()?;

    // Open the archive before changing directories so relative paths still work.
    info!("Memory mapping {:#?}", &args.zip_path);
    let zip_file = File::open(&args.zip_path).context("Couldn't open zip file")?;
    let mapping = unsafe { Mmap::map(&zip_file).context("Couldn't mmap zip file")? };

    if let Some(chto) = &args.directory {
        std::env::set_current_dir(chto)
            .with_context(|| format!("Couldn't set working directory to {}", chto.display()))?;
    }

    let archive = ZipArchive::new(Cursor::new(&mapping[..])).context("Couldn't load archive")?;
    info!("{} entries", archive.len());

    if args.dry_run {
        list(archive.entries());
        Ok(())
    } else {
        extract(&mapping, archive.entries())
    }
}

fn list(entries: &[ZipEntry]) {
    for entry in entries {
        let modified = entry
            .last_modified
            .map(|t| t.to_string())
            .unwrap_or_else(|| String::from("-"));
        println!(
            "{:>10} {:>10} {:<12} {:<19} {}",
            entry.size,
            entry.compressed_size,
            format!("{:?}", entry.compression_method),
            modified,
            entry.path
        );
    }
}

/// Entries can name anything; only extract ones that stay below the current directory.
fn is_safe(path: &Utf8Path) -> bool {
    path.components()
        .all(|c| matches!(c, Utf8Component::Normal(_) | Utf8Component::CurDir))
}

fn extract(mapping: &[u8], entries: &[ZipEntry]) -> Result<()> {
    let entries: Vec<&ZipEntry> = entries
        .iter()
        .filter(|entry| {
            let safe = is_safe(&entry.path);
            if !safe {
                warn!("Skipping {}, which points outside the destination", entry.path);
            }
            safe
        })
        .collect();

    for dir in entries.iter().filter(|e| e.is_dir()) {
        fs::create_dir_all(&dir.path)
            .with_context(|| format!("Couldn't create directory {}", dir.path))?;
    }

    // Every worker gets its own cursor over the mapping,
    // and decodes straight out of it.
    entries
        .par_iter()
        .filter(|e| e.is_file())
        .try_for_each(|entry| {
            if let Some(parent) = entry.path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Couldn't create directory {}", parent))?;
            }
            let mut reader = open_entry_direct(Cursor::new(mapping), entry)
                .with_context(|| format!("Couldn't open {}", entry.path))?;
            let mut sink = File::create(&entry.path)
                .with_context(|| format!("Couldn't create file {}", entry.path))?;
            io::copy(&mut reader, &mut sink)
                .with_context(|| format!("Couldn't extract {}", entry.path))?;
            debug!("Extracted {}", entry.path);
            Ok(())
        })
}
