use std::env;
use std::path::{Path, PathBuf};
use std::process;

use penumbra::htree::{defrag, stats};
use penumbra::store::ROOT_SLOTS;
use penumbra::{RecordStore, Result};

fn print_usage() {
    eprintln!("┌─────────────────────────────────────────────┐");
    eprintln!("│        Penumbra Store Inspector             │");
    eprintln!("└─────────────────────────────────────────────┘");
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    penumbra-inspect <store> <command> [args]");
    eprintln!();
    eprintln!("COMMANDS:");
    eprintln!("    info             Show store metadata");
    eprintln!("    stats            Show per-tree statistics");
    eprintln!("    verify           Check tree structural invariants");
    eprintln!("    defrag <dst>     Rebuild the store into a fresh file");
    eprintln!();
    eprintln!("EXAMPLES:");
    eprintln!("    penumbra-inspect records.db info");
    eprintln!("    penumbra-inspect records.db defrag compact.db");
    eprintln!();
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut scaled = bytes as f64;
    let mut unit = 0;
    while scaled >= 1024.0 && unit + 1 < UNITS.len() {
        scaled /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{scaled:.1} {}", UNITS[unit])
    }
}

fn print_header(title: &str) {
    let width = 52;
    let bar = "═".repeat(width);
    let pad = width.saturating_sub(title.len());
    let left = pad / 2;
    println!();
    println!("╔{bar}╗");
    println!("║{}{title}{}║", " ".repeat(left), " ".repeat(pad - left));
    println!("╚{bar}╝");
}

fn print_section(title: &str) {
    println!();
    println!(
        "─── {} {}",
        title,
        "─".repeat(46usize.saturating_sub(title.len()))
    );
}

fn print_field(name: &str, value: impl std::fmt::Display) {
    println!("  {name:.<28} {value}");
}

fn cmd_info(path: &Path) -> Result<()> {
    print_header("STORE INFO");
    let store = RecordStore::open(path)?;
    let file_size = std::fs::metadata(path)?.len();
    let store_stats = store.stats();

    print_section("File");
    print_field("Store Path", path.display());
    print_field("Size on Disk", format_bytes(file_size));
    print_field("Page Size", format!("{} bytes", store_stats.page_size));

    print_section("Pages");
    print_field("Total Pages", store_stats.page_count);
    print_field("Free Pages", store_stats.free_pages);
    print_field("Translation Pages", store_stats.table_pages);
    print_field("Next Record Id", store_stats.next_recid);

    print_section("Root Slots");
    let mut registered = 0;
    for slot in 0..ROOT_SLOTS {
        let recid = store.get_root(slot)?;
        if !recid.is_none() {
            print_field(&format!("Slot {slot}"), recid);
            registered += 1;
        }
    }
    if registered == 0 {
        println!("  (none registered)");
    }

    println!();
    println!("✓ Store opened successfully");
    println!();
    Ok(())
}

fn cmd_stats(path: &Path) -> Result<()> {
    print_header("TREE STATISTICS");
    let mut store = RecordStore::open(path)?;

    let mut found = false;
    for slot in 0..ROOT_SLOTS {
        let recid = store.get_root(slot)?;
        if recid.is_none() {
            continue;
        }
        found = true;
        let tree_stats = stats::collect(&mut store, recid)?;
        print_section(&format!("Tree @ slot {slot} (record {recid})"));
        print_field("Entries", tree_stats.entries);
        print_field("Directories", tree_stats.directories);
        print_field("Buckets", tree_stats.buckets);
        for (depth, count) in tree_stats.bucket_depths.iter().enumerate() {
            if *count > 0 {
                print_field(&format!("Buckets at depth {depth}"), count);
            }
        }
    }
    if !found {
        println!();
        println!("No trees registered in root slots.");
    }
    println!();
    Ok(())
}

fn cmd_verify(path: &Path) -> Result<()> {
    print_header("STRUCTURAL VERIFY");
    let mut store = RecordStore::open(path)?;

    let mut clean = true;
    let mut found = false;
    for slot in 0..ROOT_SLOTS {
        let recid = store.get_root(slot)?;
        if recid.is_none() {
            continue;
        }
        found = true;
        let report = stats::verify(&mut store, recid)?;
        print_section(&format!("Tree @ slot {slot} (record {recid})"));
        print_field("Nodes Checked", report.nodes_checked);
        if report.is_clean() {
            println!("  ✓ no problems found");
        } else {
            clean = false;
            for problem in &report.problems {
                println!("  ✗ {problem}");
            }
        }
    }
    if !found {
        println!();
        println!("No trees registered in root slots.");
    }
    println!();
    if !clean {
        process::exit(1);
    }
    Ok(())
}

fn cmd_defrag(src_path: &Path, dst_path: &Path) -> Result<()> {
    print_header("DEFRAGMENT");
    let mut src = RecordStore::open(src_path)?;
    let mut dst = RecordStore::open_with_options(
        dst_path,
        penumbra::StoreOptions {
            page_size: src.page_size(),
            cache_pages: 1024,
        },
    )?;

    let mut copied = 0;
    for slot in 0..ROOT_SLOTS {
        let recid = src.get_root(slot)?;
        if recid.is_none() {
            continue;
        }
        defrag(&mut src, &mut dst, recid)?;
        dst.set_root(slot, recid)?;
        copied += 1;
    }
    dst.flush()?;

    print_section("Result");
    print_field("Trees Copied", copied);
    print_field("Source Pages", src.stats().page_count);
    print_field("Destination Pages", dst.stats().page_count);
    println!();
    println!("✓ Defragmentation complete");
    println!();
    Ok(())
}

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        print_usage();
        process::exit(2);
    }
    let store_path = PathBuf::from(&args[1]);
    let result = match args[2].as_str() {
        "info" => cmd_info(&store_path),
        "stats" => cmd_stats(&store_path),
        "verify" => cmd_verify(&store_path),
        "defrag" => {
            if args.len() < 4 {
                print_usage();
                process::exit(2);
            }
            cmd_defrag(&store_path, Path::new(&args[3]))
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(2);
        }
    };
    if let Err(err) = result {
        eprintln!("error: {err}");
        process::exit(1);
    }
}
