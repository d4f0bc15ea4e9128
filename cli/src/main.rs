mod command;
mod queue;
mod worker;

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context};
use clap::Parser;
use log::info;
use simfs_fs::{SimFs, SimfsError};

use command::{parse_admin, parse_task, AdminCommand, CommandKind};
use queue::TaskQueue;
use worker::{lock_fs, spawn_workers};

#[derive(Parser)]
#[command(name = "simfs")]
#[command(about = "Multithreaded shell over a simulated disk filesystem", long_about = None)]
struct Cli {
    /// Path to the disk image
    image: PathBuf,

    /// Number of worker threads (default: host CPU count)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Format the image before mounting
    #[arg(long)]
    format: bool,

    /// Run the built-in smoke test against the image and exit
    #[arg(long)]
    test: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    if cli.test {
        if !run_self_test(&cli.image) {
            bail!("self test failed");
        }
        return Ok(());
    }

    let mut fs = SimFs::new(&cli.image);
    if cli.format {
        fs.format().context("formatting the image failed")?;
    }
    fs.mount().with_context(|| {
        format!(
            "could not mount {} (pass --format to initialize a new image)",
            cli.image.display()
        )
    })?;

    let fs = Arc::new(Mutex::new(fs));
    let queue = Arc::new(TaskQueue::new());
    let worker_count = cli.workers.unwrap_or_else(default_worker_count);
    info!("starting {} workers", worker_count);
    let workers = spawn_workers(worker_count, Arc::clone(&queue), Arc::clone(&fs));

    print_help();
    prompt();

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;

        // Administrative verbs run here, under the filesystem lock,
        // never through the queue.
        if let Some(admin) = line.split_whitespace().next().and_then(parse_admin) {
            run_admin(admin, &fs);
            prompt();
            continue;
        }

        let task = parse_task(&line);
        let is_exit = task.kind == CommandKind::Exit;
        queue.enqueue(task);
        if is_exit {
            break;
        }
        prompt();
    }

    // Covers EOF without an explicit exit; queued tasks still drain.
    queue.shutdown();
    for handle in workers {
        let _ = handle.join();
    }

    lock_fs(&fs).unmount()?;
    Ok(())
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn prompt() {
    let mut out = io::stdout().lock();
    let _ = write!(out, "> ");
    let _ = out.flush();
}

fn run_admin(admin: AdminCommand, fs: &Mutex<SimFs>) {
    let mut fs = lock_fs(fs);
    match admin {
        AdminCommand::Format => match fs.format() {
            Ok(()) => println!("format complete"),
            Err(e) => println!("format failed: {}", e),
        },
        AdminCommand::Mount => match fs.mount() {
            Ok(()) => println!("mounted"),
            Err(e) => println!("mount failed: {}", e),
        },
        AdminCommand::Umount => match fs.unmount() {
            Ok(()) => println!("unmounted"),
            Err(e) => println!("unmount failed: {}", e),
        },
        AdminCommand::Info => match fs.statfs() {
            Ok(stats) => {
                let mib = |blocks: u32| {
                    blocks as f64 * stats.block_size as f64 / (1024.0 * 1024.0)
                };
                println!("Filesystem: {}", stats.magic);
                println!("  block size:    {} bytes", stats.block_size);
                println!("  total blocks:  {}", stats.total_blocks);
                println!("  capacity:      {:.2} MiB", mib(stats.total_blocks));
                println!(
                    "  used:          {:.2} MiB",
                    mib(stats.data_blocks - stats.free_blocks)
                );
                println!("  free:          {:.2} MiB", mib(stats.free_blocks));
                println!("  total inodes:  {}", stats.total_inodes);
                println!(
                    "  used inodes:   {}",
                    stats.total_inodes - stats.free_inodes
                );
                println!("  free inodes:   {}", stats.free_inodes);
            }
            Err(e) => println!("info failed: {}", e),
        },
        AdminCommand::Help => print_help(),
    }
}

fn print_help() {
    println!("simfs commands:");
    println!("  ls                   list files");
    println!("  cat <name>           print file contents");
    println!("  rm <name>            delete a file");
    println!("  copy <src> <dst>     duplicate a file");
    println!("  write <name> <text>  overwrite a file from offset 0");
    println!("  touch <name>         create an empty file (alias: create)");
    println!("  format               initialize the image (unmounted only)");
    println!("  mount / umount       attach or detach the image");
    println!("  info                 show filesystem statistics");
    println!("  help                 show this text");
    println!("  exit                 drain pending commands and quit");
}

/// The smoke sequence the original tool ships: format, mount, exercise
/// one file end to end, unmount. Prints one line per step and returns
/// whether everything passed.
fn run_self_test(image: &Path) -> bool {
    let mut fs = SimFs::new(image);
    let mut passed = 0;
    let mut total = 0;

    let mut check = |label: &str, ok: bool| {
        total += 1;
        if ok {
            passed += 1;
        }
        println!("test {:2} ({}): {}", total, label, if ok { "ok" } else { "FAILED" });
        ok
    };

    check("format", fs.format().is_ok());
    check("mount", fs.mount().is_ok());

    let inode = fs.create_file("test1.txt").ok();
    check("create", inode.is_some());
    let inode = inode.unwrap_or(0);

    check(
        "duplicate create rejected",
        matches!(fs.create_file("test1.txt"), Err(SimfsError::AlreadyExists(_))),
    );

    let content = b"hello, disk fs!";
    check(
        "write",
        fs.write_file(inode, 0, content).map(|n| n == content.len()).unwrap_or(false),
    );
    check(
        "read back",
        fs.read_file(inode, 0, content.len())
            .map(|bytes| bytes == content)
            .unwrap_or(false),
    );
    check(
        "list",
        fs.list_files()
            .map(|entries| {
                entries
                    .iter()
                    .any(|e| e.name == "test1.txt" && e.inode_num == inode)
            })
            .unwrap_or(false),
    );
    check("delete", fs.delete_file("test1.txt").is_ok());
    check(
        "deleted file gone",
        matches!(fs.open_file("test1.txt"), Err(SimfsError::NotFound(_))),
    );
    check("unmount", fs.unmount().is_ok());

    println!("{} of {} tests passed", passed, total);
    passed == total
}
