// Worker pool
// Each worker loops: dequeue, take the filesystem lock, dispatch on
// the command kind, then print the task's result and a fresh prompt.
// The filesystem lock is coarse: a handler holds it for the whole
// compound operation, so COPY's open/create/read/write sequence is
// atomic with respect to other tasks.

use std::io::Write as _;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use log::{debug, error};
use simfs_fs::{SimFs, SimfsError};

use crate::command::{CommandKind, Task};
use crate::queue::TaskQueue;

/// Take the filesystem lock, recovering it if a previous handler
/// panicked while holding it.
pub fn lock_fs(fs: &Mutex<SimFs>) -> MutexGuard<'_, SimFs> {
    match fs.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub fn spawn_workers(
    count: usize,
    queue: Arc<TaskQueue>,
    fs: Arc<Mutex<SimFs>>,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|id| {
            let queue = Arc::clone(&queue);
            let fs = Arc::clone(&fs);
            thread::spawn(move || worker_loop(id, &queue, &fs))
        })
        .collect()
}

fn worker_loop(id: usize, queue: &TaskQueue, fs: &Mutex<SimFs>) {
    debug!("worker {} started", id);
    while let Some(mut task) = queue.dequeue() {
        let is_exit = task.kind == CommandKind::Exit;
        execute_task(fs, &mut task);

        if !task.result.is_empty() {
            let mut out = std::io::stdout().lock();
            let _ = write!(out, "\n{}\n> ", task.result);
            let _ = out.flush();
        }

        if is_exit {
            queue.shutdown();
        }
    }
    debug!("worker {} exiting", id);
}

/// Run one task and fill in its result. A panicking handler is
/// reported as a generic execution error; the worker survives.
pub fn execute_task(fs: &Mutex<SimFs>, task: &mut Task) {
    let outcome = catch_unwind(AssertUnwindSafe(|| dispatch(fs, task.kind, &task.args)));
    task.result = outcome.unwrap_or_else(|_| {
        error!("handler panicked for {:?}", task.kind);
        "command execution error".to_string()
    });
    task.completed = true;
}

fn dispatch(fs: &Mutex<SimFs>, kind: CommandKind, args: &[String]) -> String {
    let mut fs = lock_fs(fs);
    match kind {
        CommandKind::Ls => handle_ls(&mut fs),
        CommandKind::Cat => handle_cat(&mut fs, args),
        CommandKind::Rm => handle_rm(&mut fs, args),
        CommandKind::Copy => handle_copy(&mut fs, args),
        CommandKind::Write => handle_write(&mut fs, args),
        CommandKind::Touch => handle_touch(&mut fs, args),
        CommandKind::Exit => "bye.".to_string(),
        CommandKind::Empty => String::new(),
        CommandKind::Unknown => "unknown command, type help for the command list".to_string(),
    }
}

fn handle_ls(fs: &mut SimFs) -> String {
    let entries = match fs.list_files() {
        Ok(entries) => entries,
        Err(e) => return format!("error: {}", e),
    };
    if entries.is_empty() {
        return "no files".to_string();
    }

    let mut out = String::from("Files:");
    for entry in entries {
        let size = fs
            .get_file_size(entry.inode_num)
            .map(|s| s.to_string())
            .unwrap_or_else(|_| "?".to_string());
        out.push_str(&format!(
            "\n  {:<27} inode {:<4} {} bytes",
            entry.name, entry.inode_num, size
        ));
    }
    out
}

fn handle_cat(fs: &mut SimFs, args: &[String]) -> String {
    let name = match args.first() {
        Some(name) => name,
        None => return "error: missing file name".to_string(),
    };
    let inode = match fs.open_file(name) {
        Ok(inode) => inode,
        Err(e) => return format!("error: {}", e),
    };
    let size = match fs.get_file_size(inode) {
        Ok(size) => size,
        Err(e) => return format!("error: {}", e),
    };
    if size == 0 {
        return "file is empty".to_string();
    }
    match fs.read_file(inode, 0, size as usize) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => format!("error: {}", e),
    }
}

fn handle_rm(fs: &mut SimFs, args: &[String]) -> String {
    let name = match args.first() {
        Some(name) => name,
        None => return "error: missing file name".to_string(),
    };
    match fs.delete_file(name) {
        Ok(()) => format!("deleted {}", name),
        Err(e) => format!("error: {}", e),
    }
}

/// COPY is the deepest compound operation: open the source, create the
/// destination, read everything, write everything, and delete the
/// half-made destination if any later step fails.
fn handle_copy(fs: &mut SimFs, args: &[String]) -> String {
    let (src, dst) = match (args.first(), args.get(1)) {
        (Some(src), Some(dst)) => (src, dst),
        _ => return "error: missing source or destination name".to_string(),
    };

    let src_inode = match fs.open_file(src) {
        Ok(inode) => inode,
        Err(_) => return format!("error: source file not found: {}", src),
    };
    let dst_inode = match fs.create_file(dst) {
        Ok(inode) => inode,
        Err(e) => return format!("error: target creation failed: {}", e),
    };

    let size = match fs.get_file_size(src_inode) {
        Ok(size) => size,
        Err(e) => {
            rollback_copy(fs, dst);
            return format!("error: {}", e);
        }
    };
    if size == 0 {
        return format!("copied {} to {} (empty file)", src, dst);
    }

    let contents = match fs.read_file(src_inode, 0, size as usize) {
        Ok(contents) => contents,
        Err(e) => {
            rollback_copy(fs, dst);
            return format!("error: reading {} failed: {}", src, e);
        }
    };

    match fs.write_file(dst_inode, 0, &contents) {
        Ok(written) if written == contents.len() => format!("copied {} to {}", src, dst),
        Ok(written) => {
            rollback_copy(fs, dst);
            format!(
                "error: short write to {} ({} of {} bytes)",
                dst,
                written,
                contents.len()
            )
        }
        Err(e) => {
            rollback_copy(fs, dst);
            format!("error: writing {} failed: {}", dst, e)
        }
    }
}

fn rollback_copy(fs: &mut SimFs, dst: &str) {
    if let Err(e) = fs.delete_file(dst) {
        error!("copy rollback could not delete {}: {}", dst, e);
    }
}

/// WRITE overwrites from offset 0 and deliberately does not shrink the
/// file: bytes past the new content keep their old values and the
/// recorded size stays at its maximum.
fn handle_write(fs: &mut SimFs, args: &[String]) -> String {
    let name = match args.first() {
        Some(name) => name,
        None => return "error: missing file name".to_string(),
    };
    let content = strip_quotes(&args[1..].join(" "));
    if content.is_empty() {
        return "error: missing content".to_string();
    }

    let inode = match fs.open_file(name) {
        Ok(inode) => inode,
        Err(SimfsError::NotFound(_)) => match fs.create_file(name) {
            Ok(inode) => inode,
            Err(e) => return format!("error: {}", e),
        },
        Err(e) => return format!("error: {}", e),
    };

    match fs.write_file(inode, 0, content.as_bytes()) {
        Ok(written) => format!("wrote {} bytes to {}", written, name),
        Err(e) => format!("error: {}", e),
    }
}

fn handle_touch(fs: &mut SimFs, args: &[String]) -> String {
    let name = match args.first() {
        Some(name) => name,
        None => return "error: missing file name".to_string(),
    };
    match fs.open_file(name) {
        Ok(_) => format!("{} already exists", name),
        Err(SimfsError::NotFound(_)) => match fs.create_file(name) {
            Ok(inode) => format!("created {} (inode {})", name, inode),
            Err(e) => format!("error: {}", e),
        },
        Err(e) => format!("error: {}", e),
    }
}

/// Content surrounded by a matching pair of double quotes loses them.
fn strip_quotes(content: &str) -> String {
    let bytes = content.as_bytes();
    if bytes.len() >= 2 && bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"' {
        content[1..content.len() - 1].to_string()
    } else {
        content.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::parse_task;
    use tempfile::NamedTempFile;

    fn mounted_fs() -> (Mutex<SimFs>, NamedTempFile) {
        let image = NamedTempFile::new().unwrap();
        let mut fs = SimFs::new(image.path());
        fs.format().unwrap();
        fs.mount().unwrap();
        (Mutex::new(fs), image)
    }

    fn run(fs: &Mutex<SimFs>, line: &str) -> String {
        let mut task = parse_task(line);
        execute_task(fs, &mut task);
        assert!(task.completed);
        task.result
    }

    #[test]
    fn touch_then_cat_then_rm() {
        let (fs, _image) = mounted_fs();

        assert!(run(&fs, "touch a.txt").starts_with("created a.txt"));
        assert_eq!(run(&fs, "touch a.txt"), "a.txt already exists");
        assert_eq!(run(&fs, "cat a.txt"), "file is empty");
        assert_eq!(run(&fs, "rm a.txt"), "deleted a.txt");
        assert!(run(&fs, "cat a.txt").starts_with("error:"));
    }

    #[test]
    fn write_creates_and_cat_reads() {
        let (fs, _image) = mounted_fs();

        assert_eq!(run(&fs, "write notes.txt hello disk"), "wrote 10 bytes to notes.txt");
        assert_eq!(run(&fs, "cat notes.txt"), "hello disk");
    }

    #[test]
    fn write_strips_matching_quotes() {
        let (fs, _image) = mounted_fs();

        run(&fs, "write q.txt \"hello there\"");
        assert_eq!(run(&fs, "cat q.txt"), "hello there");

        // a lone leading quote is kept verbatim
        run(&fs, "write raw.txt \"half");
        assert_eq!(run(&fs, "cat raw.txt"), "\"half");
    }

    #[test]
    fn copy_duplicates_contents() {
        let (fs, _image) = mounted_fs();

        run(&fs, "write src.txt payload");
        assert_eq!(run(&fs, "copy src.txt dst.txt"), "copied src.txt to dst.txt");
        assert_eq!(run(&fs, "cat dst.txt"), "payload");
    }

    #[test]
    fn copy_to_existing_target_fails_and_leaves_both_files() {
        let (fs, _image) = mounted_fs();

        run(&fs, "write a alpha");
        run(&fs, "write b beta");

        let result = run(&fs, "copy a b");
        assert!(result.starts_with("error: target creation failed"));

        // both survive the failed copy, contents untouched
        assert_eq!(run(&fs, "cat a"), "alpha");
        assert_eq!(run(&fs, "cat b"), "beta");
    }

    #[test]
    fn copy_missing_source_fails_fast() {
        let (fs, _image) = mounted_fs();
        let result = run(&fs, "copy ghost dst");
        assert!(result.starts_with("error: source file not found"));
        // no half-made destination
        assert!(run(&fs, "cat dst").starts_with("error:"));
    }

    #[test]
    fn ls_lists_files_with_sizes() {
        let (fs, _image) = mounted_fs();
        run(&fs, "write one.txt 12345");
        run(&fs, "touch two.txt");

        let listing = run(&fs, "ls");
        assert!(listing.contains("one.txt"));
        assert!(listing.contains("5 bytes"));
        assert!(listing.contains("two.txt"));
    }

    #[test]
    fn empty_task_has_no_output() {
        let (fs, _image) = mounted_fs();
        assert_eq!(run(&fs, ""), "");
    }

    #[test]
    fn unknown_and_missing_arguments_are_reported() {
        let (fs, _image) = mounted_fs();
        assert!(run(&fs, "blorp").contains("unknown command"));
        assert_eq!(run(&fs, "cat"), "error: missing file name");
        assert_eq!(run(&fs, "rm"), "error: missing file name");
        assert!(run(&fs, "copy onlyone").contains("missing source or destination"));
        assert_eq!(run(&fs, "write solo.txt"), "error: missing content");
    }

    #[test]
    fn unmounted_filesystem_surfaces_not_mounted() {
        let image = NamedTempFile::new().unwrap();
        let mut fs = SimFs::new(image.path());
        fs.format().unwrap();
        let fs = Mutex::new(fs);

        assert!(run(&fs, "ls").contains("not mounted"));
    }
}
