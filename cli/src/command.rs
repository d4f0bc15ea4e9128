// Command grammar
// Verbs are case-insensitive; arguments are whitespace-separated
// tokens. File commands become queued tasks; administrative verbs run
// on the producer thread and never enter the queue.

/// Tag of a queued command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Ls,
    Cat,
    Rm,
    Copy,
    Write,
    Touch,
    Exit,
    Empty,
    Unknown,
}

/// One queued command plus its result slot.
#[derive(Debug, Clone)]
pub struct Task {
    pub kind: CommandKind,
    pub args: Vec<String>,
    /// Filled in by the worker that executes the task.
    pub result: String,
    pub completed: bool,
}

impl Task {
    pub fn new(kind: CommandKind, args: Vec<String>) -> Self {
        Self {
            kind,
            args,
            result: String::new(),
            completed: false,
        }
    }
}

/// Verbs handled directly by the producer, under the filesystem lock,
/// so they cannot race in-flight tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminCommand {
    Format,
    Mount,
    Umount,
    Info,
    Help,
}

pub fn parse_admin(verb: &str) -> Option<AdminCommand> {
    match verb.to_ascii_lowercase().as_str() {
        "format" => Some(AdminCommand::Format),
        "mount" => Some(AdminCommand::Mount),
        "umount" => Some(AdminCommand::Umount),
        "info" => Some(AdminCommand::Info),
        "help" => Some(AdminCommand::Help),
        _ => None,
    }
}

/// Tokenize one input line into a task. Arity is not enforced here;
/// the handlers report missing arguments as task results.
pub fn parse_task(line: &str) -> Task {
    let mut tokens = line.split_whitespace();
    let verb = match tokens.next() {
        Some(v) => v.to_ascii_lowercase(),
        None => return Task::new(CommandKind::Empty, Vec::new()),
    };
    let args: Vec<String> = tokens.map(str::to_string).collect();

    let kind = match verb.as_str() {
        "ls" => CommandKind::Ls,
        "cat" => CommandKind::Cat,
        "rm" => CommandKind::Rm,
        "copy" => CommandKind::Copy,
        "write" => CommandKind::Write,
        "touch" | "create" => CommandKind::Touch,
        "exit" => CommandKind::Exit,
        _ => CommandKind::Unknown,
    };
    Task::new(kind, args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_verbs_case_insensitively() {
        assert_eq!(parse_task("LS").kind, CommandKind::Ls);
        assert_eq!(parse_task("Cat a.txt").kind, CommandKind::Cat);
        assert_eq!(parse_task("rm a.txt").kind, CommandKind::Rm);
        assert_eq!(parse_task("exit").kind, CommandKind::Exit);
    }

    #[test]
    fn create_is_an_alias_of_touch() {
        assert_eq!(parse_task("create x").kind, CommandKind::Touch);
        assert_eq!(parse_task("touch x").kind, CommandKind::Touch);
    }

    #[test]
    fn blank_line_is_empty() {
        assert_eq!(parse_task("").kind, CommandKind::Empty);
        assert_eq!(parse_task("   \t ").kind, CommandKind::Empty);
    }

    #[test]
    fn unknown_verbs_are_tagged() {
        assert_eq!(parse_task("frobnicate").kind, CommandKind::Unknown);
    }

    #[test]
    fn write_keeps_the_content_tail() {
        let task = parse_task("write notes.txt hello there world");
        assert_eq!(task.kind, CommandKind::Write);
        assert_eq!(task.args, vec!["notes.txt", "hello", "there", "world"]);
    }

    #[test]
    fn copy_takes_two_names() {
        let task = parse_task("copy a b");
        assert_eq!(task.kind, CommandKind::Copy);
        assert_eq!(task.args, vec!["a", "b"]);
    }

    #[test]
    fn admin_verbs_do_not_queue() {
        assert_eq!(parse_admin("format"), Some(AdminCommand::Format));
        assert_eq!(parse_admin("MOUNT"), Some(AdminCommand::Mount));
        assert_eq!(parse_admin("umount"), Some(AdminCommand::Umount));
        assert_eq!(parse_admin("info"), Some(AdminCommand::Info));
        assert_eq!(parse_admin("help"), Some(AdminCommand::Help));
        assert_eq!(parse_admin("ls"), None);
    }
}
