// Terminal formatting for job progress

use batch_engine::BatchStatus;

const BOLD_CYAN: &str = "\x1b[1;36m";
const BOLD_GREEN: &str = "\x1b[1;32m";
const BOLD_RED: &str = "\x1b[1;31m";
const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

/// Right-aligned action label followed by a message
pub fn status(action: &str, message: &str) {
    eprintln!("{BOLD_CYAN}{:>12}{RESET} {}", action, message);
}

pub fn header(message: &str) {
    eprintln!("\x1b[1m==> {}{RESET}", message);
}

/// Final line of a run: check mark for COMPLETED, cross for anything else
pub fn outcome(status: BatchStatus, message: &str) {
    if status == BatchStatus::Completed {
        eprintln!("{BOLD_GREEN}  \u{2713}{RESET} {}", message);
    } else {
        eprintln!("{BOLD_RED}  \u{2717}{RESET} {}", message);
    }
}

/// Step or partition line colored by its status
pub fn progress(status: BatchStatus, line: &str) {
    let color = match status {
        BatchStatus::Completed => GREEN,
        BatchStatus::Stopped => YELLOW,
        _ => RED,
    };
    eprintln!("{color}{}{RESET}", line);
}

pub fn warning(message: &str) {
    eprintln!("{YELLOW}  !{RESET} {}", message);
}

pub fn error(message: &str) {
    eprintln!("{BOLD_RED}error:{RESET} {}", message);
}

pub fn dim(message: &str) {
    eprintln!("{DIM}{}{RESET}", message);
}
