use crate::jobs::JOBS;
use crate::output;

pub fn execute() {
    output::header(&format!("{} jobs", JOBS.len()));
    for (name, description, _) in JOBS {
        println!("  {:<20} {}", name, description);
    }
}
