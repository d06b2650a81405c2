use chrono::Local;
use uuid::Uuid;

/// Format: task-{YYYYMMDDHHmmss}-{random8}
pub fn generate_task_id() -> String {
    let ts = Local::now().format("%Y%m%d%H%M%S");
    let uuid = Uuid::new_v4().simple().to_string();
    format!("task-{}-{}", ts, &uuid[..8])
}

pub fn generate_run_id() -> String {
    Uuid::new_v4().to_string()
}
