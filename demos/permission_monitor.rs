use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use env_logger::Env;
use fanotify_listener::{Event, EventMask, ListenerConfig, PermissionClass, WatchTarget};
use log::info;

/// Simple access control based on process ID and path
struct AccessController {
    allowed_pids: HashMap<i32, String>,
    denied_names: Vec<String>,
}

impl AccessController {
    fn new() -> Self {
        let mut controller = Self {
            allowed_pids: HashMap::new(),
            denied_names: Vec::new(),
        };

        controller.allowed_pids.insert(1, "init".to_string());
        controller.denied_names.push("shadow".to_string());
        controller.denied_names.push("id_rsa".to_string());

        controller
    }

    fn should_allow(&self, event: &Event) -> bool {
        if self.allowed_pids.contains_key(&event.pid) {
            return true;
        }

        let path = event.full_path();
        let path_str = path.to_string_lossy();
        !self
            .denied_names
            .iter()
            .any(|denied| path_str.contains(denied.as_str()))
    }

    fn process_name(&self, pid: i32) -> String {
        self.allowed_pids
            .get(&pid)
            .cloned()
            .unwrap_or_else(|| format!("unknown_pid_{}", pid))
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let controller = AccessController::new();

    let monitor_path = std::env::args().nth(1).unwrap_or_else(|| "/".to_string());
    let monitor_path = Path::new(&monitor_path).canonicalize()?;

    let listener = ListenerConfig::new(&monitor_path)
        .permission_class(PermissionClass::PostContent)
        .build()?;
    let listener = Arc::new(listener);
    listener.add_watch(
        &WatchTarget::directory(&monitor_path),
        EventMask::FILE_OPEN_PERMISSION | EventMask::FILE_ACCESS_PERMISSION,
    )?;

    println!("Permission monitoring active on {}. Press Ctrl+C to stop.", monitor_path.display());

    let runner = Arc::clone(&listener);
    let running = thread::spawn(move || runner.start());

    let mut allowed_count = 0u64;
    let mut denied_count = 0u64;
    for event in listener.events() {
        if !event.is_permission() {
            continue;
        }

        let allow = controller.should_allow(&event);
        if allow {
            listener.allow(&event)?;
            allowed_count += 1;
        } else {
            listener.deny(&event)?;
            denied_count += 1;
        }
        info!(
            "{} {} by {} (PID: {}): {}",
            if allow { "ALLOWED" } else { "DENIED" },
            event.mask,
            controller.process_name(event.pid),
            event.pid,
            event.full_path().display()
        );

        let total = allowed_count + denied_count;
        if total % 100 == 0 {
            println!("Statistics:");
            println!("  Total events: {}", total);
            println!("  Allowed: {}", allowed_count);
            println!("  Denied: {}", denied_count);
            println!();
        }
    }

    running.join().map_err(|_| "read loop panicked")??;
    Ok(())
}
