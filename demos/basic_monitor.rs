use std::sync::Arc;
use std::thread;

use env_logger::Env;
use fanotify_listener::{EventMask, Listener, WatchTarget};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    // Get the directory to monitor from command line args or use current directory
    let monitor_path = std::env::args().nth(1).unwrap_or_else(|| ".".to_string());
    let monitor_path = std::fs::canonicalize(monitor_path)?;

    let listener = Arc::new(Listener::new(&monitor_path, 4096, true)?);
    println!(
        "Monitoring directory: {} (kernel {}, {:?})",
        monitor_path.display(),
        listener.kernel_version(),
        listener.report_tier()
    );

    // Directory entry events need a kernel that reports file identifiers.
    let mut mask = EventMask::FILE_MODIFIED | EventMask::FILE_CLOSED;
    if listener.report_tier() != fanotify_listener::ReportTier::None {
        mask |= EventMask::FILE_OR_DIRECTORY_CREATED | EventMask::FILE_OR_DIRECTORY_DELETED;
    }
    listener.add_watch(&WatchTarget::directory(&monitor_path), mask)?;

    println!("Watch added successfully. Press Ctrl+C to stop.");

    let runner = Arc::clone(&listener);
    let running = thread::spawn(move || runner.start());

    for (event_count, event) in listener.events().enumerate() {
        println!("Event #{}: {}", event_count + 1, event.mask);
        println!("  Path: {}", event.full_path().display());
        println!("  Process ID: {}", event.pid);
        println!("  Is directory: {}", event.is_directory());
        println!();
    }

    running.join().map_err(|_| "read loop panicked")??;
    println!("Overflowed {} times", listener.overflow_count());
    Ok(())
}
