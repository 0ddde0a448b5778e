use std::env;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Instant;

use mocktree_core::{EventKind, Reference, SystemClock, TreeConfig};
use serde_json::json;

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct Output {
    implementation: &'static str,
    workload: String,
    timestamp: String,
    name: String,
    total_ops: u64,
    duration_ms: f64,
    ops_per_sec: f64,
    extra: Extra,
    source_file: Option<String>,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct Extra {
    count: u64,
    events: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut count: u64 = 200;
    let mut out_file: Option<PathBuf> = None;
    for arg in env::args().skip(1) {
        if let Some(val) = arg.strip_prefix("--count=") {
            count = val.parse().unwrap_or(count);
        } else if let Some(val) = arg.strip_prefix("--out=") {
            out_file = Some(PathBuf::from(val));
        }
    }

    let root = Reference::with_clock(&TreeConfig::default(), Rc::new(SystemClock));
    let events = Rc::new(std::cell::Cell::new(0u64));
    for kind in EventKind::ALL {
        let events = events.clone();
        root.on(kind, move |_, _| events.set(events.get() + 1));
    }

    let start = Instant::now();
    for i in 0..count {
        root.push(json!({ "n": i }))?;
    }
    root.flush()?;
    // Reverse the order through priorities: one move per child.
    for (rank, key) in root.get_ordered_child_keys().iter().rev().enumerate() {
        root.child(key)?.set_priority(rank as f64);
    }
    root.flush()?;
    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

    let name = format!("push-reprioritize-{count}");
    let output = Output {
        implementation: "mocktree-core",
        workload: name.clone(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        name,
        total_ops: count * 2,
        duration_ms,
        ops_per_sec: if duration_ms > 0.0 {
            (count as f64 * 2.0) / duration_ms * 1000.0
        } else {
            f64::INFINITY
        },
        extra: Extra {
            count,
            events: events.get(),
        },
        source_file: out_file.as_ref().map(|p| p.display().to_string()),
    };

    let json = serde_json::to_string_pretty(&output)?;
    if let Some(path) = out_file {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, &json)?;
    }
    println!("{json}");
    Ok(())
}
