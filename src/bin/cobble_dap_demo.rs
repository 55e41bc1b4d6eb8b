//! Manual-testing harness for the Cobble debug adapter.
//!
//! Runs a tiny scripted interpreter under the adapter so the server can be
//! exercised from an IDE: attach over stdio (default) or a pipe, set
//! breakpoints in the generated listfile, step, and inspect variables.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use cobble_debugger::{FrameContext, FunctionExtent, Severity, create_adapter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Debugger pipe path; stdio when omitted.
    #[clap(long)]
    pipe: Option<String>,

    /// Write all DAP traffic verbatim into this file.
    #[clap(long)]
    dap_log: Option<PathBuf>,

    /// Delay between script commands, in milliseconds.
    #[clap(long, default_value_t = 200)]
    step_delay_ms: u64,
}

/// Variable snapshot shared by every frame of the scripted run.
#[derive(Default)]
struct ScriptVariables {
    values: Mutex<BTreeMap<String, String>>,
}

impl ScriptVariables {
    fn set(&self, name: &str, value: &str) {
        self.values
            .lock()
            .unwrap()
            .insert(name.to_string(), value.to_string());
    }
}

impl FrameContext for ScriptVariables {
    fn variable_names(&self) -> Vec<String> {
        self.values.lock().unwrap().keys().cloned().collect()
    }

    fn variable(&self, name: &str) -> Option<String> {
        self.values.lock().unwrap().get(name).cloned()
    }
}

const DEMO_SCRIPT: &str = "\
# Cobble demo listfile
project(demo)
set(GREETING hello)
set(TARGET world)
message(run)
";

/// (function name, start line, end line) per command of the demo script.
const DEMO_COMMANDS: &[(&str, i64, i64)] = &[
    ("project", 2, 2),
    ("set", 3, 3),
    ("set", 4, 4),
    ("message", 5, 5),
];

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let script_path = std::env::temp_dir().join("cobble-demo.cbl");
    std::fs::write(&script_path, DEMO_SCRIPT)
        .with_context(|| format!("write demo script {}", script_path.display()))?;
    let script_path = script_path.to_string_lossy().into_owned();
    log::info!("demo script at {script_path}");

    let adapter = create_adapter(args.pipe.as_deref(), args.dap_log.as_deref())?;

    let extents: Vec<FunctionExtent> = DEMO_COMMANDS
        .iter()
        .map(|&(_, start, end)| FunctionExtent::new(start, end))
        .collect();

    let variables: Arc<ScriptVariables> = Arc::new(ScriptVariables::default());
    let context: Arc<dyn FrameContext> = variables.clone();

    // File-load sentinel frame around parsing, as the interpreter does it.
    adapter.begin_function(context.clone(), &script_path, &script_path, 0);
    adapter.source_file_loaded(&script_path, &extents);
    adapter.end_function();

    for &(name, line, _) in DEMO_COMMANDS {
        adapter.begin_function(context.clone(), &script_path, name, line);
        match name {
            "project" => variables.set("PROJECT_NAME", "demo"),
            "set" if line == 3 => variables.set("GREETING", "hello"),
            "set" => variables.set("TARGET", "world"),
            "message" => adapter.check_exception(Severity::Message, "run"),
            _ => {}
        }
        std::thread::sleep(Duration::from_millis(args.step_delay_ms));
        adapter.end_function();
    }

    adapter.report_exit(0);
    Ok(())
}
