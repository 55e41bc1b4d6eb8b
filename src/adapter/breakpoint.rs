//! Source breakpoints: deferred validation and line calibration.
//!
//! Clients usually set breakpoints before the interpreter has parsed the
//! listfile they refer to. Until the function-line table for a source
//! arrives, its breakpoints are stored unverified; when the table shows up
//! each one is calibrated to the nearest executable line and re-announced to
//! the client with a `breakpoint` "changed" event.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use itertools::Itertools;

use crate::host::FunctionExtent;
use crate::io::DapWriter;
use crate::protocol::{
    BreakpointEventBody, BreakpointInfo, Event, SetBreakpointsArguments, SetBreakpointsResponseBody,
    Source,
};

#[derive(Debug)]
struct TrackedBreakpoint {
    id: i64,
    requested_line: i64,
    effective_line: i64,
    valid: bool,
}

#[derive(Default)]
struct BreakpointState {
    breakpoints: HashMap<String, Vec<TrackedBreakpoint>>,
    function_lines: HashMap<String, Vec<FunctionExtent>>,
    pending_validation: HashSet<String>,
    next_id: i64,
}

pub struct BreakpointManager {
    out: Arc<Mutex<DapWriter>>,
    state: Mutex<BreakpointState>,
}

impl BreakpointManager {
    pub fn new(out: Arc<Mutex<DapWriter>>) -> BreakpointManager {
        BreakpointManager {
            out,
            state: Mutex::new(BreakpointState::default()),
        }
    }

    /// Replace the breakpoint set of one source.
    pub fn handle_set_breakpoints(
        &self,
        args: &SetBreakpointsArguments,
    ) -> SetBreakpointsResponseBody {
        let Some(client_path) = args.source.path.as_deref() else {
            return SetBreakpointsResponseBody {
                breakpoints: Vec::new(),
            };
        };
        let source_path = normalize_source_path(client_path);
        let source = Source::from_path(source_path.clone());

        let mut state = self.state.lock().unwrap();
        let table_loaded = state.function_lines.contains_key(&source_path);
        if !table_loaded {
            // Validate once the file is parsed.
            state.pending_validation.insert(source_path.clone());
        }

        let mut stored = Vec::with_capacity(args.breakpoints.len());
        let mut response = Vec::with_capacity(args.breakpoints.len());
        for requested in &args.breakpoints {
            let id = state.next_id;
            state.next_id += 1;

            let effective = if table_loaded {
                calibrate(&state.function_lines[&source_path], requested.line)
            } else {
                0
            };
            let valid = table_loaded && effective > 0;
            stored.push(TrackedBreakpoint {
                id,
                requested_line: requested.line,
                effective_line: effective,
                valid,
            });
            response.push(BreakpointInfo {
                id: Some(id),
                verified: valid,
                line: Some(if valid { effective } else { requested.line }),
                source: Some(source.clone()),
            });
        }
        state.breakpoints.insert(source_path, stored);

        SetBreakpointsResponseBody {
            breakpoints: response,
        }
    }

    /// Install the function-line table of a freshly parsed source and
    /// validate any breakpoints that were waiting for it.
    pub fn source_file_loaded(&self, source_path: &str, functions: &[FunctionExtent]) {
        let events = {
            let mut state = self.state.lock().unwrap();
            if state.function_lines.contains_key(source_path) {
                // Re-parsing the same file must not move breakpoints.
                return;
            }
            state
                .function_lines
                .insert(source_path.to_string(), functions.to_vec());

            if !state.pending_validation.remove(source_path) {
                return;
            }

            let source = Source::from_path(source_path);
            let extents = state.function_lines[source_path].clone();
            state
                .breakpoints
                .get_mut(source_path)
                .map(|breakpoints| {
                    breakpoints
                        .iter_mut()
                        .map(|bp| {
                            let effective = calibrate(&extents, bp.requested_line);
                            bp.valid = effective > 0;
                            bp.effective_line = effective;
                            BreakpointEventBody {
                                reason: "changed",
                                breakpoint: BreakpointInfo {
                                    id: Some(bp.id),
                                    verified: bp.valid,
                                    line: Some(if bp.valid { effective } else { bp.requested_line }),
                                    source: Some(source.clone()),
                                },
                            }
                        })
                        .collect_vec()
                })
                .unwrap_or_default()
        };

        let mut out = self.out.lock().unwrap();
        for event in events {
            if let Err(err) = out.send_event(Event::Breakpoint(event)) {
                log::warn!("failed to send breakpoint event: {err}");
                break;
            }
        }
    }

    /// Ids of all valid breakpoints bound to `line` of `source_path`.
    pub fn breakpoints_at(&self, source_path: &str, line: i64) -> Vec<i64> {
        let state = self.state.lock().unwrap();
        state
            .breakpoints
            .get(source_path)
            .map(|breakpoints| {
                breakpoints
                    .iter()
                    .filter(|bp| bp.valid && bp.effective_line == line)
                    .map(|bp| bp.id)
                    .collect_vec()
            })
            .unwrap_or_default()
    }

    pub fn clear_all(&self) {
        self.state.lock().unwrap().breakpoints.clear();
    }
}

/// Map a requested line to the start of the nearest executable function.
///
/// Picks the first extent starting at or after `line`; a line past the last
/// extent binds to the last function; a source with no functions yields 0.
fn calibrate(extents: &[FunctionExtent], line: i64) -> i64 {
    if let Some(extent) = extents.iter().find(|e| e.start_line >= line) {
        return extent.start_line;
    }
    match extents.last() {
        Some(last) if last.end_line <= line => last.start_line,
        _ => 0,
    }
}

/// Client paths may arrive in arbitrary case or via symlinks. When the file
/// exists its canonical spelling is used, so it matches the path the
/// interpreter reports; otherwise the client's spelling is kept as-is.
pub(crate) fn normalize_source_path(path: &str) -> String {
    match std::fs::canonicalize(path) {
        Ok(real) => real.to_string_lossy().into_owned(),
        Err(_) => path.to_string(),
    }
}
